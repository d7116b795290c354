//! Golden file tests for unit normalization.
//!
//! Each JSON file in `fixtures/normalize/` is one case:
//! ```json
//! {
//!   "quantity": "24", "unit": "oz", "kind": "water",
//!   "expected": { "amount": 710, "unit": "milliliters" }
//! }
//! ```
//! Cases that must fail carry `"error": "unparsable_quantity"` or
//! `"error": "incompatible_unit"` instead of `expected`.

use forge_core::normalizer::{NormalizeError, UnitNormalizer};
use forge_core::types::{ItemKind, NormalizedQuantity};
use glob::glob;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct TestCase {
    quantity: Option<String>,
    unit: Option<String>,
    kind: ItemKind,
    #[serde(default)]
    expected: Option<NormalizedQuantity>,
    #[serde(default)]
    error: Option<String>,
}

fn error_tag(error: &NormalizeError) -> &'static str {
    match error {
        NormalizeError::UnparsableQuantity(_) => "unparsable_quantity",
        NormalizeError::IncompatibleUnit { .. } => "incompatible_unit",
    }
}

fn load_test_cases() -> Vec<(String, TestCase)> {
    let pattern =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/normalize/*.json");
    let pattern_str = pattern.to_string_lossy();

    let mut cases = Vec::new();
    for entry in glob(&pattern_str).expect("Failed to read glob pattern") {
        let path = entry.expect("Failed to read directory entry");
        let name = path.file_stem().unwrap().to_string_lossy().into_owned();
        let content = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
        let case: TestCase = serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse {}: {}", path.display(), e));
        cases.push((name, case));
    }

    // Sort by name for deterministic ordering
    cases.sort_by(|a, b| a.0.cmp(&b.0));
    cases
}

#[test]
fn test_normalize_golden_files() {
    let cases = load_test_cases();
    assert!(!cases.is_empty(), "no normalize fixtures found");

    let normalizer = UnitNormalizer::default();
    let mut failures = Vec::new();

    for (name, case) in &cases {
        let actual = normalizer.normalize(case.quantity.as_deref(), case.unit.as_deref(), case.kind);

        let ok = match (&case.expected, &case.error, &actual) {
            (Some(expected), None, Ok(q)) => q == expected,
            (None, Some(tag), Err(e)) => error_tag(e) == tag,
            _ => false,
        };
        if !ok {
            failures.push(format!(
                "\n=== {} ===\nInput: {:?} {:?} ({})\nExpected: {:?} / {:?}\nActual:   {:?}\n",
                name, case.quantity, case.unit, case.kind, case.expected, case.error, actual
            ));
        }
    }

    if !failures.is_empty() {
        panic!(
            "\n{} failures across {} tests:\n{}",
            failures.len(),
            cases.len(),
            failures.concat()
        );
    }
}

/// Feeding a canonical result back through the normalizer changes nothing.
#[test]
fn test_normalize_golden_outputs_are_fixed_points() {
    let normalizer = UnitNormalizer::default();

    for (name, case) in load_test_cases() {
        let Some(expected) = case.expected else {
            continue;
        };
        let amount = expected.amount().to_string();
        let unit = expected.unit().symbol();
        let again = normalizer
            .normalize(Some(&amount), Some(unit), case.kind)
            .unwrap_or_else(|e| panic!("{name}: canonical output did not normalize: {e}"));
        assert_eq!(again, expected, "{name}: not idempotent");
    }
}
