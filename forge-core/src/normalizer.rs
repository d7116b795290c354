//! Unit normalization.
//!
//! Turns free-text amounts and units ("24", "oz"; "an", none; "1 1/2", "cups")
//! into a [`NormalizedQuantity`] in grams, milliliters or a count. Purely
//! table-driven, so the same input always yields the same output, and
//! feeding a canonical result back in returns it unchanged.

use std::collections::HashMap;
use std::sync::LazyLock;

use thiserror::Error;

use crate::config::BodyWeightUnit;
use crate::types::{CanonicalUnit, ItemKind, NormalizedQuantity};

const GRAMS_PER_OZ: f64 = 28.3495;
const GRAMS_PER_LB: f64 = 453.592;
const ML_PER_FL_OZ: f64 = 29.5735;
const ML_PER_CUP: f64 = 236.588;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("cannot interpret quantity {0:?}")]
    UnparsableQuantity(String),

    #[error("'{unit}' cannot measure {kind}")]
    IncompatibleUnit { unit: String, kind: ItemKind },
}

/// What a unit measures, with its factor to the canonical unit.
#[derive(Debug, Clone, Copy, PartialEq)]
enum UnitClass {
    /// Grams per unit.
    Mass(f64),
    /// Milliliters per unit.
    Volume(f64),
    Count,
    /// "oz": fluid for water, mass for everything else.
    Ounce,
}

const UNITS_RAW: &[(&str, UnitClass)] = &[
    // Mass
    ("mg", UnitClass::Mass(0.001)),
    ("milligram", UnitClass::Mass(0.001)),
    ("milligrams", UnitClass::Mass(0.001)),
    ("g", UnitClass::Mass(1.0)),
    ("gr", UnitClass::Mass(1.0)),
    ("gram", UnitClass::Mass(1.0)),
    ("grams", UnitClass::Mass(1.0)),
    ("kg", UnitClass::Mass(1000.0)),
    ("kgs", UnitClass::Mass(1000.0)),
    ("kilo", UnitClass::Mass(1000.0)),
    ("kilos", UnitClass::Mass(1000.0)),
    ("kilogram", UnitClass::Mass(1000.0)),
    ("kilograms", UnitClass::Mass(1000.0)),
    ("lb", UnitClass::Mass(GRAMS_PER_LB)),
    ("lbs", UnitClass::Mass(GRAMS_PER_LB)),
    ("pound", UnitClass::Mass(GRAMS_PER_LB)),
    ("pounds", UnitClass::Mass(GRAMS_PER_LB)),
    ("oz", UnitClass::Ounce),
    ("ounce", UnitClass::Ounce),
    ("ounces", UnitClass::Ounce),
    // Volume
    ("ml", UnitClass::Volume(1.0)),
    ("milliliter", UnitClass::Volume(1.0)),
    ("milliliters", UnitClass::Volume(1.0)),
    ("millilitre", UnitClass::Volume(1.0)),
    ("millilitres", UnitClass::Volume(1.0)),
    ("l", UnitClass::Volume(1000.0)),
    ("liter", UnitClass::Volume(1000.0)),
    ("liters", UnitClass::Volume(1000.0)),
    ("litre", UnitClass::Volume(1000.0)),
    ("litres", UnitClass::Volume(1000.0)),
    ("tsp", UnitClass::Volume(4.92892)),
    ("teaspoon", UnitClass::Volume(4.92892)),
    ("teaspoons", UnitClass::Volume(4.92892)),
    ("tbsp", UnitClass::Volume(14.7868)),
    ("tbs", UnitClass::Volume(14.7868)),
    ("tablespoon", UnitClass::Volume(14.7868)),
    ("tablespoons", UnitClass::Volume(14.7868)),
    ("fl oz", UnitClass::Volume(ML_PER_FL_OZ)),
    ("fl. oz", UnitClass::Volume(ML_PER_FL_OZ)),
    ("floz", UnitClass::Volume(ML_PER_FL_OZ)),
    ("fluid ounce", UnitClass::Volume(ML_PER_FL_OZ)),
    ("fluid ounces", UnitClass::Volume(ML_PER_FL_OZ)),
    ("c", UnitClass::Volume(ML_PER_CUP)),
    ("cup", UnitClass::Volume(ML_PER_CUP)),
    ("cups", UnitClass::Volume(ML_PER_CUP)),
    ("pt", UnitClass::Volume(473.176)),
    ("pint", UnitClass::Volume(473.176)),
    ("pints", UnitClass::Volume(473.176)),
    ("qt", UnitClass::Volume(946.353)),
    ("quart", UnitClass::Volume(946.353)),
    ("quarts", UnitClass::Volume(946.353)),
    ("gal", UnitClass::Volume(3785.41)),
    ("gallon", UnitClass::Volume(3785.41)),
    ("gallons", UnitClass::Volume(3785.41)),
    ("glass", UnitClass::Volume(8.0 * ML_PER_FL_OZ)),
    ("glasses", UnitClass::Volume(8.0 * ML_PER_FL_OZ)),
    ("bottle", UnitClass::Volume(500.0)),
    ("bottles", UnitClass::Volume(500.0)),
    // Count
    ("item", UnitClass::Count),
    ("items", UnitClass::Count),
    ("piece", UnitClass::Count),
    ("pieces", UnitClass::Count),
    ("pc", UnitClass::Count),
    ("pcs", UnitClass::Count),
    ("slice", UnitClass::Count),
    ("slices", UnitClass::Count),
    ("serving", UnitClass::Count),
    ("servings", UnitClass::Count),
    ("each", UnitClass::Count),
    ("whole", UnitClass::Count),
    ("small", UnitClass::Count),
    ("medium", UnitClass::Count),
    ("large", UnitClass::Count),
    ("extra-large", UnitClass::Count),
    ("xl", UnitClass::Count),
];

static UNITS: LazyLock<HashMap<&'static str, UnitClass>> =
    LazyLock::new(|| UNITS_RAW.iter().copied().collect());

/// Words standing in for a number. "a"/"an"/"some" are the implicit singulars.
const NUMBER_WORDS: &[(&str, f64)] = &[
    ("a", 1.0),
    ("an", 1.0),
    ("one", 1.0),
    ("some", 1.0),
    ("single", 1.0),
    ("half", 0.5),
    ("couple", 2.0),
    ("two", 2.0),
    ("three", 3.0),
    ("four", 4.0),
    ("five", 5.0),
    ("six", 6.0),
    ("seven", 7.0),
    ("eight", 8.0),
    ("nine", 9.0),
    ("ten", 10.0),
    ("eleven", 11.0),
    ("twelve", 12.0),
    ("dozen", 12.0),
];

const VULGAR_FRACTIONS: &[(char, &str)] = &[
    ('½', "1/2"),
    ('⅓', "1/3"),
    ('⅔', "2/3"),
    ('¼', "1/4"),
    ('¾', "3/4"),
    ('⅕', "1/5"),
    ('⅛', "1/8"),
];

/// Deterministic quantity normalizer.
#[derive(Debug, Clone, Copy)]
pub struct UnitNormalizer {
    /// Unit assumed for a body weight given as a bare number.
    weight_unit: BodyWeightUnit,
}

impl Default for UnitNormalizer {
    fn default() -> Self {
        Self::new(BodyWeightUnit::Pounds)
    }
}

impl UnitNormalizer {
    pub fn new(weight_unit: BodyWeightUnit) -> Self {
        Self { weight_unit }
    }

    /// Normalize a raw amount and unit for an item of the given kind.
    ///
    /// A number glued to its unit ("24oz") is split. An absent amount with a
    /// unit ("cup of coffee") means one of that unit; an absent amount and
    /// unit means one serving for food and is unparsable for water and weight.
    /// Water without a unit is counted in glasses when its amount is a word
    /// ("a", "some", "two") and in fluid ounces when it is a numeral.
    pub fn normalize(
        &self,
        raw_quantity: Option<&str>,
        raw_unit: Option<&str>,
        kind: ItemKind,
    ) -> Result<NormalizedQuantity, NormalizeError> {
        let quantity_text = raw_quantity.map(str::trim).filter(|s| !s.is_empty());
        let unit_text = raw_unit.map(clean_unit).filter(|s| !s.is_empty());

        let (amount, unit) = match quantity_text {
            Some(text) => {
                let (amount, rest) = parse_leading_amount(text)
                    .ok_or_else(|| NormalizeError::UnparsableQuantity(text.to_string()))?;
                let rest = clean_unit(&rest);
                let unit = unit_text.or((!rest.is_empty()).then_some(rest));
                (amount, unit)
            }
            None => match (unit_text, kind) {
                (Some(unit), _) => (1.0, Some(unit)),
                (None, ItemKind::Food) => (1.0, None),
                (None, _) => {
                    return Err(NormalizeError::UnparsableQuantity(String::new()));
                }
            },
        };

        let unit = match (unit, kind) {
            (None, ItemKind::Water) => Some(default_water_unit(quantity_text).to_string()),
            (unit, _) => unit,
        };

        let (value, canonical) = self.convert(amount, unit.as_deref(), kind)?;
        NormalizedQuantity::new(round_amount(value), canonical)
            .ok_or_else(|| NormalizeError::UnparsableQuantity(amount.to_string()))
    }

    fn convert(
        &self,
        amount: f64,
        unit: Option<&str>,
        kind: ItemKind,
    ) -> Result<(f64, CanonicalUnit), NormalizeError> {
        let class = unit.and_then(|u| UNITS.get(u).copied());
        let incompatible = || NormalizeError::IncompatibleUnit {
            unit: unit.unwrap_or_default().to_string(),
            kind,
        };

        match kind {
            ItemKind::Water => match class {
                Some(UnitClass::Volume(ml)) => Ok((amount * ml, CanonicalUnit::Milliliters)),
                Some(UnitClass::Ounce) => Ok((amount * ML_PER_FL_OZ, CanonicalUnit::Milliliters)),
                // 1 g of water is 1 ml
                Some(UnitClass::Mass(g)) => Ok((amount * g, CanonicalUnit::Milliliters)),
                Some(UnitClass::Count) | None => Err(incompatible()),
            },
            ItemKind::Weight => match class {
                Some(UnitClass::Mass(g)) => Ok((amount * g, CanonicalUnit::Grams)),
                Some(UnitClass::Ounce) => Ok((amount * GRAMS_PER_OZ, CanonicalUnit::Grams)),
                None if unit.is_none() => Ok((
                    amount * self.weight_unit.grams_per_unit(),
                    CanonicalUnit::Grams,
                )),
                _ => Err(incompatible()),
            },
            ItemKind::Food => match class {
                Some(UnitClass::Mass(g)) => Ok((amount * g, CanonicalUnit::Grams)),
                Some(UnitClass::Ounce) => Ok((amount * GRAMS_PER_OZ, CanonicalUnit::Grams)),
                Some(UnitClass::Volume(ml)) => Ok((amount * ml, CanonicalUnit::Milliliters)),
                // Unknown units ("scoops", "bowls") are counted
                Some(UnitClass::Count) | None => Ok((amount, CanonicalUnit::Count)),
            },
        }
    }
}

/// Unit for a water amount given without one.
fn default_water_unit(quantity_text: Option<&str>) -> &'static str {
    let first = quantity_text
        .and_then(|text| text.split_whitespace().next())
        .map(str::to_lowercase);
    match first {
        Some(word) if NUMBER_WORDS.iter().any(|(w, _)| *w == word) => "glass",
        _ => "fl oz",
    }
}

/// Amounts of 10 or more round to whole units, smaller ones to one decimal.
fn round_amount(value: f64) -> f64 {
    if value >= 10.0 {
        value.round()
    } else {
        (value * 10.0).round() / 10.0
    }
}

/// Lowercase, trim, and drop a trailing period or "of" ("cups of", "tbsp.").
fn clean_unit(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let lower = lower.strip_suffix(" of").unwrap_or(&lower);
    lower.trim().trim_end_matches('.').trim().to_string()
}

/// Parse the amount at the start of `text`, returning it and whatever follows.
///
/// Handles integers, decimals, fractions, mixed numbers, unicode fractions
/// and number words. Negative amounts are not amounts.
fn parse_leading_amount(text: &str) -> Option<(f64, String)> {
    let mut expanded = String::with_capacity(text.len() + 4);
    for c in text.trim().chars() {
        match VULGAR_FRACTIONS.iter().find(|(v, _)| *v == c) {
            Some((_, ascii)) => {
                expanded.push(' ');
                expanded.push_str(ascii);
                expanded.push(' ');
            }
            None => expanded.push(c),
        }
    }
    let s = expanded.trim().to_lowercase();
    let words: Vec<&str> = s.split_whitespace().collect();
    let first = *words.first()?;

    // Mixed number: "1 1/2"
    if words.len() >= 2 && first.chars().all(|c| c.is_ascii_digit()) && is_fraction(words[1]) {
        let whole: f64 = first.parse().ok()?;
        let frac = parse_fraction(words[1])?;
        return Some((whole + frac, words[2..].join(" ")));
    }

    if is_fraction(first) {
        return Some((parse_fraction(first)?, words[1..].join(" ")));
    }

    // Decimal or integer, possibly glued to a unit: "24oz"
    let numeric_len = first
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(first.len());
    if numeric_len > 0 {
        let value: f64 = first[..numeric_len].parse().ok()?;
        let glued = &first[numeric_len..];
        let rest = std::iter::once(glued)
            .chain(words[1..].iter().copied())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        return Some((value, rest));
    }

    parse_number_words(&words)
}

fn parse_number_words(words: &[&str]) -> Option<(f64, String)> {
    let lookup = |w: &str| {
        NUMBER_WORDS
            .iter()
            .find(|(word, _)| *word == w)
            .map(|(_, value)| *value)
    };

    let mut value = lookup(words[0])?;
    let mut consumed = 1;

    // "a couple", "a dozen", "a half": the article is not the amount
    if matches!(words[0], "a" | "an") {
        if let Some(next) = words.get(1).and_then(|w| lookup(w)) {
            if matches!(words[1], "couple" | "dozen" | "half") {
                value = next;
                consumed = 2;
            }
        }
    }
    // "half a", "half an"
    if words[0] == "half" && matches!(words.get(1), Some(&"a") | Some(&"an")) {
        consumed = 2;
    }
    if words.get(consumed) == Some(&"of") {
        consumed += 1;
    }

    Some((value, words[consumed..].join(" ")))
}

/// Check if a string is a fraction like "1/2" or "3/4"
fn is_fraction(s: &str) -> bool {
    match s.split_once('/') {
        Some((before, after)) => {
            !before.is_empty()
                && !after.is_empty()
                && before.chars().all(|c| c.is_ascii_digit())
                && after.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn parse_fraction(s: &str) -> Option<f64> {
    let (num, denom) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let denom: f64 = denom.trim().parse().ok()?;
    if denom == 0.0 {
        return None;
    }
    Some(num / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(q: Option<&str>, u: Option<&str>, kind: ItemKind) -> Result<(f64, CanonicalUnit), NormalizeError> {
        UnitNormalizer::default()
            .normalize(q, u, kind)
            .map(|n| (n.amount(), n.unit()))
    }

    #[test]
    fn test_water_ounces_are_fluid() {
        assert_eq!(
            norm(Some("24"), Some("oz"), ItemKind::Water).unwrap(),
            (710.0, CanonicalUnit::Milliliters)
        );
    }

    #[test]
    fn test_food_ounces_are_mass() {
        assert_eq!(
            norm(Some("4"), Some("oz"), ItemKind::Food).unwrap(),
            (113.0, CanonicalUnit::Grams)
        );
    }

    #[test]
    fn test_glued_unit() {
        assert_eq!(
            norm(Some("24oz"), None, ItemKind::Water).unwrap(),
            (710.0, CanonicalUnit::Milliliters)
        );
    }

    #[test]
    fn test_implicit_singular() {
        assert_eq!(norm(Some("an"), None, ItemKind::Food).unwrap(), (1.0, CanonicalUnit::Count));
        assert_eq!(norm(Some("a couple"), None, ItemKind::Food).unwrap(), (2.0, CanonicalUnit::Count));
        assert_eq!(norm(Some("half"), Some("cup"), ItemKind::Food).unwrap(), (118.0, CanonicalUnit::Milliliters));
    }

    #[test]
    fn test_fractions() {
        assert_eq!(parse_leading_amount("1 1/2 cups"), Some((1.5, "cups".to_string())));
        assert_eq!(parse_leading_amount("½"), Some((0.5, String::new())));
        assert_eq!(parse_leading_amount("1½"), Some((1.5, String::new())));
        assert_eq!(parse_leading_amount("3/0"), None);
    }

    #[test]
    fn test_negative_is_unparsable() {
        assert!(matches!(
            norm(Some("-2"), Some("cups"), ItemKind::Food),
            Err(NormalizeError::UnparsableQuantity(_))
        ));
    }

    #[test]
    fn test_weight_bare_number_uses_default_unit() {
        assert_eq!(
            norm(Some("185.5"), None, ItemKind::Weight).unwrap(),
            (84141.0, CanonicalUnit::Grams)
        );
        let metric = UnitNormalizer::new(BodyWeightUnit::Kilograms);
        assert_eq!(
            metric.normalize(Some("80"), None, ItemKind::Weight).unwrap().amount(),
            80000.0
        );
    }

    #[test]
    fn test_incompatible_units() {
        assert!(matches!(
            norm(Some("2"), Some("cups"), ItemKind::Weight),
            Err(NormalizeError::IncompatibleUnit { kind: ItemKind::Weight, .. })
        ));
        assert!(matches!(
            norm(Some("2"), Some("slices"), ItemKind::Water),
            Err(NormalizeError::IncompatibleUnit { .. })
        ));
    }

    #[test]
    fn test_water_without_unit_uses_default_volume() {
        // Numerals are fluid ounces
        assert_eq!(norm(Some("24"), None, ItemKind::Water).unwrap(), (710.0, CanonicalUnit::Milliliters));
        assert_eq!(norm(Some("3"), None, ItemKind::Water).unwrap(), (89.0, CanonicalUnit::Milliliters));
        // Quantifier words are glasses
        for word in ["a", "an", "some", "Some", "one"] {
            assert_eq!(
                norm(Some(word), None, ItemKind::Water).unwrap(),
                (237.0, CanonicalUnit::Milliliters),
                "{word}"
            );
        }
        assert_eq!(norm(Some("two"), None, ItemKind::Water).unwrap(), (473.0, CanonicalUnit::Milliliters));
    }

    #[test]
    fn test_water_without_amount_is_unparsable() {
        assert!(matches!(
            norm(None, None, ItemKind::Water),
            Err(NormalizeError::UnparsableQuantity(_))
        ));
        assert!(matches!(
            norm(Some("lots"), None, ItemKind::Water),
            Err(NormalizeError::UnparsableQuantity(_))
        ));
    }

    #[test]
    fn test_missing_food_quantity_is_one_serving() {
        assert_eq!(norm(None, None, ItemKind::Food).unwrap(), (1.0, CanonicalUnit::Count));
        assert_eq!(norm(None, Some("cup of"), ItemKind::Food).unwrap(), (237.0, CanonicalUnit::Milliliters));
    }

    #[test]
    fn test_unknown_food_unit_is_counted() {
        assert_eq!(norm(Some("2"), Some("scoops"), ItemKind::Food).unwrap(), (2.0, CanonicalUnit::Count));
    }

    #[test]
    fn test_small_amounts_keep_one_decimal() {
        assert_eq!(norm(Some("1"), Some("tsp"), ItemKind::Food).unwrap(), (4.9, CanonicalUnit::Milliliters));
    }

    #[test]
    fn test_idempotent_on_canonical_output() {
        let normalizer = UnitNormalizer::default();
        let mut checked = 0;
        for (unit, _) in UNITS_RAW {
            for kind in [ItemKind::Food, ItemKind::Water, ItemKind::Weight] {
                for amount in ["2", "1/2", "185.5"] {
                    // Rows that cannot measure this kind have no canonical output
                    let Ok(first) = normalizer.normalize(Some(amount), Some(unit), kind) else {
                        continue;
                    };
                    let canonical = first.amount().to_string();
                    let again = normalizer
                        .normalize(Some(&canonical), Some(first.unit().symbol()), kind)
                        .unwrap();
                    assert_eq!(first, again, "{amount} {unit} as {kind}");
                    checked += 1;
                }
            }
        }
        assert!(checked >= UNITS_RAW.len() * 3);
    }
}
