//! Typical single-item masses and densities.
//!
//! Used when a food is logged by count ("an apple") or by volume ("a cup of
//! milk") and the food database did not report a serving size. Values are
//! taken from USDA FoodData Central portion data.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Portion facts for one food.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Portion {
    /// Mass of one typical item or serving.
    #[serde(default)]
    pub portion_grams: Option<f64>,
    #[serde(default)]
    pub grams_per_ml: Option<f64>,
}

#[derive(Deserialize)]
struct PortionEntry {
    #[serde(flatten)]
    portion: Portion,
    #[allow(dead_code)]
    source: String,
}

#[derive(Deserialize, Default)]
struct PortionDataFile {
    foods: HashMap<String, PortionEntry>,
    aliases: HashMap<String, String>,
}

static PORTIONS_JSON: &str = include_str!("data/portions.json");

static DATA: LazyLock<PortionDataFile> = LazyLock::new(|| {
    serde_json::from_str(PORTIONS_JSON).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Embedded portions.json is invalid; portion lookups disabled");
        PortionDataFile::default()
    })
});

fn normalize_name(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Direct, alias, then plural/singular lookup.
fn lookup(name: &str, data: &PortionDataFile) -> Option<Portion> {
    if let Some(entry) = data.foods.get(name) {
        return Some(entry.portion);
    }
    if let Some(entry) = data.aliases.get(name).and_then(|c| data.foods.get(c)) {
        return Some(entry.portion);
    }
    if let Some(entry) = data.foods.get(&format!("{name}s")) {
        return Some(entry.portion);
    }
    if let Some(singular) = name.strip_suffix("es") {
        if let Some(entry) = data.foods.get(singular) {
            return Some(entry.portion);
        }
    }
    name.strip_suffix('s')
        .and_then(|singular| data.foods.get(singular))
        .map(|entry| entry.portion)
}

/// Find portion facts for a food name.
///
/// Tries the whole name, then the part before the first comma ("Apples, raw,
/// with skin" -> "apples"), then the last word ("fuji apple" -> "apple").
pub fn find_portion(name: &str) -> Option<Portion> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return None;
    }

    if let Some(portion) = lookup(&normalized, &DATA) {
        return Some(portion);
    }

    let head = normalized.split(',').next().unwrap_or_default().trim();
    if head != normalized {
        if let Some(portion) = lookup(head, &DATA) {
            return Some(portion);
        }
    }

    let last_word = head.rsplit(' ').next().unwrap_or_default();
    if last_word != head && !last_word.is_empty() {
        return lookup(last_word, &DATA);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_lookup() {
        assert_eq!(find_portion("apple").unwrap().portion_grams, Some(182.0));
        assert_eq!(find_portion("Milk").unwrap().grams_per_ml, Some(1.03));
    }

    #[test]
    fn test_plural_and_alias() {
        assert_eq!(find_portion("eggs").unwrap().portion_grams, Some(50.0));
        assert_eq!(find_portion("peaches").unwrap().portion_grams, Some(150.0));
        assert_eq!(find_portion("OJ").unwrap().grams_per_ml, Some(1.04));
    }

    #[test]
    fn test_database_style_names() {
        assert_eq!(
            find_portion("Apples, raw, with skin").unwrap().portion_grams,
            Some(182.0)
        );
        assert_eq!(find_portion("fuji apple").unwrap().portion_grams, Some(182.0));
    }

    #[test]
    fn test_unknown() {
        assert!(find_portion("zzz").is_none());
        assert!(find_portion("  ").is_none());
    }

    #[test]
    fn test_embedded_data_parses() {
        let data: PortionDataFile = serde_json::from_str(PORTIONS_JSON).unwrap();
        for (alias, canonical) in &data.aliases {
            assert!(data.foods.contains_key(canonical), "alias {alias} -> {canonical}");
        }
    }
}
