//! USDA FoodData Central search client.

use async_trait::async_trait;
use serde::Deserialize;

use super::{FoodDatabase, FoodDbError, FoodRecord};
use crate::types::NutrientProfile;

/// Data types searched. Branded foods are left out: their names are noisy
/// and their nutrients are per serving rather than per 100 g.
const DATA_TYPES: &str = "Survey (FNDDS),Foundation,SR Legacy";

const ENERGY_KCAL: u64 = 1008;
/// Atwater energy, reported by Foundation foods instead of 1008.
const ENERGY_ATWATER_GENERAL: u64 = 2047;
const ENERGY_ATWATER_SPECIFIC: u64 = 2048;
const PROTEIN: u64 = 1003;
const FAT: u64 = 1004;
const CARBOHYDRATE: u64 = 1005;
const FIBER: u64 = 1079;

#[derive(Debug)]
pub struct UsdaClient {
    /// Without a key every search returns no results.
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl UsdaClient {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, FoodDbError> {
        let client = reqwest::Client::builder()
            .user_agent("forge/0.1")
            .build()
            .map_err(|e| FoodDbError::RequestFailed(e.to_string()))?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    foods: Vec<SearchFood>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFood {
    fdc_id: u64,
    description: String,
    #[serde(default)]
    brand_owner: Option<String>,
    #[serde(default)]
    brand_name: Option<String>,
    #[serde(default)]
    serving_size: Option<f64>,
    #[serde(default)]
    serving_size_unit: Option<String>,
    #[serde(default)]
    food_nutrients: Vec<SearchNutrient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNutrient {
    #[serde(default)]
    nutrient_id: Option<u64>,
    #[serde(default)]
    nutrient_name: Option<String>,
    #[serde(default)]
    unit_name: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

impl SearchFood {
    fn into_record(self) -> FoodRecord {
        let per_100g = extract_nutrients(&self.food_nutrients);
        let serving_grams = match self.serving_size_unit.as_deref() {
            Some(u) if u.eq_ignore_ascii_case("g") || u.eq_ignore_ascii_case("grm") => {
                self.serving_size.filter(|g| *g > 0.0)
            }
            _ => None,
        };
        FoodRecord {
            fdc_id: self.fdc_id,
            name: self.description,
            brand: self.brand_name.or(self.brand_owner),
            per_100g,
            serving_grams,
        }
    }
}

/// Read nutrients by id, falling back to nutrient names when ids are absent.
fn extract_nutrients(nutrients: &[SearchNutrient]) -> NutrientProfile {
    let mut profile = NutrientProfile::default();
    let mut energy_priority = 0u8;

    for n in nutrients {
        let Some(value) = n.value else { continue };
        let name = n.nutrient_name.as_deref().unwrap_or_default().to_lowercase();
        let unit = n.unit_name.as_deref().unwrap_or_default().to_lowercase();

        match n.nutrient_id {
            Some(ENERGY_KCAL) => set_energy(&mut profile, &mut energy_priority, 3, value),
            Some(ENERGY_ATWATER_SPECIFIC) => set_energy(&mut profile, &mut energy_priority, 2, value),
            Some(ENERGY_ATWATER_GENERAL) => set_energy(&mut profile, &mut energy_priority, 1, value),
            Some(PROTEIN) => profile.protein_g = value,
            Some(FAT) => profile.fat_g = value,
            Some(CARBOHYDRATE) => profile.carbs_g = value,
            Some(FIBER) => profile.fiber_g = value,
            Some(_) => {}
            None => {
                if name.starts_with("energy") && unit == "kcal" {
                    set_energy(&mut profile, &mut energy_priority, 1, value);
                } else if name == "protein" {
                    profile.protein_g = value;
                } else if name.starts_with("total lipid") {
                    profile.fat_g = value;
                } else if name.starts_with("carbohydrate") {
                    profile.carbs_g = value;
                } else if name.starts_with("fiber") {
                    profile.fiber_g = value;
                }
            }
        }
    }

    profile
}

fn set_energy(profile: &mut NutrientProfile, current: &mut u8, priority: u8, value: f64) {
    if priority > *current {
        profile.calories = value;
        *current = priority;
    }
}

#[async_trait]
impl FoodDatabase for UsdaClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<FoodRecord>, FoodDbError> {
        let Some(api_key) = &self.api_key else {
            tracing::debug!("USDA_API_KEY not set, skipping food search");
            return Ok(Vec::new());
        };

        let page_size = limit.to_string();
        let response = self
            .client
            .get(format!("{}/foods/search", self.base_url))
            .query(&[
                ("api_key", api_key.as_str()),
                ("query", query),
                ("pageSize", page_size.as_str()),
                ("dataType", DATA_TYPES),
            ])
            .send()
            .await
            .map_err(|e| FoodDbError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FoodDbError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(FoodDbError::ApiError {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            });
        }

        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| FoodDbError::ParseError(e.to_string()))?;

        tracing::debug!(query = query, results = parsed.foods.len(), "USDA search");
        Ok(parsed.foods.into_iter().map(SearchFood::into_record).collect())
    }

    fn source_name(&self) -> &'static str {
        "usda"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "totalHits": 2,
        "foods": [
            {
                "fdcId": 171688,
                "description": "Apples, raw, with skin (Includes foods for USDA's Food Distribution Program)",
                "dataType": "SR Legacy",
                "foodNutrients": [
                    {"nutrientId": 1003, "nutrientName": "Protein", "unitName": "G", "value": 0.26},
                    {"nutrientId": 1004, "nutrientName": "Total lipid (fat)", "unitName": "G", "value": 0.17},
                    {"nutrientId": 1005, "nutrientName": "Carbohydrate, by difference", "unitName": "G", "value": 13.8},
                    {"nutrientId": 1008, "nutrientName": "Energy", "unitName": "KCAL", "value": 52.0},
                    {"nutrientId": 1079, "nutrientName": "Fiber, total dietary", "unitName": "G", "value": 2.4}
                ]
            },
            {
                "fdcId": 1750340,
                "description": "Apples, fuji, with skin, raw",
                "dataType": "Foundation",
                "foodNutrients": [
                    {"nutrientId": 2047, "nutrientName": "Energy (Atwater General Factors)", "unitName": "KCAL", "value": 63.0},
                    {"nutrientId": 2048, "nutrientName": "Energy (Atwater Specific Factors)", "unitName": "KCAL", "value": 60.0}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_search_response() {
        let parsed: SearchResponse = serde_json::from_str(SAMPLE).unwrap();
        let records: Vec<FoodRecord> = parsed.foods.into_iter().map(SearchFood::into_record).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fdc_id, 171688);
        assert_eq!(records[0].per_100g.calories, 52.0);
        assert_eq!(records[0].per_100g.carbs_g, 13.8);
        assert_eq!(records[0].per_100g.fiber_g, 2.4);
        // Specific Atwater factors win over general ones
        assert_eq!(records[1].per_100g.calories, 60.0);
    }

    #[test]
    fn test_name_fallback() {
        let nutrients = vec![
            SearchNutrient {
                nutrient_id: None,
                nutrient_name: Some("Energy".to_string()),
                unit_name: Some("KCAL".to_string()),
                value: Some(143.0),
            },
            SearchNutrient {
                nutrient_id: None,
                nutrient_name: Some("Protein".to_string()),
                unit_name: Some("G".to_string()),
                value: Some(12.6),
            },
        ];
        let profile = extract_nutrients(&nutrients);
        assert_eq!(profile.calories, 143.0);
        assert_eq!(profile.protein_g, 12.6);
    }

    #[tokio::test]
    async fn test_no_api_key_returns_empty() {
        let client = UsdaClient::new(None, "http://127.0.0.1:1".to_string()).unwrap();
        assert!(client.search("apple", 5).await.unwrap().is_empty());
    }
}
