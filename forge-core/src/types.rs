//! Domain types shared across the ingestion pipeline.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ItemError;

/// A chat message as received from the transport. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Uuid,
    /// Sender identity (e.g. a Discord user id).
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::received_at(sender, body, Utc::now())
    }

    pub fn received_at(
        sender: impl Into<String>,
        body: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            body: body.into(),
            received_at,
        }
    }
}

/// What a loggable item measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Food,
    Water,
    Weight,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemKind::Food => "food",
            ItemKind::Water => "water",
            ItemKind::Weight => "weight",
        })
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "food" | "drink" | "beverage" => Ok(ItemKind::Food),
            "water" => Ok(ItemKind::Water),
            "weight" | "body_weight" | "bodyweight" => Ok(ItemKind::Weight),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            other => Err(format!("unknown meal type: {other}")),
        }
    }
}

/// One loggable item segmented out of a message by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    /// Zero-based position of the item within its message.
    pub position: usize,
    pub kind: ItemKind,
    pub raw_quantity: Option<String>,
    pub raw_unit: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<MealType>,
}

/// Macronutrient totals. Per 100 g on a [`ResolvedFood`], absolute on a [`LogEntry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientProfile {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub fiber_g: f64,
}

impl NutrientProfile {
    /// Multiply every nutrient by `factor`, rounded to one decimal place.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |v: f64| ((v * factor) * 10.0).round() / 10.0;
        Self {
            calories: scale(self.calories),
            protein_g: scale(self.protein_g),
            carbs_g: scale(self.carbs_g),
            fat_g: scale(self.fat_g),
            fiber_g: scale(self.fiber_g),
        }
    }
}

impl Add for NutrientProfile {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            calories: self.calories + rhs.calories,
            protein_g: self.protein_g + rhs.protein_g,
            carbs_g: self.carbs_g + rhs.carbs_g,
            fat_g: self.fat_g + rhs.fat_g,
            fiber_g: self.fiber_g + rhs.fiber_g,
        }
    }
}

impl AddAssign for NutrientProfile {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// A food database record scored against a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFood {
    /// USDA FoodData Central id.
    pub fdc_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub per_100g: NutrientProfile,
    /// Typical mass of one item, used when the food is logged by count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portion_grams: Option<f64>,
    /// Density, used when the food is logged by volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grams_per_ml: Option<f64>,
    /// Match confidence in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalUnit {
    Grams,
    Milliliters,
    Count,
}

impl CanonicalUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            CanonicalUnit::Grams => "g",
            CanonicalUnit::Milliliters => "ml",
            CanonicalUnit::Count => "item",
        }
    }
}

/// A non-negative amount in a canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr")]
pub struct NormalizedQuantity {
    amount: f64,
    unit: CanonicalUnit,
}

#[derive(Deserialize)]
struct QuantityRepr {
    amount: f64,
    unit: CanonicalUnit,
}

impl TryFrom<QuantityRepr> for NormalizedQuantity {
    type Error = String;

    fn try_from(repr: QuantityRepr) -> Result<Self, Self::Error> {
        Self::new(repr.amount, repr.unit)
            .ok_or_else(|| format!("invalid quantity amount: {}", repr.amount))
    }
}

impl NormalizedQuantity {
    /// Returns `None` for negative or non-finite amounts.
    pub fn new(amount: f64, unit: CanonicalUnit) -> Option<Self> {
        if amount.is_finite() && amount >= 0.0 {
            Some(Self { amount, unit })
        } else {
            None
        }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn unit(&self) -> CanonicalUnit {
        self.unit
    }
}

impl fmt::Display for NormalizedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            CanonicalUnit::Count if self.amount == 1.0 => write!(f, "1 item"),
            CanonicalUnit::Count => write!(f, "{} items", self.amount),
            unit => write!(f, "{} {}", self.amount, unit.symbol()),
        }
    }
}

/// A durable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub user: String,
    pub kind: ItemKind,
    /// The user's own wording of the item.
    pub description: String,
    /// Name of the matched database record, for food.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_name: Option<String>,
    pub quantity: NormalizedQuantity,
    /// Nutrient totals for the logged quantity; absent for water and weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrients: Option<NutrientProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdc_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<MealType>,
    pub confidence: f64,
    /// Message this entry came from. Traceability only.
    pub source_message: Uuid,
    pub item_position: usize,
    /// When the user logged it (the message timestamp).
    pub logged_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationReason {
    /// Candidates exist but none is a clear winner.
    AmbiguousMatch,
    /// The food database had nothing similar enough.
    NoFoodMatch,
    /// The amount or unit could not be interpreted.
    UnparsableQuantity,
}

/// A deferred item awaiting the user's choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: Uuid,
    pub user: String,
    pub source_message: Uuid,
    pub logged_at: DateTime<Utc>,
    pub item: ExtractedItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<NormalizedQuantity>,
    pub candidates: Vec<ResolvedFood>,
    pub reason: ClarificationReason,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ClarificationRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether an answer can ever turn this request into an entry. A food
    /// with no candidates has nothing to choose from and must be logged again.
    pub fn is_answerable(&self) -> bool {
        self.item.kind != ItemKind::Food || !self.candidates.is_empty()
    }
}

/// Everything one ingestion call produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionResult {
    pub message_id: Uuid,
    pub entries: Vec<LogEntry>,
    pub clarifications: Vec<ClarificationRequest>,
    pub errors: Vec<ItemError>,
}

impl IngestionResult {
    pub fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            ..Default::default()
        }
    }

    /// The message had no loggable content. Not an error.
    pub fn no_items_found(&self) -> bool {
        self.entries.is_empty() && self.clarifications.is_empty() && self.errors.is_empty()
    }

    /// Nothing could be logged or clarified.
    pub fn is_total_failure(&self) -> bool {
        self.entries.is_empty() && self.clarifications.is_empty() && !self.errors.is_empty()
    }
}
