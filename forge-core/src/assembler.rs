//! Log assembly: turns a normalized, resolved item into a log entry, or defers
//! it as a clarification request when the match is not confident enough.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{ItemError, ItemFailure};
use crate::normalizer::NormalizeError;
use crate::types::{
    CanonicalUnit, ClarificationReason, ClarificationRequest, ExtractedItem, ItemKind, LogEntry,
    NormalizedQuantity, RawMessage, ResolvedFood,
};

/// Mass assumed for one item of a food with no known portion size.
pub const DEFAULT_PORTION_GRAMS: f64 = 100.0;
/// Density assumed for a food with no known density (water).
pub const DEFAULT_GRAMS_PER_ML: f64 = 1.0;

/// Tolerance so a lead of exactly the margin is not lost to float error.
const MARGIN_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClarifyError {
    #[error("No pending clarification {0}")]
    NotFound(Uuid),

    #[error("Clarification {0} has expired; please log the item again")]
    Expired(Uuid),

    #[error("Choice {choice} is out of range (1-{available})")]
    InvalidChoice { choice: usize, available: usize },

    #[error("Several foods match; a choice is required")]
    MissingChoice,

    #[error("No matching foods to choose from; please log the item again with a different description")]
    NoCandidates,

    #[error("A quantity is required to log this item")]
    MissingQuantity,

    #[error("A quantity in {unit:?} cannot be logged as {kind}")]
    IncompatibleQuantity { unit: CanonicalUnit, kind: ItemKind },
}

/// The user's answer to a clarification request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClarificationChoice {
    /// Zero-based index into the request's candidates.
    pub candidate: Option<usize>,
    /// Replaces the request's quantity, required when it did not parse.
    pub quantity: Option<NormalizedQuantity>,
}

/// What became of one extracted item.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    Entry(LogEntry),
    Clarification(ClarificationRequest),
    Failed(ItemError),
}

#[derive(Debug, Clone)]
pub struct LogAssembler {
    acceptance_threshold: f64,
    acceptance_margin: f64,
    max_candidates: usize,
    clarification_ttl: chrono::Duration,
}

impl LogAssembler {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            acceptance_margin: config.acceptance_margin,
            max_candidates: config.clarification_candidates,
            clarification_ttl: config.clarification_ttl,
        }
    }

    /// Whether the top candidate is confident enough to log without asking.
    ///
    /// `candidates` must be sorted most confident first.
    pub fn accepts(&self, candidates: &[ResolvedFood]) -> bool {
        let Some(top) = candidates.first() else {
            return false;
        };
        let lead = match candidates.get(1) {
            Some(second) => top.confidence - second.confidence,
            None => top.confidence,
        };
        top.confidence >= self.acceptance_threshold
            && lead + MARGIN_EPSILON >= self.acceptance_margin
    }

    /// Combine one item's normalization and resolution results.
    ///
    /// Water and weight become entries whenever their quantity normalized.
    /// Food becomes an entry only when [`accepts`](Self::accepts) holds.
    pub fn assemble(
        &self,
        message: &RawMessage,
        item: ExtractedItem,
        quantity: Result<NormalizedQuantity, NormalizeError>,
        candidates: Vec<ResolvedFood>,
        now: DateTime<Utc>,
    ) -> Assembled {
        let quantity = match quantity {
            Ok(quantity) => quantity,
            Err(NormalizeError::UnparsableQuantity(_)) => {
                return Assembled::Clarification(self.clarification(
                    message,
                    item,
                    None,
                    candidates,
                    ClarificationReason::UnparsableQuantity,
                    now,
                ));
            }
            Err(NormalizeError::IncompatibleUnit { unit, kind }) => {
                return Assembled::Failed(ItemError {
                    item,
                    failure: ItemFailure::IncompatibleUnit { unit, kind },
                });
            }
        };

        let origin = Origin {
            user: &message.sender,
            source_message: message.id,
            logged_at: message.received_at,
        };

        match item.kind {
            ItemKind::Water | ItemKind::Weight => {
                Assembled::Entry(build_entry(&origin, item, quantity, None, 1.0, now))
            }
            ItemKind::Food if candidates.is_empty() => Assembled::Clarification(self.clarification(
                message,
                item,
                Some(quantity),
                candidates,
                ClarificationReason::NoFoodMatch,
                now,
            )),
            ItemKind::Food if self.accepts(&candidates) => {
                let top = &candidates[0];
                Assembled::Entry(build_entry(
                    &origin,
                    item,
                    quantity,
                    Some(top),
                    top.confidence,
                    now,
                ))
            }
            ItemKind::Food => Assembled::Clarification(self.clarification(
                message,
                item,
                Some(quantity),
                candidates,
                ClarificationReason::AmbiguousMatch,
                now,
            )),
        }
    }

    /// Build the final entry for an answered clarification. Confidence is 1.0:
    /// the user chose.
    pub fn resolve_clarification(
        &self,
        request: &ClarificationRequest,
        choice: ClarificationChoice,
        now: DateTime<Utc>,
    ) -> Result<LogEntry, ClarifyError> {
        if request.is_expired(now) {
            return Err(ClarifyError::Expired(request.id));
        }

        let quantity = choice
            .quantity
            .or(request.quantity)
            .ok_or(ClarifyError::MissingQuantity)?;
        check_quantity_kind(quantity, request.item.kind)?;

        let food = match request.item.kind {
            ItemKind::Food => Some(pick_candidate(&request.candidates, choice.candidate)?),
            ItemKind::Water | ItemKind::Weight => None,
        };

        let origin = Origin {
            user: &request.user,
            source_message: request.source_message,
            logged_at: request.logged_at,
        };
        Ok(build_entry(
            &origin,
            request.item.clone(),
            quantity,
            food,
            1.0,
            now,
        ))
    }

    fn clarification(
        &self,
        message: &RawMessage,
        item: ExtractedItem,
        quantity: Option<NormalizedQuantity>,
        mut candidates: Vec<ResolvedFood>,
        reason: ClarificationReason,
        now: DateTime<Utc>,
    ) -> ClarificationRequest {
        candidates.truncate(self.max_candidates);
        ClarificationRequest {
            id: Uuid::new_v4(),
            user: message.sender.clone(),
            source_message: message.id,
            logged_at: message.received_at,
            item,
            quantity,
            candidates,
            reason,
            created_at: now,
            expires_at: now
                .checked_add_signed(self.clarification_ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Where an entry came from.
struct Origin<'a> {
    user: &'a str,
    source_message: Uuid,
    logged_at: DateTime<Utc>,
}

fn pick_candidate(
    candidates: &[ResolvedFood],
    choice: Option<usize>,
) -> Result<&ResolvedFood, ClarifyError> {
    match (choice, candidates) {
        (_, []) => Err(ClarifyError::NoCandidates),
        (Some(index), _) => candidates.get(index).ok_or(ClarifyError::InvalidChoice {
            choice: index + 1,
            available: candidates.len(),
        }),
        (None, [only]) => Ok(only),
        (None, _) => Err(ClarifyError::MissingChoice),
    }
}

fn check_quantity_kind(quantity: NormalizedQuantity, kind: ItemKind) -> Result<(), ClarifyError> {
    let compatible = match kind {
        ItemKind::Water => quantity.unit() == CanonicalUnit::Milliliters,
        ItemKind::Weight => quantity.unit() == CanonicalUnit::Grams,
        ItemKind::Food => true,
    };
    if compatible {
        Ok(())
    } else {
        Err(ClarifyError::IncompatibleQuantity {
            unit: quantity.unit(),
            kind,
        })
    }
}

/// Grams of food represented by a quantity.
pub fn grams_for(quantity: NormalizedQuantity, food: &ResolvedFood) -> f64 {
    match quantity.unit() {
        CanonicalUnit::Grams => quantity.amount(),
        CanonicalUnit::Milliliters => {
            quantity.amount() * food.grams_per_ml.unwrap_or(DEFAULT_GRAMS_PER_ML)
        }
        CanonicalUnit::Count => {
            quantity.amount() * food.portion_grams.unwrap_or(DEFAULT_PORTION_GRAMS)
        }
    }
}

fn build_entry(
    origin: &Origin<'_>,
    item: ExtractedItem,
    quantity: NormalizedQuantity,
    food: Option<&ResolvedFood>,
    confidence: f64,
    now: DateTime<Utc>,
) -> LogEntry {
    LogEntry {
        id: Uuid::new_v4(),
        user: origin.user.to_string(),
        kind: item.kind,
        food_name: food.map(|f| f.name.clone()),
        quantity,
        nutrients: food.map(|f| f.per_100g.scaled(grams_for(quantity, f) / 100.0)),
        fdc_id: food.map(|f| f.fdc_id),
        meal_type: item.meal_type,
        confidence,
        source_message: origin.source_message,
        item_position: item.position,
        description: item.description,
        logged_at: origin.logged_at,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NutrientProfile;

    fn assembler() -> LogAssembler {
        LogAssembler::new(&IngestConfig::default())
    }

    fn item(kind: ItemKind, description: &str) -> ExtractedItem {
        ExtractedItem {
            position: 0,
            kind,
            raw_quantity: None,
            raw_unit: None,
            description: description.to_string(),
            meal_type: None,
        }
    }

    fn food(fdc_id: u64, confidence: f64) -> ResolvedFood {
        ResolvedFood {
            fdc_id,
            name: format!("food {fdc_id}"),
            brand: None,
            per_100g: NutrientProfile {
                calories: 52.0,
                protein_g: 0.3,
                carbs_g: 13.8,
                fat_g: 0.2,
                fiber_g: 2.4,
            },
            portion_grams: Some(182.0),
            grams_per_ml: None,
            confidence,
        }
    }

    fn count(n: f64) -> NormalizedQuantity {
        NormalizedQuantity::new(n, CanonicalUnit::Count).unwrap()
    }

    #[test]
    fn test_accepts_clear_winner() {
        let a = assembler();
        assert!(a.accepts(&[food(1, 1.0), food(2, 0.75)]));
        assert!(a.accepts(&[food(1, 0.8)]));
        // Exactly at the margin
        assert!(a.accepts(&[food(1, 0.9), food(2, 0.75)]));
    }

    #[test]
    fn test_rejects_close_or_weak() {
        let a = assembler();
        assert!(!a.accepts(&[food(1, 0.9), food(2, 0.8)]));
        assert!(!a.accepts(&[food(1, 0.7)]));
        assert!(!a.accepts(&[]));
    }

    #[test]
    fn test_food_entry_scaled_by_portion() {
        let message = RawMessage::new("u1", "an apple");
        let result = assembler().assemble(
            &message,
            item(ItemKind::Food, "apple"),
            Ok(count(1.0)),
            vec![food(171688, 1.0), food(2, 0.75)],
            Utc::now(),
        );
        let Assembled::Entry(entry) = result else {
            panic!("expected entry");
        };
        assert_eq!(entry.fdc_id, Some(171688));
        assert_eq!(entry.nutrients.unwrap().calories, 94.6);
        assert_eq!(entry.source_message, message.id);
        assert_eq!(entry.logged_at, message.received_at);
    }

    #[test]
    fn test_ambiguous_becomes_clarification_with_top_three() {
        let result = assembler().assemble(
            &RawMessage::new("u1", "milk"),
            item(ItemKind::Food, "milk"),
            Ok(count(1.0)),
            vec![food(1, 0.8), food(2, 0.8), food(3, 0.7), food(4, 0.6)],
            Utc::now(),
        );
        let Assembled::Clarification(request) = result else {
            panic!("expected clarification");
        };
        assert_eq!(request.reason, ClarificationReason::AmbiguousMatch);
        assert_eq!(request.candidates.len(), 3);
        assert_eq!(request.expires_at - request.created_at, chrono::Duration::hours(24));
    }

    #[test]
    fn test_clarification_expiry_saturates() {
        let config = IngestConfig {
            clarification_ttl: chrono::Duration::weeks(1_000_000_000),
            ..IngestConfig::default()
        };
        let result = LogAssembler::new(&config).assemble(
            &RawMessage::new("u1", "milk"),
            item(ItemKind::Food, "milk"),
            Ok(count(1.0)),
            vec![food(1, 0.8), food(2, 0.8)],
            Utc::now(),
        );
        let Assembled::Clarification(request) = result else {
            panic!("expected clarification");
        };
        assert_eq!(request.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_no_candidates_is_no_food_match() {
        let result = assembler().assemble(
            &RawMessage::new("u1", "coffee"),
            item(ItemKind::Food, "coffee"),
            Ok(count(1.0)),
            vec![],
            Utc::now(),
        );
        let Assembled::Clarification(request) = result else {
            panic!("expected clarification");
        };
        assert_eq!(request.reason, ClarificationReason::NoFoodMatch);
        assert!(!request.is_answerable());
        assert!(pending(vec![food(1, 0.8)], None).is_answerable());
    }

    #[test]
    fn test_unparsable_quantity_keeps_candidates() {
        let result = assembler().assemble(
            &RawMessage::new("u1", "lots of apple"),
            item(ItemKind::Food, "apple"),
            Err(NormalizeError::UnparsableQuantity("lots".to_string())),
            vec![food(1, 1.0)],
            Utc::now(),
        );
        let Assembled::Clarification(request) = result else {
            panic!("expected clarification");
        };
        assert_eq!(request.reason, ClarificationReason::UnparsableQuantity);
        assert_eq!(request.candidates.len(), 1);
        assert!(request.quantity.is_none());
    }

    #[test]
    fn test_incompatible_unit_fails_item() {
        let result = assembler().assemble(
            &RawMessage::new("u1", "3 slices of water"),
            item(ItemKind::Water, "water"),
            Err(NormalizeError::IncompatibleUnit {
                unit: "slices".to_string(),
                kind: ItemKind::Water,
            }),
            vec![],
            Utc::now(),
        );
        assert!(matches!(result, Assembled::Failed(_)));
    }

    #[test]
    fn test_water_always_entry() {
        let quantity = NormalizedQuantity::new(710.0, CanonicalUnit::Milliliters).unwrap();
        let result = assembler().assemble(
            &RawMessage::new("u1", "24oz water"),
            item(ItemKind::Water, "water"),
            Ok(quantity),
            vec![],
            Utc::now(),
        );
        let Assembled::Entry(entry) = result else {
            panic!("expected entry");
        };
        assert_eq!(entry.quantity, quantity);
        assert!(entry.nutrients.is_none());
        assert_eq!(entry.confidence, 1.0);
    }

    #[test]
    fn test_grams_for_volume_and_defaults() {
        let mut milk = food(1, 1.0);
        milk.grams_per_ml = Some(1.03);
        let cup = NormalizedQuantity::new(237.0, CanonicalUnit::Milliliters).unwrap();
        assert!((grams_for(cup, &milk) - 244.11).abs() < 1e-9);

        let mut unknown = food(2, 1.0);
        unknown.portion_grams = None;
        assert_eq!(grams_for(count(2.0), &unknown), 200.0);
    }

    fn pending(candidates: Vec<ResolvedFood>, quantity: Option<NormalizedQuantity>) -> ClarificationRequest {
        let now = Utc::now();
        ClarificationRequest {
            id: Uuid::new_v4(),
            user: "u1".to_string(),
            source_message: Uuid::new_v4(),
            logged_at: now,
            item: item(ItemKind::Food, "milk"),
            quantity,
            candidates,
            reason: ClarificationReason::AmbiguousMatch,
            created_at: now,
            expires_at: now + chrono::Duration::hours(24),
        }
    }

    #[test]
    fn test_resolved_clarification_has_full_confidence() {
        let request = pending(vec![food(1, 0.8), food(2, 0.8)], Some(count(1.0)));
        let entry = assembler()
            .resolve_clarification(
                &request,
                ClarificationChoice {
                    candidate: Some(1),
                    quantity: None,
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(entry.confidence, 1.0);
        assert_eq!(entry.fdc_id, Some(2));
        assert_eq!(entry.source_message, request.source_message);
    }

    #[test]
    fn test_clarification_errors() {
        let a = assembler();
        let request = pending(vec![food(1, 0.8), food(2, 0.8)], Some(count(1.0)));

        let err = a
            .resolve_clarification(&request, ClarificationChoice::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, ClarifyError::MissingChoice);

        let out_of_range = ClarificationChoice {
            candidate: Some(5),
            quantity: None,
        };
        assert!(matches!(
            a.resolve_clarification(&request, out_of_range, Utc::now()),
            Err(ClarifyError::InvalidChoice { choice: 6, available: 2 })
        ));

        let later = request.expires_at + chrono::Duration::seconds(1);
        assert!(matches!(
            a.resolve_clarification(&request, ClarificationChoice::default(), later),
            Err(ClarifyError::Expired(_))
        ));

        let no_quantity = pending(vec![food(1, 0.8)], None);
        assert_eq!(
            a.resolve_clarification(&no_quantity, ClarificationChoice::default(), Utc::now()),
            Err(ClarifyError::MissingQuantity)
        );
    }

    #[test]
    fn test_single_candidate_needs_no_choice() {
        let request = pending(vec![food(7, 0.5)], None);
        let entry = assembler()
            .resolve_clarification(
                &request,
                ClarificationChoice {
                    candidate: None,
                    quantity: Some(count(2.0)),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(entry.fdc_id, Some(7));
        assert_eq!(entry.nutrients.unwrap().calories, 189.3);
    }
}
