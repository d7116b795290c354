//! Plain-text replies for the terminal.

use std::fmt::Write as _;

use forge_core::config::BodyWeightUnit;
use forge_core::summary::DailySummary;
use forge_core::types::{
    ClarificationReason, ClarificationRequest, IngestionResult, ItemKind, LogEntry,
};

pub const COULD_NOT_UNDERSTAND: &str =
    "Sorry, I couldn't understand that message. Try something like \"I had 2 eggs and a glass of water\".";

pub const NOTHING_TO_LOG: &str = "Nothing to log in that message.";

fn format_weight(grams: f64, unit: BodyWeightUnit) -> String {
    let value = grams / unit.grams_per_unit();
    format!("{:.1} {}", value, unit.symbol())
}

/// One line describing a logged entry.
pub fn entry_line(entry: &LogEntry, weight_unit: BodyWeightUnit) -> String {
    match entry.kind {
        ItemKind::Water => format!("{} water", entry.quantity),
        ItemKind::Weight => format!("weight {}", format_weight(entry.quantity.amount(), weight_unit)),
        ItemKind::Food => {
            let mut line = format!("{} {}", entry.quantity, entry.description);
            if let Some(name) = &entry.food_name {
                let _ = write!(line, " ({name})");
            }
            if let Some(n) = entry.nutrients {
                let _ = write!(line, ": {} kcal, {}g protein", n.calories, n.protein_g);
            }
            line
        }
    }
}

/// The question to put to the user for a pending clarification.
pub fn clarification_prompt(request: &ClarificationRequest) -> String {
    let what = &request.item.description;
    let mut out = match request.reason {
        ClarificationReason::AmbiguousMatch => format!("Which \"{what}\" did you mean?"),
        ClarificationReason::NoFoodMatch => {
            format!("I couldn't find \"{what}\" in the food database.")
        }
        ClarificationReason::UnparsableQuantity => format!("How much {what} was that?"),
    };

    for (i, candidate) in request.candidates.iter().enumerate() {
        let _ = write!(
            out,
            "\n  {}. {} ({:.0}% match, {} kcal/100g)",
            i + 1,
            candidate.name,
            candidate.confidence * 100.0,
            candidate.per_100g.calories
        );
    }

    let hint = match request.reason {
        ClarificationReason::AmbiguousMatch => "forge clarify {id} --choice <n>",
        ClarificationReason::NoFoodMatch => "log it again with a different description",
        ClarificationReason::UnparsableQuantity => "forge clarify {id} --amount <n> --unit <unit>",
    };
    let _ = write!(out, "\n  -> {}", hint.replace("{id}", &request.id.to_string()));
    out
}

/// Full reply to one ingested message.
pub fn ingestion_reply(result: &IngestionResult, weight_unit: BodyWeightUnit) -> String {
    if result.no_items_found() {
        return NOTHING_TO_LOG.to_string();
    }
    if result.is_total_failure() {
        return COULD_NOT_UNDERSTAND.to_string();
    }

    let mut lines: Vec<String> = result
        .entries
        .iter()
        .map(|e| format!("Logged: {}", entry_line(e, weight_unit)))
        .collect();
    lines.extend(result.clarifications.iter().map(clarification_prompt));
    lines.extend(
        result
            .errors
            .iter()
            .map(|e| format!("Skipped \"{}\": {}", e.item.description, e.failure)),
    );
    lines.join("\n")
}

pub fn summary_reply(summary: &DailySummary, weight_unit: BodyWeightUnit) -> String {
    let t = &summary.totals;
    let mut out = format!("Today's summary ({})", summary.date.format("%b %d"));
    let _ = write!(out, "\n  Calories: {:.0}", t.calories);
    let _ = write!(
        out,
        "\n  Protein: {:.0}g  Carbs: {:.0}g  Fat: {:.0}g  Fiber: {:.0}g",
        t.protein_g, t.carbs_g, t.fat_g, t.fiber_g
    );
    let _ = write!(out, "\n  Water: {:.0} ml", summary.water_ml);
    if let Some(grams) = summary.latest_weight_grams {
        let _ = write!(out, "\n  Weight: {}", format_weight(grams, weight_unit));
    }
    let _ = write!(out, "\n  Entries: {}", summary.entry_count);
    out
}

/// One line per day, most recent first.
pub fn week_reply(days: &[DailySummary]) -> String {
    let mut out = String::from("This week's progress");
    for day in days {
        let _ = write!(
            out,
            "\n  {}: {:.0} kcal | {:.0}g protein | {:.0} ml water",
            day.date.format("%a %b %d"),
            day.totals.calories,
            day.totals.protein_g,
            day.water_ml
        );
    }
    out
}

pub fn deleted_reply(entry: &LogEntry, weight_unit: BodyWeightUnit) -> String {
    format!("Deleted: {}", entry_line(entry, weight_unit))
}
