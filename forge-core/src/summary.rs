//! Per-day totals for a user, with day boundaries in a local time zone.

use std::iter;

use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::store::{LogStore, StoreError};
use crate::types::{CanonicalUnit, ItemKind, LogEntry, NutrientProfile};

/// Days covered by [`weekly_summary`].
pub const WEEK_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub totals: NutrientProfile,
    pub water_ml: f64,
    /// Most recent weigh-in of the day, in grams.
    pub latest_weight_grams: Option<f64>,
    pub entry_count: usize,
}

/// UTC instant at which the local day `date` starts.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST jump; the day starts when the clock resumes.
        LocalResult::None => {
            let later = naive + Duration::hours(1);
            match tz.from_local_datetime(&later).earliest() {
                Some(dt) => dt.with_timezone(&Utc) - Duration::hours(1),
                None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

/// Half-open `[start, end)` UTC bounds of a local calendar day.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
    (local_midnight(date, tz), local_midnight(next, tz))
}

/// The local calendar date at `now`.
pub fn local_today(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Aggregate already-filtered entries into a summary for `date`.
pub fn summarize(date: NaiveDate, entries: &[LogEntry]) -> DailySummary {
    let mut summary = DailySummary {
        date,
        totals: NutrientProfile::default(),
        water_ml: 0.0,
        latest_weight_grams: None,
        entry_count: entries.len(),
    };
    let mut latest_weight: Option<&LogEntry> = None;

    for entry in entries {
        match entry.kind {
            ItemKind::Food => {
                if let Some(nutrients) = entry.nutrients {
                    summary.totals += nutrients;
                }
            }
            ItemKind::Water => {
                if entry.quantity.unit() == CanonicalUnit::Milliliters {
                    summary.water_ml += entry.quantity.amount();
                }
            }
            ItemKind::Weight => {
                if latest_weight.map_or(true, |w| entry.logged_at >= w.logged_at) {
                    latest_weight = Some(entry);
                }
            }
        }
    }

    summary.totals = summary.totals.scaled(1.0);
    summary.water_ml = summary.water_ml.round();
    summary.latest_weight_grams = latest_weight.map(|w| w.quantity.amount());
    summary
}

/// Load and summarize a user's entries for the local day `date`.
pub async fn daily_summary(
    store: &dyn LogStore,
    user: &str,
    date: NaiveDate,
    tz: Tz,
) -> Result<DailySummary, StoreError> {
    let (start, end) = day_bounds(date, tz);
    let entries = store.entries_between(user, start, end).await?;
    tracing::debug!(%user, %date, entries = entries.len(), "Summarizing day");
    Ok(summarize(date, &entries))
}

/// Summaries for the [`WEEK_DAYS`] local days ending on `end_date`, most
/// recent first. Days with nothing logged are included with zero totals.
pub async fn weekly_summary(
    store: &dyn LogStore,
    user: &str,
    end_date: NaiveDate,
    tz: Tz,
) -> Result<Vec<DailySummary>, StoreError> {
    let days: Vec<NaiveDate> = iter::successors(Some(end_date), |d| d.pred_opt())
        .take(WEEK_DAYS)
        .collect();
    let first = days.last().copied().unwrap_or(end_date);
    let (start, _) = day_bounds(first, tz);
    let (_, end) = day_bounds(end_date, tz);

    let entries = store.entries_between(user, start, end).await?;
    tracing::debug!(%user, %end_date, entries = entries.len(), "Summarizing week");

    Ok(days
        .into_iter()
        .map(|day| {
            let (from, to) = day_bounds(day, tz);
            let in_day: Vec<LogEntry> = entries
                .iter()
                .filter(|e| e.logged_at >= from && e.logged_at < to)
                .cloned()
                .collect();
            summarize(day, &in_day)
        })
        .collect())
}
