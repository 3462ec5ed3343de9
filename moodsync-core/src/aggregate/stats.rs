use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use super::time_series::TimeRange;
use crate::models::{MoodCategory, MoodEntry};

/// Summary of one calendar month (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub year: i32,
    pub month: u32,
    pub total: usize,
    pub breakdown: BTreeMap<MoodCategory, usize>,
    pub top_mood: Option<MoodCategory>,
    /// Day of month with the most entries.
    pub most_active_day: Option<u32>,
    pub average_per_day: f64,
    /// Share of the month's days with at least one entry, in percent.
    pub consistency: f64,
    pub triggers: BTreeMap<String, usize>,
    pub social_situations: BTreeMap<String, usize>,
    /// 100 minus the share of consecutive entries that changed mood, in percent.
    pub stability: f64,
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

/// The month's live entries ordered by creation time.
fn in_month<'a>(entries: &'a [MoodEntry], year: i32, month: u32) -> Vec<&'a MoodEntry> {
    let Some(range) = TimeRange::month(year, month) else {
        return Vec::new();
    };
    let mut selected: Vec<&MoodEntry> = entries
        .iter()
        .filter(|e| !e.deleted && range.contains(e.created_at))
        .collect();
    selected.sort_by_key(|e| (e.created_at, e.id));
    selected
}

/// Largest count wins; ties go to the smaller key.
fn argmax<K: Ord + Copy>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts
        .iter()
        .fold(None, |best: Option<(K, usize)>, (k, n)| match best {
            Some((_, m)) if m >= *n => best,
            _ => Some((*k, *n)),
        })
        .map(|(k, _)| k)
}

fn stability_of(moods: impl Iterator<Item = MoodCategory>) -> f64 {
    let moods: Vec<MoodCategory> = moods.collect();
    if moods.len() < 2 {
        return 100.0;
    }
    let transitions = moods.windows(2).filter(|w| w[0] != w[1]).count();
    (1.0 - transitions as f64 / (moods.len() - 1) as f64) * 100.0
}

/// Statistics for `year`/`month`, or `None` when the month has no entries.
pub fn monthly_stats(entries: &[MoodEntry], year: i32, month: u32) -> Option<MonthlyStats> {
    let selected = in_month(entries, year, month);
    if selected.is_empty() {
        return None;
    }
    let days = f64::from(days_in_month(year, month)?);

    let mut breakdown = BTreeMap::new();
    let mut per_day: BTreeMap<u32, usize> = BTreeMap::new();
    let mut triggers = BTreeMap::new();
    let mut social_situations = BTreeMap::new();
    for e in &selected {
        *breakdown.entry(e.mood).or_insert(0) += 1;
        *per_day.entry(e.created_at.day()).or_insert(0) += 1;
        if let Some(trigger) = e.trigger.as_deref().filter(|t| !t.is_empty()) {
            *triggers.entry(trigger.to_string()).or_insert(0) += 1;
        }
        if let Some(situation) = e.social_situation {
            *social_situations.entry(situation.to_string()).or_insert(0) += 1;
        }
    }

    Some(MonthlyStats {
        year,
        month,
        total: selected.len(),
        top_mood: argmax(&breakdown),
        most_active_day: argmax(&per_day),
        average_per_day: selected.len() as f64 / days,
        consistency: per_day.len() as f64 / days * 100.0,
        stability: stability_of(selected.iter().map(|e| e.mood)),
        breakdown,
        triggers,
        social_situations,
    })
}

/// Most frequent mood of each day in the month that has entries.
pub fn daily_dominant_mood(
    entries: &[MoodEntry],
    year: i32,
    month: u32,
) -> BTreeMap<u32, MoodCategory> {
    let mut per_day: BTreeMap<u32, BTreeMap<MoodCategory, usize>> = BTreeMap::new();
    for e in in_month(entries, year, month) {
        *per_day
            .entry(e.created_at.day())
            .or_default()
            .entry(e.mood)
            .or_insert(0) += 1;
    }
    per_day
        .into_iter()
        .filter_map(|(day, counts)| argmax(&counts).map(|mood| (day, mood)))
        .collect()
}
