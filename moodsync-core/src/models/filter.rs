use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::mood::{MoodCategory, Visibility};
use super::mood_entry::{Coordinate, MoodEntry};

/// Radius used for "nearby" filtering when none is given.
pub const DEFAULT_NEARBY_KM: f64 = 5.0;

/// Relative time window for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimePeriod {
    #[default]
    All,
    LastWeek,
    LastMonth,
    LastYear,
}

impl TimePeriod {
    /// Oldest creation time still inside the window, if bounded.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimePeriod::All => None,
            TimePeriod::LastWeek => Some(now - Duration::days(7)),
            TimePeriod::LastMonth => Some(now - Duration::days(30)),
            TimePeriod::LastYear => Some(now - Duration::days(365)),
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePeriod::All => write!(f, "all"),
            TimePeriod::LastWeek => write!(f, "last-week"),
            TimePeriod::LastMonth => write!(f, "last-month"),
            TimePeriod::LastYear => write!(f, "last-year"),
        }
    }
}

impl FromStr for TimePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '_'], "-").as_str() {
            "all" | "all-time" => Ok(TimePeriod::All),
            "week" | "last-week" => Ok(TimePeriod::LastWeek),
            "month" | "last-month" => Ok(TimePeriod::LastMonth),
            "year" | "last-year" => Ok(TimePeriod::LastYear),
            _ => Err(format!(
                "Invalid time period '{}'. Valid options: all, last-week, last-month, last-year",
                s
            )),
        }
    }
}

/// Criteria for selecting entries from the local store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoodFilter {
    pub period: TimePeriod,
    /// Empty means every category.
    pub moods: Vec<MoodCategory>,
    /// Case-insensitive substring of the trigger.
    pub trigger_query: Option<String>,
    /// Center and radius in kilometers.
    pub nearby: Option<(Coordinate, f64)>,
    pub visibility: Option<Visibility>,
}

impl MoodFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_period(mut self, period: TimePeriod) -> Self {
        self.period = period;
        self
    }

    pub fn with_moods(mut self, moods: Vec<MoodCategory>) -> Self {
        self.moods = moods;
        self
    }

    pub fn with_trigger_query(mut self, query: impl Into<String>) -> Self {
        self.trigger_query = Some(query.into());
        self
    }

    pub fn near(mut self, center: Coordinate, radius_km: f64) -> Self {
        self.nearby = Some((center, radius_km));
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn matches(&self, entry: &MoodEntry, now: DateTime<Utc>) -> bool {
        if entry.deleted {
            return false;
        }
        if let Some(cutoff) = self.period.cutoff(now) {
            if entry.created_at < cutoff {
                return false;
            }
        }
        if !self.moods.is_empty() && !self.moods.contains(&entry.mood) {
            return false;
        }
        if self.visibility.is_some_and(|v| v != entry.visibility) {
            return false;
        }
        if let Some(query) = self.trigger_query.as_deref().filter(|q| !q.is_empty()) {
            let query = query.to_lowercase();
            match &entry.trigger {
                Some(trigger) if trigger.to_lowercase().contains(&query) => {}
                _ => return false,
            }
        }
        if let Some((center, radius_km)) = &self.nearby {
            match &entry.coordinate {
                Some(coord) if coord.distance_m(center) <= radius_km * 1000.0 => {}
                _ => return false,
            }
        }
        true
    }
}
