use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::MoodEntry;

/// Half-open interval `[start, end)` of creation times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `now`, reaching back no further than the
    /// earliest representable time.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        let start = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, now)
    }

    /// A calendar month in UTC. `None` for an invalid month.
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Self::new(midnight(first), midnight(next)))
    }

    /// Everything.
    pub fn all() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Width of one chart point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    #[default]
    Day,
    /// ISO weeks, starting Monday.
    Week,
    Month,
}

impl Bucket {
    /// Start of the bucket containing `at`.
    pub fn start_of(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Bucket::Day => date,
            Bucket::Week => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Bucket::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        midnight(start)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Day => write!(f, "day"),
            Bucket::Week => write!(f, "week"),
            Bucket::Month => write!(f, "month"),
        }
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(Bucket::Day),
            "week" | "weekly" => Ok(Bucket::Week),
            "month" | "monthly" => Ok(Bucket::Month),
            _ => Err(format!("Invalid bucket '{}'. Valid options: day, week, month", s)),
        }
    }
}

/// One chart point: the mean mood score of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub count: usize,
}

/// Mean mood score per bucket over a range.
///
/// Nothing is computed until iterated, and every call to [`TimeSeries::iter`]
/// starts over from the first bucket. Empty buckets are skipped.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    /// Live entries sorted by creation time.
    entries: Arc<Vec<MoodEntry>>,
    range: TimeRange,
    bucket: Bucket,
}

impl TimeSeries {
    pub(crate) fn new(entries: Arc<Vec<MoodEntry>>, range: TimeRange, bucket: Bucket) -> Self {
        Self {
            entries,
            range,
            bucket,
        }
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn iter(&self) -> TimeSeriesIter<'_> {
        let first = self
            .entries
            .partition_point(|e| e.created_at < self.range.start);
        TimeSeriesIter {
            series: self,
            next: first,
        }
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = ChartPoint;
    type IntoIter = TimeSeriesIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct TimeSeriesIter<'a> {
    series: &'a TimeSeries,
    next: usize,
}

impl Iterator for TimeSeriesIter<'_> {
    type Item = ChartPoint;

    fn next(&mut self) -> Option<ChartPoint> {
        let entries = &self.series.entries;
        let first = entries.get(self.next)?;
        if !self.series.range.contains(first.created_at) {
            return None;
        }

        let timestamp = self.series.bucket.start_of(first.created_at);
        let mut total = 0.0;
        let mut count = 0;
        while let Some(entry) = entries.get(self.next) {
            if !self.series.range.contains(entry.created_at)
                || self.series.bucket.start_of(entry.created_at) != timestamp
            {
                break;
            }
            total += entry.mood.score();
            count += 1;
            self.next += 1;
        }

        Some(ChartPoint {
            timestamp,
            score: total / count as f64,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_id::EntryId;
    use crate::models::MoodCategory;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn entry(n: u8, mood: MoodCategory, created_at: DateTime<Utc>) -> MoodEntry {
        MoodEntry::new(EntryId::from_bytes([n; 16]), "alice", mood, created_at)
    }

    fn series(range: TimeRange, bucket: Bucket) -> TimeSeries {
        let entries = vec![
            entry(1, MoodCategory::Happiness, at(2024, 3, 4, 9)),
            entry(2, MoodCategory::Sadness, at(2024, 3, 4, 18)),
            entry(3, MoodCategory::Surprise, at(2024, 3, 6, 12)),
            entry(4, MoodCategory::Anger, at(2024, 4, 1, 8)),
        ];
        TimeSeries::new(Arc::new(entries), range, bucket)
    }

    #[test]
    fn test_daily_means() {
        let points: Vec<_> = series(TimeRange::all(), Bucket::Day).iter().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, at(2024, 3, 4, 0));
        assert_eq!(points[0].score, 0.0);
        assert_eq!(points[0].count, 2);
        assert_eq!(points[1].score, 1.0);
        assert_eq!(points[2].score, -2.0);
    }

    #[test]
    fn test_weekly_buckets_start_monday() {
        let points: Vec<_> = series(TimeRange::all(), Bucket::Week).iter().collect();
        // 2024-03-04 is a Monday; 2024-04-01 is too
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, at(2024, 3, 4, 0));
        assert_eq!(points[0].count, 3);
        assert_eq!(points[1].timestamp, at(2024, 4, 1, 0));
    }

    #[test]
    fn test_range_limits_points() {
        let march = TimeRange::month(2024, 3).unwrap();
        let points: Vec<_> = series(march, Bucket::Month).iter().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].count, 3);
        assert!((points[0].score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_iteration_restarts() {
        let s = series(TimeRange::all(), Bucket::Day);
        let first: Vec<_> = s.iter().collect();
        let mut it = s.iter();
        it.next();
        let again: Vec<_> = s.iter().collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_last_days_saturates() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let week = TimeRange::last_days(now, 7);
        assert_eq!(week.start, Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap());
        assert_eq!(week.end, now);

        let huge = TimeRange::last_days(now, 100_000_000);
        assert_eq!(huge.start, DateTime::<Utc>::MIN_UTC);
        assert!(huge.contains(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()));

        let beyond = TimeRange::last_days(now, i64::MAX);
        assert_eq!(beyond.start, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_month_range_wraps_year() {
        let dec = TimeRange::month(2024, 12).unwrap();
        assert_eq!(dec.end, at(2025, 1, 1, 0));
        assert!(TimeRange::month(2024, 13).is_none());
    }
}
