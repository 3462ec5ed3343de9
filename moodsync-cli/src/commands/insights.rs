use chrono::{Datelike, Local, Utc};
use clap::Args;
use moodsync_core::{Aggregator, BoundingBox, Bucket, ChartPoint, GeoCluster, TimeRange};

use super::OutputFormat;
use crate::device::Device;

async fn aggregator(device: &Device) -> Result<Aggregator, Box<dyn std::error::Error>> {
    Ok(Aggregator::new(device.store.clone(), device.journal.owner()).await?)
}

/// Monthly recap
#[derive(Args)]
pub struct StatsCommand {
    /// Year (defaults to the current year)
    #[arg(long, short)]
    pub year: Option<i32>,

    /// Month 1-12 (defaults to the current month)
    #[arg(long, short, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl StatsCommand {
    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let today = Local::now().date_naive();
        let year = self.year.unwrap_or(today.year());
        let month = self.month.unwrap_or(today.month());

        let view = aggregator(device).await?.view();
        let Some(stats) = view.monthly_stats(year, month) else {
            println!("No moods recorded in {}-{:02}.", year, month);
            return Ok(());
        };

        if let OutputFormat::Json = self.format {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        println!("Mood recap for {}-{:02}", year, month);
        println!("=======================");
        println!();
        println!("Entries:        {}", stats.total);
        if let Some(top) = stats.top_mood {
            println!("Top mood:       {}", top);
        }
        if let Some(day) = stats.most_active_day {
            println!("Most active:    day {}", day);
        }
        println!("Per day:        {:.2}", stats.average_per_day);
        println!("Consistency:    {:.0}%", stats.consistency);
        println!("Stability:      {:.0}%", stats.stability);

        println!();
        println!("Breakdown:");
        for (mood, count) in &stats.breakdown {
            println!("  {:<10} {}", mood.as_str(), count);
        }
        if !stats.triggers.is_empty() {
            println!();
            println!("Triggers:");
            for (trigger, count) in &stats.triggers {
                println!("  {:<20} {}", trigger, count);
            }
        }
        if !stats.social_situations.is_empty() {
            println!();
            println!("Company:");
            for (situation, count) in &stats.social_situations {
                println!("  {:<10} {}", situation, count);
            }
        }

        let dominant = view.daily_dominant_mood(year, month);
        if !dominant.is_empty() {
            println!();
            println!("Calendar:");
            for (day, mood) in &dominant {
                println!("  {:>2}  {}", day, mood);
            }
        }
        Ok(())
    }
}

/// Mood score over time
#[derive(Args)]
pub struct ChartCommand {
    /// How many days back to chart
    #[arg(long, short, default_value_t = 30)]
    pub days: i64,

    /// Bucket size (day, week, month)
    #[arg(long, short, default_value = "day")]
    pub bucket: Bucket,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Bar of `#` for a score in -2..=2, centered at zero.
fn score_bar(score: f64) -> String {
    let width = (score.abs() * 5.0).round() as usize;
    if score < 0.0 {
        format!("{:>10}|", "#".repeat(width))
    } else {
        format!("{:>10}|{}", "", "#".repeat(width))
    }
}

impl ChartCommand {
    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let view = aggregator(device).await?.view();
        let range = TimeRange::last_days(Utc::now(), self.days.max(1));
        let series = view.compute_time_series(range, self.bucket);
        let points: Vec<ChartPoint> = series.iter().collect();

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&points)?),
            OutputFormat::Text => {
                if points.is_empty() {
                    println!("No moods recorded in the last {} days.", self.days);
                    return Ok(());
                }
                for point in &points {
                    println!(
                        "{}  {:+.2} ({:>3})  {}",
                        point.timestamp.format("%Y-%m-%d"),
                        point.score,
                        point.count,
                        score_bar(point.score)
                    );
                }
            }
        }
        Ok(())
    }
}

/// Where moods were recorded, clustered for a map
#[derive(Args)]
pub struct MapCommand {
    /// Zoom level; each level halves the cell size
    #[arg(long, short, default_value_t = 10)]
    pub zoom: u8,

    /// Bounding box as south,west,north,east (defaults to the whole world)
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
    pub bbox: Option<Vec<f64>>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl MapCommand {
    fn bounding_box(&self) -> Result<BoundingBox, String> {
        match self.bbox.as_deref() {
            None => Ok(BoundingBox::world()),
            Some(&[south, west, north, east]) if south <= north && west <= east => {
                Ok(BoundingBox::new(south, west, north, east))
            }
            Some(_) => Err(
                "Bounding box must be south,west,north,east with south <= north and west <= east"
                    .into(),
            ),
        }
    }

    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let bbox = self.bounding_box()?;
        let view = aggregator(device).await?.view();
        let clusters: Vec<GeoCluster> = view.compute_geo_clusters(&bbox, self.zoom);

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
            OutputFormat::Text => {
                if clusters.is_empty() {
                    println!("No geo-tagged moods in this area.");
                    return Ok(());
                }
                for c in &clusters {
                    println!(
                        "{:>9.5}, {:>10.5}  {:>4} entr{}  within {:.0} m",
                        c.centroid.latitude,
                        c.centroid.longitude,
                        c.count,
                        if c.count == 1 { "y" } else { "ies" },
                        c.radius_m
                    );
                }
            }
        }
        Ok(())
    }
}
