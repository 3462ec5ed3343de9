use clap::Args;
use moodsync_core::models::DEFAULT_NEARBY_KM;
use moodsync_core::{Coordinate, MoodCategory, MoodFilter, TimePeriod, Visibility};

use super::{entry_summary, OutputFormat};
use crate::device::Device;

/// List recorded moods, newest first
#[derive(Args)]
pub struct HistoryCommand {
    /// Time window (all, last-week, last-month, last-year)
    #[arg(long, short, default_value = "all")]
    pub period: TimePeriod,

    /// Only these moods (can be repeated)
    #[arg(long = "mood", short = 'm', value_name = "MOOD")]
    pub moods: Vec<MoodCategory>,

    /// Only entries whose trigger contains this text
    #[arg(long, short)]
    pub trigger: Option<String>,

    /// Only entries near this latitude
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Only entries near this longitude
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Only public or only private entries
    #[arg(long)]
    pub visibility: Option<Visibility>,

    /// Radius for --lat/--lon in kilometers
    #[arg(long, default_value_t = DEFAULT_NEARBY_KM)]
    pub radius_km: f64,

    /// Show at most this many entries
    #[arg(long, short)]
    pub limit: Option<usize>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl HistoryCommand {
    fn filter(&self) -> MoodFilter {
        let mut filter = MoodFilter::new()
            .with_period(self.period)
            .with_moods(self.moods.clone());
        if let Some(query) = &self.trigger {
            filter = filter.with_trigger_query(query);
        }
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            filter = filter.near(Coordinate::new(lat, lon), self.radius_km);
        }
        if let Some(visibility) = self.visibility {
            filter = filter.with_visibility(visibility);
        }
        filter
    }

    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let mut entries = device.journal.history(&self.filter()).await?;
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            OutputFormat::Text => {
                if entries.is_empty() {
                    println!("No moods recorded for this filter.");
                    return Ok(());
                }
                for entry in &entries {
                    println!("{}", entry_summary(entry));
                }
                println!();
                println!(
                    "{} entr{}",
                    entries.len(),
                    if entries.len() == 1 { "y" } else { "ies" }
                );
            }
        }
        Ok(())
    }
}
