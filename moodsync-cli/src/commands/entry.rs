use clap::Args;
use moodsync_core::{
    stage_attachment, Coordinate, EntryId, MoodCategory, SocialSituation, Visibility,
};
use std::path::PathBuf;

use super::attach::read_photo;
use super::{print_entry_details, OutputFormat};
use crate::device::Device;

/// Record how you feel right now
#[derive(Args)]
pub struct LogCommand {
    /// Mood (anger, confusion, disgust, fear, happiness, sadness, shame, surprise)
    pub mood: MoodCategory,

    /// Free-text note
    #[arg(long, short)]
    pub note: Option<String>,

    /// What caused the mood (at most 20 characters)
    #[arg(long, short)]
    pub trigger: Option<String>,

    /// Who was around (alone, one-person, two-people, crowd)
    #[arg(long = "with", value_name = "SITUATION")]
    pub social_situation: Option<SocialSituation>,

    /// Latitude in degrees
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude in degrees
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Name of the place
    #[arg(long)]
    pub place: Option<String>,

    /// Hide the entry from followers
    #[arg(long)]
    pub private: bool,

    /// Attach a photo
    #[arg(long)]
    pub photo: Option<PathBuf>,
}

impl LogCommand {
    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let mut draft = device.journal.draft(self.mood);
        if let Some(note) = &self.note {
            draft = draft.with_note(note);
        }
        if let Some(trigger) = &self.trigger {
            draft = draft.with_trigger(trigger);
        }
        if let Some(situation) = self.social_situation {
            draft = draft.with_social_situation(situation);
        }
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            draft = draft.with_coordinate(lat, lon);
        }
        if let Some(place) = &self.place {
            draft = draft.with_place_name(place);
        }
        if self.private {
            draft = draft.with_visibility(Visibility::Private);
        }

        // Read the photo first so a bad path records nothing
        let photo = self.photo.as_deref().map(read_photo).transpose()?;

        let entry = device.journal.record(draft).await?;
        if let Some((content_type, data)) = photo {
            stage_attachment(&device.store, entry.id, content_type, &data).await?;
        }

        let entry = device.journal.get(entry.id).await?.unwrap_or(entry);
        println!("Recorded mood:");
        println!();
        print_entry_details(&entry);
        Ok(())
    }
}

/// Change a recorded entry
#[derive(Args)]
pub struct EditCommand {
    /// Entry ID
    pub id: EntryId,

    #[arg(long, short)]
    pub mood: Option<MoodCategory>,

    #[arg(long, short)]
    pub note: Option<String>,

    #[arg(long, short)]
    pub trigger: Option<String>,

    #[arg(long = "with", value_name = "SITUATION")]
    pub social_situation: Option<SocialSituation>,

    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    #[arg(long)]
    pub place: Option<String>,

    #[arg(long)]
    pub visibility: Option<Visibility>,

    /// Remove the note
    #[arg(long, conflicts_with = "note")]
    pub clear_note: bool,

    /// Remove the location
    #[arg(long, conflicts_with_all = ["lat", "place"])]
    pub clear_location: bool,
}

impl EditCommand {
    fn has_changes(&self) -> bool {
        self.mood.is_some()
            || self.note.is_some()
            || self.trigger.is_some()
            || self.social_situation.is_some()
            || self.lat.is_some()
            || self.place.is_some()
            || self.visibility.is_some()
            || self.clear_note
            || self.clear_location
    }

    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        if !self.has_changes() {
            return Err("Nothing to change. See 'mood edit --help'".into());
        }

        let entry = device
            .journal
            .edit(self.id, |entry| {
                if let Some(mood) = self.mood {
                    entry.mood = mood;
                }
                if let Some(note) = &self.note {
                    entry.note = Some(note.clone());
                }
                if self.clear_note {
                    entry.note = None;
                }
                if let Some(trigger) = &self.trigger {
                    entry.trigger = Some(trigger.clone());
                }
                if let Some(situation) = self.social_situation {
                    entry.social_situation = Some(situation);
                }
                if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
                    entry.coordinate = Some(Coordinate::new(lat, lon));
                }
                if let Some(place) = &self.place {
                    entry.place_name = Some(place.clone());
                }
                if self.clear_location {
                    entry.coordinate = None;
                    entry.place_name = None;
                }
                if let Some(visibility) = self.visibility {
                    entry.visibility = visibility;
                }
            })
            .await?;

        println!("Updated entry:");
        println!();
        print_entry_details(&entry);
        Ok(())
    }
}

/// Delete an entry
#[derive(Args)]
pub struct DeleteCommand {
    /// Entry ID
    pub id: EntryId,
}

impl DeleteCommand {
    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        if device.journal.remove(self.id).await? {
            println!("Deleted entry {}", self.id);
            Ok(())
        } else {
            Err(format!("Entry not found: {}", self.id).into())
        }
    }
}

/// Show one entry
#[derive(Args)]
pub struct ShowCommand {
    /// Entry ID
    pub id: EntryId,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl ShowCommand {
    pub async fn run(&self, device: &Device) -> Result<(), Box<dyn std::error::Error>> {
        let entry = device
            .journal
            .get(self.id)
            .await?
            .ok_or_else(|| format!("Entry not found: {}", self.id))?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
            OutputFormat::Text => print_entry_details(&entry),
        }
        Ok(())
    }
}
