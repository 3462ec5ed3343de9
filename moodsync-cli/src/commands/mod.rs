mod attach;
mod config_cmd;
mod entry;
mod history;
mod insights;
mod sync_cmd;

use chrono::Local;
use clap::ValueEnum;
use moodsync_core::{AttachmentRef, MoodEntry};

pub use attach::AttachCommand;
pub use config_cmd::ConfigCommand;
pub use entry::{DeleteCommand, EditCommand, LogCommand, ShowCommand};
pub use history::HistoryCommand;
pub use insights::{ChartCommand, MapCommand, StatsCommand};
pub use sync_cmd::SyncCommand;
pub(crate) use sync_cmd::{check_owner, sync_pass};

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Full multi-line rendering of one entry.
pub(crate) fn print_entry_details(entry: &MoodEntry) {
    println!("ID:         {}", entry.id);
    println!("Mood:       {}", entry.mood);
    println!(
        "Recorded:   {}",
        entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    if let Some(note) = &entry.note {
        println!("Note:       {}", note);
    }
    if let Some(trigger) = &entry.trigger {
        println!("Trigger:    {}", trigger);
    }
    if let Some(situation) = entry.social_situation {
        println!("Company:    {}", situation);
    }
    if let Some(c) = &entry.coordinate {
        match &entry.place_name {
            Some(place) => println!("Location:   {} ({:.5}, {:.5})", place, c.latitude, c.longitude),
            None => println!("Location:   {:.5}, {:.5}", c.latitude, c.longitude),
        }
    }
    match &entry.attachment {
        Some(AttachmentRef::Pending { .. }) => println!("Photo:      waiting to upload"),
        Some(AttachmentRef::Remote { reference }) => println!("Photo:      {}", reference),
        None => {}
    }
    println!("Visibility: {}", entry.visibility);
    println!("Sync:       {}", entry.sync_state);
}

/// One-line rendering used by lists.
pub(crate) fn entry_summary(entry: &MoodEntry) -> String {
    let mut line = format!(
        "{}  {:<10} {}",
        entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        entry.mood.as_str(),
        entry.id
    );
    if let Some(note) = &entry.note {
        line.push_str(&format!("  {}", note));
    }
    if entry.attachment.is_some() {
        line.push_str("  [photo]");
    }
    line
}
