//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand};
use moodsync_core::{AttachmentUploader, SyncError, SyncEvent, SyncReport};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::device::{Device, SyncSession};

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, queue and server status
    Status,

    /// List recently resolved conflicts
    Conflicts {
        /// How many to show
        #[arg(long, short, default_value_t = 10)]
        limit: u32,
    },

    /// Keep syncing in the foreground until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(
        &self,
        device: &Device,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => sync(device, config).await,
            Some(SyncSubcommand::Status) => status(device, config).await,
            Some(SyncSubcommand::Conflicts { limit }) => conflicts(device, *limit).await,
            Some(SyncSubcommand::Watch) => watch(device, config).await,
        }
    }
}

/// Fail early when the API key belongs to someone other than the journal owner.
pub(crate) async fn check_owner(
    session: &SyncSession,
    device: &Device,
) -> Result<(), Box<dyn std::error::Error>> {
    let server_owner = session.server_owner().await?;
    if server_owner != device.journal.owner() {
        return Err(format!(
            "API key belongs to '{}' but entries are recorded as '{}'. Set owner: {} in config",
            server_owner,
            device.journal.owner(),
            server_owner
        )
        .into());
    }
    Ok(())
}

/// Upload waiting photos, then push and pull entries.
///
/// Returns the engine's report and the number of photos still waiting.
pub(crate) async fn sync_pass(
    session: &SyncSession,
    uploader: &AttachmentUploader,
) -> Result<(SyncReport, usize), Box<dyn std::error::Error>> {
    let uploads = uploader.flush_pending().await?;
    let failed = uploads.iter().filter(|r| r.is_err()).count();
    let report = session.engine.sync_once(&session.cancel).await?;
    Ok((report, failed))
}

async fn sync(device: &Device, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let session = device.session(&config.sync)?;
    check_owner(&session, device).await?;
    let mut events = session.engine.subscribe();

    println!("Syncing with server...");
    println!();

    let (report, failed_uploads) = match sync_pass(&session, &session.uploader).await {
        Ok(done) => done,
        Err(e) => {
            println!("  ✗ {}", e);
            return Ok(());
        }
    };

    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::ConflictResolved { entry_id, outcome } => {
                println!("  ! conflict on {} ({})", entry_id, outcome)
            }
            SyncEvent::Rejected { entry_id, reason } => {
                println!("  ✗ rejected {}: {}", entry_id, reason)
            }
            SyncEvent::UploadFailed { entry_id, reason } => {
                println!("  ✗ photo for {} not uploaded: {}", entry_id, reason)
            }
            _ => {}
        }
    }

    println!("  ✓ {} pushed, {} deleted", report.accepted, report.deleted);
    println!("  ✓ {} pulled, {} removed", report.pulled, report.purged);
    if failed_uploads > 0 {
        println!("  ✗ {} photo(s) still waiting to upload", failed_uploads);
    }
    println!();
    if report.is_empty() {
        println!("Already up to date.");
    } else {
        println!("Sync complete.");
    }
    Ok(())
}

async fn status(device: &Device, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Sync Configuration");
    println!("==================");
    println!();

    let queued = device.queue.len().await?;
    let photos = device.store.pending_attachments().await?.len();
    println!("Owner:          {}", device.journal.owner());
    println!("Queued changes: {}", queued);
    println!("Unsent photos:  {}", photos);
    println!();

    let session = match device.session(&config.sync) {
        Ok(session) => session,
        Err(_) => {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!();
            println!("Or set environment variables:");
            println!("  MOOD_SYNC_URL");
            println!("  MOOD_SYNC_API_KEY");
            return Ok(());
        }
    };

    println!("Server:    {}", session.remote.server_url());
    println!(
        "Auto-sync: {}",
        if config.sync.auto_sync {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    print!("Server status: ");
    match session.server_owner().await {
        Ok(owner) if owner == device.journal.owner() => println!("✓ connected as {}", owner),
        Ok(owner) => println!("✗ API key belongs to '{}'", owner),
        Err(e) => println!("✗ {}", e),
    }
    Ok(())
}

async fn conflicts(device: &Device, limit: u32) -> Result<(), Box<dyn std::error::Error>> {
    let records = device.store.conflicts(limit).await?;
    if records.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  {}  {}  local: {}  remote: {}",
            record.resolved_at.format("%Y-%m-%d %H:%M"),
            record.entry_id,
            record.outcome,
            record.local.mood,
            record.remote.mood
        );
    }
    Ok(())
}

async fn watch(device: &Device, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let session = device.session(&config.sync)?;
    check_owner(&session, device).await?;
    let mut events = session.engine.subscribe();

    println!("Watching for changes. Press Ctrl-C to stop.");

    // Uploads run detached; each one queues its own entry update
    let uploads = session.uploader.resume_pending().await?;
    tracing::debug!(count = uploads.len(), "Resumed photo uploads");

    let engine = session.engine.run(session.cancel.clone());
    tokio::pin!(engine);

    loop {
        tokio::select! {
            _ = &mut engine => break,
            _ = tokio::signal::ctrl_c() => {
                session.cancel.cancel();
            }
            event = events.recv() => match event {
                Ok(SyncEvent::AuthLost) => {
                    eprintln!("{}", SyncError::AuthLost);
                    session.cancel.cancel();
                }
                Ok(event) => println!("{:?}", event),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Missed sync events"),
                Err(RecvError::Closed) => session.cancel.cancel(),
            },
        }
    }
    Ok(())
}
