//! Automatic sync around CLI commands when `sync.auto_sync` is enabled.
//!
//! Failures never fail the command: the journal works offline and the change
//! queue keeps everything for the next attempt.

use std::time::Duration;

use crate::commands::{check_owner, sync_pass};
use crate::config::Config;
use crate::device::Device;

/// Upper bound on a single auto-sync, so an unreachable server cannot stall the CLI.
const AUTO_SYNC_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn try_auto_sync(device: &Device, config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let Ok(session) = device.session(&config.sync) else {
        return;
    };

    // One upload attempt per photo; the rest wait for the next run
    let uploader = session.uploader.clone().with_max_attempts(1);
    let attempt = async {
        check_owner(&session, device).await?;
        sync_pass(&session, &uploader).await
    };
    match tokio::time::timeout(AUTO_SYNC_TIMEOUT, attempt).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => eprintln!("Auto-sync: {}", e),
        Err(_) => {
            session.cancel.cancel();
            eprintln!("Auto-sync: server did not respond, skipping");
        }
    }
}
