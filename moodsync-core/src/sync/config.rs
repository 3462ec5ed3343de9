use std::time::Duration;

use super::backoff::BackoffPolicy;

/// Tuning knobs for the sync engine and attachment uploader.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Records taken from the change queue per drain.
    pub batch_size: usize,
    pub backoff: BackoffPolicy,
    /// Transient failures lasting longer than this raise `SyncDelayed`.
    pub delay_ceiling: Duration,
    /// Concurrent attachment uploads.
    pub upload_workers: usize,
    /// How often `run` pulls remote changes when the queue is idle.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            backoff: BackoffPolicy::default(),
            delay_ceiling: Duration::from_secs(10 * 60),
            upload_workers: 3,
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_delay_ceiling(mut self, ceiling: Duration) -> Self {
        self.delay_ceiling = ceiling;
        self
    }

    pub fn with_upload_workers(mut self, workers: usize) -> Self {
        self.upload_workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
