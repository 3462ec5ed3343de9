//! Read-only projections of the local store for charts, maps and recaps.
//!
//! [`Aggregator`] keeps an [`AggregateView`] snapshot of one owner's live
//! entries. Its [`Aggregator::run`] task rebuilds the snapshot whenever the
//! store reports a change and publishes it through a `watch` channel, so
//! readers never wait on the database and may see a slightly stale view.

mod geo;
mod stats;
mod time_series;

pub use geo::{cell_size_degrees, cluster, BoundingBox, GeoCluster, MAX_ZOOM};
pub use stats::{daily_dominant_mood, monthly_stats, MonthlyStats};
pub use time_series::{Bucket, ChartPoint, TimeRange, TimeSeries, TimeSeriesIter};

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{MoodCategory, MoodEntry, MoodFilter};
use crate::store::{LocalStore, StoreError};

/// Snapshot of an owner's live entries, oldest first.
#[derive(Debug, Clone, Default)]
pub struct AggregateView {
    /// Incremented on every rebuild.
    pub version: u64,
    entries: Arc<Vec<MoodEntry>>,
}

impl AggregateView {
    pub fn new(version: u64, mut entries: Vec<MoodEntry>) -> Self {
        entries.retain(|e| !e.deleted);
        entries.sort_by_key(|e| (e.created_at, e.id));
        Self {
            version,
            entries: Arc::new(entries),
        }
    }

    pub fn entries(&self) -> &[MoodEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compute_time_series(&self, range: TimeRange, bucket: Bucket) -> TimeSeries {
        TimeSeries::new(Arc::clone(&self.entries), range, bucket)
    }

    pub fn compute_geo_clusters(&self, bbox: &BoundingBox, zoom: u8) -> Vec<GeoCluster> {
        cluster(self.entries.iter(), bbox, zoom)
    }

    pub fn monthly_stats(&self, year: i32, month: u32) -> Option<MonthlyStats> {
        monthly_stats(&self.entries, year, month)
    }

    pub fn daily_dominant_mood(&self, year: i32, month: u32) -> BTreeMap<u32, MoodCategory> {
        daily_dominant_mood(&self.entries, year, month)
    }
}

pub struct Aggregator {
    store: LocalStore,
    owner: String,
    view: watch::Sender<Arc<AggregateView>>,
}

impl Aggregator {
    /// Build the first view from the store.
    pub async fn new(store: LocalStore, owner: impl Into<String>) -> Result<Self, StoreError> {
        let owner = owner.into();
        let entries = store.list(&owner, &MoodFilter::new()).await?;
        let (view, _) = watch::channel(Arc::new(AggregateView::new(1, entries)));
        Ok(Self { store, owner, view })
    }

    /// Latest published view.
    pub fn view(&self) -> Arc<AggregateView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregateView>> {
        self.view.subscribe()
    }

    /// Rebuild the view now and publish it.
    pub async fn refresh(&self) -> Result<Arc<AggregateView>, StoreError> {
        let entries = self.store.list(&self.owner, &MoodFilter::new()).await?;
        let version = self.view.borrow().version + 1;
        let view = Arc::new(AggregateView::new(version, entries));
        self.view.send_replace(Arc::clone(&view));
        debug!(version, entries = view.len(), "Aggregate view rebuilt");
        Ok(view)
    }

    /// Rebuild on every store change until cancelled.
    ///
    /// Bursts of notifications collapse into a single rebuild.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut changes = self.store.subscribe();
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = changes.recv() => received,
            };
            match received {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
            loop {
                match changes.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Failed to rebuild aggregate view");
            }
        }
    }
}
