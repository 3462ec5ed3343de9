use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Notify;

use super::{from_millis, to_millis, StoreError};
use crate::entry_id::EntryId;
use crate::models::{ChangeOp, ChangeRecord};

/// Durable FIFO of pending mutations, at most one record per entry.
///
/// Records are handed out under a lease by [`ChangeQueue::peek_batch`] and
/// removed only by [`ChangeQueue::acknowledge`]. A create or update for an
/// entry that already has a pending record replaces that record's payload in
/// place, keeping its sequence number. If the record is leased at the time,
/// it is flagged so the acknowledgement of the stale in-flight payload
/// re-appends it at the tail instead of removing it. A delete discards any
/// pending record for the entry and is appended at the tail.
#[derive(Clone)]
pub struct ChangeQueue {
    pool: SqlitePool,
    wake: Arc<Notify>,
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    seq: i64,
    entry_id: String,
    op: String,
    payload: String,
    enqueued_at: i64,
}

impl TryFrom<ChangeRow> for ChangeRecord {
    type Error = StoreError;

    fn try_from(row: ChangeRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.entry_id.clone(),
            reason,
        };
        let entry_id: EntryId = row.entry_id.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let op: ChangeOp = row.op.parse().map_err(corrupt)?;
        let payload = serde_json::from_str(&row.payload).map_err(|e| corrupt(e.to_string()))?;

        Ok(ChangeRecord {
            seq: row.seq,
            entry_id,
            op,
            payload,
            enqueued_at: from_millis(&row.entry_id, row.enqueued_at)?,
        })
    }
}

/// Op stored after coalescing `incoming` onto a pending `existing` op.
fn coalesce(existing: ChangeOp, incoming: ChangeOp) -> ChangeOp {
    match (existing, incoming) {
        (_, ChangeOp::Delete) => ChangeOp::Delete,
        (ChangeOp::Create, ChangeOp::Update) => ChangeOp::Create,
        (_, op) => op,
    }
}

impl ChangeQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Append a change and wake the sync engine.
    pub async fn enqueue(&self, record: ChangeRecord) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let seq = Self::enqueue_in(&mut conn, &record).await?;
        self.wake();
        Ok(seq)
    }

    /// Append a change on an open connection or transaction.
    ///
    /// The caller is responsible for calling [`ChangeQueue::wake`] once the
    /// surrounding transaction commits.
    pub(crate) async fn enqueue_in(
        conn: &mut SqliteConnection,
        record: &ChangeRecord,
    ) -> Result<i64, StoreError> {
        let entry_id = record.entry_id.to_string();
        let payload = serde_json::to_string(&record.payload).map_err(|e| StoreError::Corrupt {
            id: entry_id.clone(),
            reason: e.to_string(),
        })?;

        let existing: Option<(i64, String)> =
            sqlx::query_as("SELECT seq, op FROM change_queue WHERE entry_id = ?")
                .bind(&entry_id)
                .fetch_optional(&mut *conn)
                .await?;

        if let Some((seq, existing_op)) = existing {
            let existing_op: ChangeOp = existing_op.parse().map_err(|reason| {
                StoreError::Corrupt {
                    id: entry_id.clone(),
                    reason,
                }
            })?;
            let op = coalesce(existing_op, record.op);

            if op != ChangeOp::Delete {
                sqlx::query(
                    "UPDATE change_queue SET op = ?, payload = ?, enqueued_at = ?, requeued = leased WHERE seq = ?",
                )
                .bind(op.to_string())
                .bind(payload)
                .bind(to_millis(record.enqueued_at))
                .bind(seq)
                .execute(&mut *conn)
                .await?;
                tracing::debug!(entry = %record.entry_id, seq, "Coalesced pending change");
                return Ok(seq);
            }

            sqlx::query("DELETE FROM change_queue WHERE seq = ?")
                .bind(seq)
                .execute(&mut *conn)
                .await?;
            tracing::debug!(entry = %record.entry_id, superseded = seq, "Delete supersedes pending change");
        }

        let result = sqlx::query(
            "INSERT INTO change_queue (entry_id, op, payload, enqueued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry_id)
        .bind(record.op.to_string())
        .bind(payload)
        .bind(to_millis(record.enqueued_at))
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Lease up to `max` unleased records in sequence order.
    ///
    /// Leased records stay in the queue and are not handed out again until
    /// acknowledged or released.
    pub async fn peek_batch(&self, max: usize) -> Result<Vec<ChangeRecord>, StoreError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<ChangeRow> = sqlx::query_as(
            r#"
            UPDATE change_queue SET leased = 1
            WHERE seq IN (SELECT seq FROM change_queue WHERE leased = 0 ORDER BY seq LIMIT ?)
            RETURNING seq, entry_id, op, payload, enqueued_at
            "#,
        )
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = rows
            .into_iter()
            .map(ChangeRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// Remove every leased record up to and including `seq`.
    ///
    /// Records whose payload was replaced while in flight are moved to the
    /// tail of the queue instead.
    pub async fn acknowledge(&self, seq: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::acknowledge_in(&mut tx, seq).await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn acknowledge_in(
        conn: &mut SqliteConnection,
        seq: i64,
    ) -> Result<(), StoreError> {
        let replaced: Vec<ChangeRow> = sqlx::query_as(
            "SELECT seq, entry_id, op, payload, enqueued_at FROM change_queue \
             WHERE seq <= ? AND leased = 1 AND requeued = 1 ORDER BY seq",
        )
        .bind(seq)
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM change_queue WHERE seq <= ? AND leased = 1")
            .bind(seq)
            .execute(&mut *conn)
            .await?;

        // Replaced payloads go back at the tail with a fresh sequence number,
        // out of reach of later acknowledgements for the same batch.
        for row in replaced {
            sqlx::query(
                "INSERT INTO change_queue (entry_id, op, payload, enqueued_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&row.entry_id)
            .bind(&row.op)
            .bind(&row.payload)
            .bind(row.enqueued_at)
            .execute(&mut *conn)
            .await?;
            tracing::debug!(entry = %row.entry_id, acked = row.seq, "Requeued change replaced in flight");
        }
        Ok(())
    }

    /// Return every leased record to the queue.
    pub async fn release(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE change_queue SET leased = 0, requeued = 0 WHERE leased = 1")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn len(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// The pending record for an entry, if any.
    pub async fn pending_for(&self, id: EntryId) -> Result<Option<ChangeRecord>, StoreError> {
        let row: Option<ChangeRow> = sqlx::query_as(
            "SELECT seq, entry_id, op, payload, enqueued_at FROM change_queue WHERE entry_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChangeRecord::try_from).transpose()
    }

    pub(crate) async fn has_pending_in(
        conn: &mut SqliteConnection,
        id: EntryId,
    ) -> Result<bool, StoreError> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT seq FROM change_queue WHERE entry_id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(seq.is_some())
    }

    /// Signal that new work is available.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Wait until [`ChangeQueue::wake`] is called.
    pub async fn wait_for_work(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_id::EntryIdGenerator;
    use crate::models::{MoodCategory, MoodEntry};
    use crate::store::{now_millis, open_pool};
    use tempfile::TempDir;

    struct TestContext {
        queue: ChangeQueue,
        ids: EntryIdGenerator,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = open_pool(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            queue: ChangeQueue::new(pool),
            ids: EntryIdGenerator::new("test-device"),
            _temp_dir: temp_dir,
        }
    }

    fn entry(ctx: &TestContext, note: &str) -> MoodEntry {
        MoodEntry::new(ctx.ids.generate(), "alice", MoodCategory::Happiness, now_millis())
            .with_note(note)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let ctx = setup().await;
        let a = entry(&ctx, "a");
        let b = entry(&ctx, "b");
        ctx.queue.enqueue(ChangeRecord::create(a.clone())).await.unwrap();
        ctx.queue.enqueue(ChangeRecord::create(b.clone())).await.unwrap();

        let batch = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].entry_id, a.id);
        assert_eq!(batch[1].entry_id, b.id);
        assert!(batch[0].seq < batch[1].seq);
    }

    #[tokio::test]
    async fn test_create_then_update_coalesces_to_create() {
        let ctx = setup().await;
        let e = entry(&ctx, "first");
        ctx.queue.enqueue(ChangeRecord::create(e.clone())).await.unwrap();

        let edited = e.clone().with_note("second");
        ctx.queue.enqueue(ChangeRecord::update(edited)).await.unwrap();

        assert_eq!(ctx.queue.len().await.unwrap(), 1);
        let pending = ctx.queue.pending_for(e.id).await.unwrap().unwrap();
        assert_eq!(pending.op, ChangeOp::Create);
        assert_eq!(pending.payload.note.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_delete_supersedes_pending_change() {
        let ctx = setup().await;
        let e = entry(&ctx, "first");
        ctx.queue.enqueue(ChangeRecord::update(e.clone())).await.unwrap();

        let mut tombstone = e.clone();
        tombstone.deleted = true;
        ctx.queue.enqueue(ChangeRecord::delete(tombstone)).await.unwrap();

        assert_eq!(ctx.queue.len().await.unwrap(), 1);
        let batch = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(batch[0].op, ChangeOp::Delete);
        assert!(batch[0].payload.deleted);
    }

    #[tokio::test]
    async fn test_leased_records_are_not_handed_out_twice() {
        let ctx = setup().await;
        for i in 0..3 {
            ctx.queue
                .enqueue(ChangeRecord::create(entry(&ctx, &i.to_string())))
                .await
                .unwrap();
        }

        let first = ctx.queue.peek_batch(2).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(ctx.queue.peek_batch(10).await.unwrap().is_empty());

        assert_eq!(ctx.queue.release().await.unwrap(), 3);
        assert_eq!(ctx.queue.peek_batch(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_acknowledge_is_cumulative() {
        let ctx = setup().await;
        let ids: Vec<_> = (0..3).map(|i| entry(&ctx, &i.to_string())).collect();
        for e in &ids {
            ctx.queue.enqueue(ChangeRecord::create(e.clone())).await.unwrap();
        }

        let batch = ctx.queue.peek_batch(10).await.unwrap();
        ctx.queue.acknowledge(batch[1].seq).await.unwrap();

        assert_eq!(ctx.queue.len().await.unwrap(), 1);
        assert!(ctx.queue.pending_for(ids[2].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let ctx = setup().await;
        let a = entry(&ctx, "a");
        let b = entry(&ctx, "b");
        let seq_a = ctx.queue.enqueue(ChangeRecord::update(a.clone())).await.unwrap();
        ctx.queue.enqueue(ChangeRecord::update(b.clone())).await.unwrap();

        let seq = ctx
            .queue
            .enqueue(ChangeRecord::update(a.clone().with_note("a2")))
            .await
            .unwrap();
        assert_eq!(seq, seq_a);

        let batch = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(batch[0].entry_id, a.id);
        assert_eq!(batch[0].payload.note.as_deref(), Some("a2"));
        assert_eq!(batch[1].entry_id, b.id);
    }

    #[tokio::test]
    async fn test_edit_during_flight_survives_ack() {
        let ctx = setup().await;
        let e = entry(&ctx, "v1");
        ctx.queue.enqueue(ChangeRecord::create(e.clone())).await.unwrap();

        let in_flight = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(in_flight.len(), 1);

        // User edits while the create is being sent
        ctx.queue
            .enqueue(ChangeRecord::update(e.clone().with_note("v2")))
            .await
            .unwrap();

        ctx.queue.acknowledge(in_flight[0].seq).await.unwrap();

        let next = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload.note.as_deref(), Some("v2"));

        ctx.queue.acknowledge(next[0].seq).await.unwrap();
        assert!(ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_during_flight_survives_later_ack_in_batch() {
        let ctx = setup().await;
        let a = entry(&ctx, "a1");
        let b = entry(&ctx, "b1");
        ctx.queue.enqueue(ChangeRecord::create(a.clone())).await.unwrap();
        ctx.queue.enqueue(ChangeRecord::create(b.clone())).await.unwrap();

        let in_flight = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(in_flight.len(), 2);

        ctx.queue
            .enqueue(ChangeRecord::update(a.clone().with_note("a2")))
            .await
            .unwrap();

        // The engine acknowledges each record of the batch in turn
        ctx.queue.acknowledge(in_flight[0].seq).await.unwrap();
        ctx.queue.acknowledge(in_flight[1].seq).await.unwrap();

        let pending = ctx.queue.pending_for(a.id).await.unwrap().unwrap();
        assert_eq!(pending.payload.note.as_deref(), Some("a2"));
        assert!(pending.seq > in_flight[1].seq);
        assert!(ctx.queue.pending_for(b.id).await.unwrap().is_none());

        let next = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].entry_id, a.id);
    }

    #[tokio::test]
    async fn test_acknowledge_skips_unleased_records() {
        let ctx = setup().await;
        let a = entry(&ctx, "a");
        ctx.queue.enqueue(ChangeRecord::create(a.clone())).await.unwrap();
        let in_flight = ctx.queue.peek_batch(10).await.unwrap();
        ctx.queue.release().await.unwrap();

        ctx.queue.acknowledge(in_flight[0].seq).await.unwrap();
        assert!(ctx.queue.pending_for(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_during_flight_survives_ack() {
        let ctx = setup().await;
        let e = entry(&ctx, "v1");
        ctx.queue.enqueue(ChangeRecord::create(e.clone())).await.unwrap();
        let in_flight = ctx.queue.peek_batch(10).await.unwrap();

        let mut tombstone = e.clone();
        tombstone.deleted = true;
        ctx.queue.enqueue(ChangeRecord::delete(tombstone)).await.unwrap();
        ctx.queue.acknowledge(in_flight[0].seq).await.unwrap();

        let next = ctx.queue.peek_batch(10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].op, ChangeOp::Delete);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");
        let ids = EntryIdGenerator::new("dev");
        let e = MoodEntry::new(ids.generate(), "alice", MoodCategory::Fear, now_millis());

        {
            let queue = ChangeQueue::new(open_pool(&path).await.unwrap());
            queue.enqueue(ChangeRecord::create(e.clone())).await.unwrap();
        }

        let queue = ChangeQueue::new(open_pool(&path).await.unwrap());
        let pending = queue.pending_for(e.id).await.unwrap().unwrap();
        assert_eq!(pending.payload, e);
    }

    #[tokio::test]
    async fn test_wake_is_remembered() {
        let ctx = setup().await;
        ctx.queue.wake();
        tokio::time::timeout(std::time::Duration::from_secs(1), ctx.queue.wait_for_work())
            .await
            .unwrap();
    }

    #[test]
    fn test_coalesce_rules() {
        assert_eq!(coalesce(ChangeOp::Create, ChangeOp::Update), ChangeOp::Create);
        assert_eq!(coalesce(ChangeOp::Update, ChangeOp::Update), ChangeOp::Update);
        assert_eq!(coalesce(ChangeOp::Create, ChangeOp::Delete), ChangeOp::Delete);
        assert_eq!(coalesce(ChangeOp::Update, ChangeOp::Delete), ChangeOp::Delete);
    }
}
