mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{tick, Device, OWNER};
use moodsync_core::{
    ChangeOp, ConflictOutcome, DocumentStore, EngineState, MemoryRemote, MoodCategory, MoodFilter,
    SocialSituation, SyncError, SyncEvent, SyncState, Visibility,
};

#[tokio::test]
async fn offline_create_syncs_once_reachable() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    remote.set_offline(true);

    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Happiness).with_note("first"))
        .await
        .unwrap();
    assert_eq!(e1.sync_state, SyncState::LocalOnly);

    let err = device.engine.sync_once(&device.cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Network { .. }));
    assert_eq!(device.engine.state(), EngineState::Backoff);
    assert_eq!(device.queue.len().await.unwrap(), 1);
    assert_eq!(
        device.store.get(e1.id).await.unwrap().unwrap().sync_state,
        SyncState::LocalOnly
    );

    remote.set_offline(false);
    let report = device.sync().await;
    assert_eq!(report.accepted, 1);
    assert_eq!(device.engine.state(), EngineState::Idle);

    let synced = device.store.get(e1.id).await.unwrap().unwrap();
    assert_eq!(synced.sync_state, SyncState::Synced);
    assert_eq!(synced.revision, remote.document(e1.id).map(|d| d.revision));
    assert!(device.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn two_devices_editing_the_same_entry_converge() {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let e1 = phone
        .journal
        .record(phone.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    phone.sync().await;
    let report = tablet.sync().await;
    assert_eq!(report.pulled, 1);

    phone
        .journal
        .edit(e1.id, |e| e.mood = MoodCategory::Sadness)
        .await
        .unwrap();
    tick().await;
    tablet
        .journal
        .edit(e1.id, |e| e.note = Some("actually fine".into()))
        .await
        .unwrap();

    phone.sync().await;
    let report = tablet.sync().await;
    // The tablet's edit is later and overwrites the phone's
    assert_eq!(report.conflicts, 1);
    phone.sync().await;

    let on_phone = phone.store.get(e1.id).await.unwrap().unwrap();
    let on_tablet = tablet.store.get(e1.id).await.unwrap().unwrap();
    assert!(on_phone.same_content(&on_tablet));
    assert_eq!(on_phone.revision, on_tablet.revision);
    assert_eq!(on_phone.sync_state, SyncState::Synced);
    assert_eq!(on_tablet.sync_state, SyncState::Synced);
    assert_eq!(on_phone.note.as_deref(), Some("actually fine"));

    let log = tablet.store.conflicts(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].outcome, ConflictOutcome::LocalWon);
}

/// Both devices edit e1, the tablet first. Returns the remote's final mood
/// and the tablet's local entry.
async fn concurrent_edits(phone_submits_first: bool) -> (MoodCategory, SyncState) {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let e1 = phone
        .journal
        .record(phone.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    phone.sync().await;
    tablet.sync().await;

    tablet
        .journal
        .edit(e1.id, |e| e.mood = MoodCategory::Fear)
        .await
        .unwrap();
    tick().await;
    phone
        .journal
        .edit(e1.id, |e| e.mood = MoodCategory::Surprise)
        .await
        .unwrap();

    if phone_submits_first {
        phone.sync().await;
        tablet.sync().await;
    } else {
        tablet.sync().await;
        phone.sync().await;
    }
    tablet.sync().await;

    let doc = remote.document(e1.id).unwrap();
    let on_tablet = tablet.store.get(e1.id).await.unwrap().unwrap();
    assert_eq!(on_tablet.mood, doc.entry.mood);
    (doc.entry.mood, on_tablet.sync_state)
}

#[tokio::test]
async fn last_writer_wins_regardless_of_submission_order() {
    let (mood, tablet_state) = concurrent_edits(true).await;
    assert_eq!(mood, MoodCategory::Surprise);
    // The tablet's losing edit said something else
    assert_eq!(tablet_state, SyncState::Conflict);

    let (mood, tablet_state) = concurrent_edits(false).await;
    assert_eq!(mood, MoodCategory::Surprise);
    // Overwritten by a pulled revision, no local edit was lost at that point
    assert_eq!(tablet_state, SyncState::Synced);
}

/// The tablet edits e1, then the phone deletes it later. Returns whether the
/// remote ends up deleted and whether the tablet still holds the entry.
async fn edit_then_later_delete(phone_submits_first: bool) -> (bool, bool) {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let e1 = phone
        .journal
        .record(phone.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    phone.sync().await;
    tablet.sync().await;

    tablet
        .journal
        .edit(e1.id, |e| e.note = Some("still here".into()))
        .await
        .unwrap();
    tick().await;
    assert!(phone.journal.remove(e1.id).await.unwrap());

    if phone_submits_first {
        phone.sync().await;
        tablet.sync().await;
    } else {
        tablet.sync().await;
        phone.sync().await;
    }
    tablet.sync().await;

    let remote_deleted = remote.document(e1.id).unwrap().deleted;
    let on_tablet = tablet.store.get(e1.id).await.unwrap();
    (remote_deleted, on_tablet.is_some())
}

#[tokio::test]
async fn later_delete_beats_earlier_edit_in_either_order() {
    assert_eq!(edit_then_later_delete(true).await, (true, false));
    assert_eq!(edit_then_later_delete(false).await, (true, false));
}

#[tokio::test]
async fn replaying_an_applied_write_creates_no_duplicate() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Confusion))
        .await
        .unwrap();

    // The write lands but the acknowledgement is lost.
    let batch = device.queue.peek_batch(10).await.unwrap();
    let applied = remote
        .put(OWNER, &batch[0].payload.to_remote_payload(), None)
        .await
        .unwrap();
    device.queue.release().await.unwrap();

    let report = device.sync().await;
    assert_eq!(report.accepted, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(remote.live_count(), 1);

    let local = device.store.get(e1.id).await.unwrap().unwrap();
    assert_eq!(local.revision, Some(applied.clone()));
    assert_eq!(remote.document(e1.id).unwrap().revision, applied);
    assert!(device.store.conflicts(10).await.unwrap().is_empty());

    // A second pass has nothing to send
    let calls = remote.put_calls();
    assert!(device.sync().await.is_empty());
    assert_eq!(remote.put_calls(), calls);
}

#[tokio::test]
async fn edits_coalesce_into_one_write() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    for mood in [MoodCategory::Sadness, MoodCategory::Anger, MoodCategory::Shame] {
        device.journal.edit(e1.id, |e| e.mood = mood).await.unwrap();
    }

    let pending = device.queue.peek_batch(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].op, ChangeOp::Create);
    device.queue.release().await.unwrap();

    device.sync().await;
    assert_eq!(remote.put_calls(), 1);
    assert_eq!(remote.document(e1.id).unwrap().entry.mood, MoodCategory::Shame);
}

#[tokio::test]
async fn delete_before_first_sync_never_reaches_remote_as_live() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Disgust))
        .await
        .unwrap();
    device.journal.remove(e1.id).await.unwrap();
    assert_eq!(device.queue.len().await.unwrap(), 1);

    let report = device.sync().await;
    assert_eq!(report.deleted, 1);
    assert_eq!(remote.put_calls(), 0);
    assert_eq!(remote.live_count(), 0);
    assert!(device.store.get(e1.id).await.unwrap().is_none());
}

#[tokio::test]
async fn remote_deletion_reaches_other_devices() {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let e1 = phone
        .journal
        .record(phone.journal.draft(MoodCategory::Fear))
        .await
        .unwrap();
    phone.sync().await;
    tablet.sync().await;
    assert!(tablet.journal.get(e1.id).await.unwrap().is_some());

    phone.journal.remove(e1.id).await.unwrap();
    assert_eq!(phone.sync().await.deleted, 1);
    assert!(phone.store.get(e1.id).await.unwrap().is_none());
    assert!(remote.document(e1.id).unwrap().deleted);

    assert_eq!(tablet.sync().await.purged, 1);
    assert!(tablet.store.get(e1.id).await.unwrap().is_none());
}

#[tokio::test]
async fn synced_entry_round_trips_field_for_field() {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let original = phone
        .journal
        .record(
            phone
                .journal
                .draft(MoodCategory::Surprise)
                .with_note("met an old friend")
                .with_trigger("reunion")
                .with_social_situation(SocialSituation::TwoPeople)
                .with_visibility(Visibility::Private)
                .with_coordinate(53.5232, -113.5263)
                .with_place_name("Edmonton"),
        )
        .await
        .unwrap();
    phone.sync().await;
    tablet.sync().await;

    let fetched = tablet.store.get(original.id).await.unwrap().unwrap();
    assert!(fetched.same_content(&original));
    assert_eq!(fetched.sync_state, SyncState::Synced);
    assert!(fetched.revision.is_some());

    let history = tablet
        .journal
        .history(&MoodFilter::new().with_trigger_query("REUNION"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn rejected_change_is_dropped_and_reported() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    let mut events = device.engine.subscribe();
    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Anger))
        .await
        .unwrap();
    remote.reject_next_puts(1);

    let report = device.sync().await;
    assert_eq!(report.rejected, 1);
    assert!(device.queue.is_empty().await.unwrap());
    assert_eq!(
        device.store.get(e1.id).await.unwrap().unwrap().sync_state,
        SyncState::LocalOnly
    );

    let mut saw_rejection = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Rejected { entry_id, .. } = event {
            assert_eq!(entry_id, e1.id);
            saw_rejection = true;
        }
    }
    assert!(saw_rejection);

    // Never retried
    let calls = remote.put_calls();
    device.sync().await;
    assert_eq!(remote.put_calls(), calls);
}

#[tokio::test]
async fn remote_revision_skipped_for_a_rejected_edit_is_pulled_later() {
    let remote = Arc::new(MemoryRemote::new());
    let phone = Device::new("phone", &remote).await;
    let tablet = Device::new("tablet", &remote).await;

    let e1 = phone
        .journal
        .record(phone.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    phone.sync().await;
    tablet.sync().await;

    tablet
        .journal
        .edit(e1.id, |e| e.mood = MoodCategory::Fear)
        .await
        .unwrap();
    phone
        .journal
        .edit(e1.id, |e| e.mood = MoodCategory::Disgust)
        .await
        .unwrap();
    phone.sync().await;

    // The tablet's edit is still in flight while it pulls
    let in_flight = tablet.queue.peek_batch(10).await.unwrap();
    assert_eq!(in_flight.len(), 1);
    let report = tablet.sync().await;
    assert_eq!(report.pulled, 0);
    assert_eq!(
        tablet.store.get(e1.id).await.unwrap().unwrap().mood,
        MoodCategory::Fear
    );

    tablet.queue.release().await.unwrap();
    remote.reject_next_puts(1);
    let report = tablet.sync().await;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.pulled, 1);

    let on_tablet = tablet.store.get(e1.id).await.unwrap().unwrap();
    let doc = remote.document(e1.id).unwrap();
    assert_eq!(on_tablet.mood, MoodCategory::Disgust);
    assert_eq!(on_tablet.sync_state, SyncState::Synced);
    assert_eq!(on_tablet.revision, Some(doc.revision));
}

#[tokio::test]
async fn lost_identity_halts_until_resumed() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();
    remote.revoke_auth();

    assert!(matches!(
        device.engine.sync_once(&device.cancel).await,
        Err(SyncError::AuthLost)
    ));
    assert_eq!(device.engine.state(), EngineState::Halted);

    remote.restore_auth();
    let calls = remote.put_calls();
    assert!(matches!(
        device.engine.sync_once(&device.cancel).await,
        Err(SyncError::AuthLost)
    ));
    assert_eq!(remote.put_calls(), calls);

    device.engine.resume_after_auth();
    assert_eq!(device.engine.state(), EngineState::Idle);
    assert_eq!(device.sync().await.accepted, 1);
    assert_eq!(
        device.store.get(e1.id).await.unwrap().unwrap().sync_state,
        SyncState::Synced
    );
}

#[tokio::test]
async fn cancelled_pass_leaves_records_queued() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Device::new("phone", &remote).await;
    device
        .journal
        .record(device.journal.draft(MoodCategory::Sadness))
        .await
        .unwrap();

    let cancelled = tokio_util::sync::CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        device.engine.sync_once(&cancelled).await,
        Err(SyncError::Cancelled)
    ));
    assert_eq!(device.queue.len().await.unwrap(), 1);
    assert_eq!(remote.put_calls(), 0);

    // Leases were released, so the next pass sends it
    assert_eq!(device.sync().await.accepted, 1);
}

#[tokio::test]
async fn prolonged_outage_raises_sync_delayed_then_recovered() {
    let remote = Arc::new(MemoryRemote::new());
    let config = common::fast_config().with_delay_ceiling(Duration::ZERO);
    let device = Device::with_config("phone", &remote, config).await;
    let mut events = device.engine.subscribe();
    device
        .journal
        .record(device.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();

    remote.set_offline(true);
    for _ in 0..2 {
        assert!(device.engine.sync_once(&device.cancel).await.is_err());
    }
    remote.set_offline(false);
    device.sync().await;

    let mut retries = 0;
    let mut delayed = 0;
    let mut recovered = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::RetryScheduled { .. } => retries += 1,
            SyncEvent::SyncDelayed { .. } => delayed += 1,
            SyncEvent::Recovered => recovered += 1,
            _ => {}
        }
    }
    assert_eq!(retries, 2);
    assert_eq!(delayed, 1);
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn background_engine_syncs_new_records() {
    let remote = Arc::new(MemoryRemote::new());
    let device = Arc::new(Device::new("phone", &remote).await);

    let task = {
        let device = Arc::clone(&device);
        let cancel = device.cancel.clone();
        tokio::spawn(async move { device.engine.run(cancel).await })
    };

    let e1 = device
        .journal
        .record(device.journal.draft(MoodCategory::Happiness))
        .await
        .unwrap();

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let entry = device.store.get(e1.id).await.unwrap().unwrap();
            if entry.sync_state == SyncState::Synced {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(synced.revision.is_some());

    device.cancel.cancel();
    task.await.unwrap();
}
