//! Integration tests for the scan / place / localize lifecycle

use super::common::fixtures::{edgeless_map, localizes, room_map, TestSession};
use anchorkeep::engine::mock::{EngineCall, TrackerCall};
use anchorkeep::map::deserialize;
use anchorkeep::storage::blob_name;
use anchorkeep::{
    ArtifactKind, Config, FailureReason, LocalizeOutcome, MapSignature, MappingOutcome,
    MalformedRecordPolicy, ObjectLedger, OutcomeCancelled, Position, SessionError, SessionEvent,
    SessionState,
};

#[tokio::test]
async fn test_successful_scan_persists_round_trippable_map() {
    let mut session = TestSession::new();
    let pending = session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();

    assert_eq!(session.manager.process_pending().await, 1);
    assert_eq!(session.manager.state(), SessionState::Ready);

    let outcome = pending.await.unwrap();
    let MappingOutcome::Succeeded { signature, map_path } = outcome else {
        panic!("Expected success, got {:?}", outcome);
    };
    assert!(signature.as_str().starts_with("room_"));
    assert_eq!(map_path, session.store.path_of(&blob_name(&signature, ArtifactKind::Map)));

    let bytes = session
        .store
        .read_blob(&blob_name(&signature, ArtifactKind::Map))
        .unwrap();
    assert!(!bytes.is_empty());
    let graph = deserialize(&bytes).unwrap();
    assert_eq!(anchorkeep::map::serialize(&graph), bytes);
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 2);
}

#[tokio::test]
async fn test_engine_without_map_fails_once_and_writes_nothing() {
    let mut session = TestSession::with(Config::default(), None, localizes());
    let mut events = session.manager.subscribe_events();
    let pending = session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();
    session.manager.process_pending().await;

    assert_eq!(session.manager.state(), SessionState::Failed);
    assert_eq!(
        pending.await.unwrap(),
        MappingOutcome::Failed(FailureReason::NoMapProduced)
    );
    assert!(session.artifact_names().is_empty());

    let mut seen = Vec::new();
    while let Ok(SessionEvent::StateChanged { to, .. }) = events.try_recv() {
        seen.push(to);
    }
    assert_eq!(
        seen,
        vec![
            SessionState::Scanning,
            SessionState::Finalizing,
            SessionState::Failed
        ]
    );
}

#[tokio::test]
async fn test_invalid_map_is_never_persisted() {
    let mut session = TestSession::with(Config::default(), Some(edgeless_map()), localizes());
    let pending = session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();
    session.manager.process_pending().await;

    assert!(matches!(
        pending.await.unwrap(),
        MappingOutcome::Failed(FailureReason::InvalidMap(_))
    ));
    assert!(session.artifact_names().is_empty());
    assert!(!session.manager.has_saved_map());
    assert_eq!(session.manager.context().current_map_path, None);
}

#[tokio::test]
async fn test_failed_scan_can_be_retried() {
    let mut session = TestSession::with(Config::default(), None, localizes());
    let first = session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();
    session.manager.process_pending().await;
    assert!(!first.await.unwrap().is_success());

    let second = session.manager.begin_scan().await.unwrap();
    assert_eq!(session.manager.state(), SessionState::Scanning);
    session.mapper.finalize(Some(room_map()));
    session.manager.process_pending().await;

    assert!(second.await.unwrap().is_success());
    assert_eq!(session.manager.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_stop_scan_suppresses_completion() {
    let mut session = TestSession::new();
    let pending = session.manager.begin_scan().await.unwrap();
    session.manager.stop_scan().await.unwrap();

    // The engine finalizes on stop; a late explicit completion follows
    let run = session.mapper.calls().iter().find_map(|call| match call {
        EngineCall::StartMapping(run) => Some(*run),
        _ => None,
    });
    session.mapper.finalize_run(run.unwrap(), Some(room_map()));

    assert_eq!(session.manager.process_pending().await, 0);
    assert_eq!(pending.await, Err(OutcomeCancelled));
    assert_eq!(session.manager.state(), SessionState::Idle);
    assert!(session.artifact_names().is_empty());
}

#[tokio::test]
async fn test_completion_for_old_run_does_not_leak_into_new_scan() {
    let mut session = TestSession::with(Config::default(), None, localizes());
    let _first = session.manager.begin_scan().await.unwrap();
    session.manager.stop_scan().await.unwrap();
    session.manager.process_pending().await;

    let second = session.manager.begin_scan().await.unwrap();
    // Late delivery tagged with the first run
    session
        .mapper
        .finalize_run(anchorkeep::RunId(1), Some(room_map()));
    assert_eq!(session.manager.process_pending().await, 0);
    assert_eq!(session.manager.state(), SessionState::Scanning);

    session.mapper.finalize(Some(room_map()));
    session.manager.process_pending().await;
    assert!(second.await.unwrap().is_success());
}

#[tokio::test]
async fn test_placed_objects_survive_exit_and_localize() {
    let mut session = TestSession::new();
    let signature = session.scan().await;

    let p = Position::new(1.0, 0.0, 2.0);
    let q = Position::new(0.0, 0.0, 3.0);
    session.manager.place_object(p).await.unwrap();
    session.manager.place_object(q).await.unwrap();
    assert_eq!(session.tracker.attached(), vec![p, q]);

    session.manager.exit().await;
    assert!(session.tracker.attached().is_empty());

    let pending = session.manager.begin_localize().await.unwrap();
    assert_eq!(session.manager.state(), SessionState::Localizing);
    session.manager.process_pending().await;

    assert_eq!(session.manager.state(), SessionState::Ready);
    assert_eq!(
        pending.await.unwrap(),
        LocalizeOutcome::Localized {
            signature: signature.clone(),
            restored: vec![p, q],
            rejected: 0,
        }
    );
    assert_eq!(session.tracker.attached(), vec![p, q]);
    assert_eq!(
        session.manager.ledger().load_all(&signature).unwrap().positions,
        vec![p, q]
    );
}

#[tokio::test]
async fn test_clear_objects_clears_ledger_and_scene() {
    let mut session = TestSession::new();
    let signature = session.scan().await;
    session
        .manager
        .place_object(Position::new(1.0, 1.0, 1.0))
        .await
        .unwrap();

    session.manager.clear_objects().await.unwrap();

    let ledger = session.manager.ledger();
    assert!(ledger.load_all(&signature).unwrap().positions.is_empty());
    assert!(!session
        .store
        .exists(&blob_name(&signature, ArtifactKind::Objects)));
    assert!(session.tracker.attached().is_empty());
    assert_eq!(
        session.tracker.calls().last(),
        Some(&TrackerCall::DetachAllObjects)
    );
}

#[tokio::test]
async fn test_rejected_attach_records_nothing() {
    let mut session = TestSession::with_tracker_failing("attach_object");
    let signature = session.scan().await;

    let result = session
        .manager
        .place_object(Position::new(1.0, 0.0, 1.0))
        .await;

    assert!(matches!(result, Err(SessionError::Engine(_))));
    assert!(!session
        .store
        .exists(&blob_name(&signature, ArtifactKind::Objects)));
    assert!(session.tracker.attached().is_empty());
    assert_eq!(session.manager.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_rejected_detach_keeps_ledger_and_scene() {
    let mut session = TestSession::with_tracker_failing("detach_all_objects");
    let signature = session.scan().await;
    let p = Position::new(1.0, 1.0, 1.0);
    let q = Position::new(-2.0, 0.0, 0.5);
    session.manager.place_object(p).await.unwrap();
    session.manager.place_object(q).await.unwrap();

    let result = session.manager.clear_objects().await;

    assert!(matches!(result, Err(SessionError::Engine(_))));
    assert_eq!(
        session.manager.ledger().load_all(&signature).unwrap().positions,
        vec![p, q]
    );
    assert_eq!(session.tracker.attached(), vec![p, q]);

    // Both sides stay consistent for the next placement
    let r = Position::new(0.0, 0.0, 3.0);
    session.manager.place_object(r).await.unwrap();
    assert_eq!(
        session.manager.ledger().load_all(&signature).unwrap().positions,
        vec![p, q, r]
    );
}

#[tokio::test]
async fn test_exit_twice_is_idempotent() {
    let mut session = TestSession::new();
    let pending = session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();
    session.manager.process_pending().await;
    assert!(pending.await.unwrap().is_success());

    let mut events = session.manager.subscribe_events();
    session.manager.exit().await;
    session.manager.exit().await;

    assert_eq!(session.manager.state(), SessionState::Idle);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Idle
        }
    );
    assert!(events.try_recv().is_err());
    assert_eq!(session.manager.process_pending().await, 0);
}

#[tokio::test]
async fn test_exit_clears_both_collaborators() {
    let mut session = TestSession::new();
    session.manager.begin_scan().await.unwrap();
    let before = session.mapper.calls().len();

    session.manager.exit().await;

    assert_eq!(
        session.mapper.call_names()[before..],
        ["stop_mapping", "set_enabled", "clear_device_map"]
    );
    assert_eq!(
        session.mapper.calls()[before + 1],
        EngineCall::SetEnabled(false)
    );
    assert_eq!(session.tracker.call_names(), vec!["clear_all_state"]);
    // The engine's finalize-on-stop is dropped
    assert_eq!(session.manager.process_pending().await, 0);
    assert!(session.artifact_names().is_empty());
}

#[tokio::test]
async fn test_exit_from_failed() {
    let mut session = TestSession::with(Config::default(), None, localizes());
    session.manager.begin_scan().await.unwrap();
    session.manager.finish_scan().await.unwrap();
    session.manager.process_pending().await;
    assert_eq!(session.manager.state(), SessionState::Failed);

    session.manager.exit().await;
    assert_eq!(session.manager.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_exit_during_localize_cancels_outcome() {
    let mut session = TestSession::with(Config::default(), Some(room_map()), Vec::new());
    session.scan().await;
    session.manager.exit().await;

    let pending = session.manager.begin_localize().await.unwrap();
    let run = session.tracker.current_run().unwrap();
    session.manager.exit().await;
    session
        .tracker
        .progress_run(run, anchorkeep::TrackingStatus::Localized);

    assert_eq!(session.manager.process_pending().await, 0);
    assert_eq!(pending.await, Err(OutcomeCancelled));
}

#[tokio::test]
async fn test_object_commands_require_ready() {
    let mut session = TestSession::new();
    let err = session
        .manager
        .clear_objects()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::ProtocolViolation {
            state: SessionState::Idle,
            ..
        }
    ));
}

#[tokio::test]
async fn test_malformed_ledger_under_abort_policy_fails_localize() {
    let config = Config::default().with_ledger_policy(MalformedRecordPolicy::Abort);
    let mut session = TestSession::with(config, Some(room_map()), localizes());
    let signature = session.scan().await;
    session.manager.exit().await;

    session
        .store
        .append_record(&blob_name(&signature, ArtifactKind::Objects), "(1, 2)")
        .unwrap();

    let pending = session.manager.begin_localize().await.unwrap();
    session.manager.process_pending().await;

    assert!(matches!(
        pending.await.unwrap(),
        LocalizeOutcome::Failed(FailureReason::ObjectRestore(_))
    ));
    assert_eq!(session.manager.state(), SessionState::Failed);
    assert_eq!(
        session.tracker.calls().last(),
        Some(&TrackerCall::ClearAllState)
    );
}

#[tokio::test]
async fn test_malformed_ledger_under_skip_policy_still_localizes() {
    let mut session = TestSession::new();
    let signature = session.scan().await;
    session
        .manager
        .place_object(Position::new(2.0, 0.0, 2.0))
        .await
        .unwrap();
    session.manager.exit().await;
    session
        .store
        .append_record(&blob_name(&signature, ArtifactKind::Objects), "(a, b, c)")
        .unwrap();

    let pending = session.manager.begin_localize().await.unwrap();
    session.manager.process_pending().await;

    match pending.await.unwrap() {
        LocalizeOutcome::Localized {
            restored, rejected, ..
        } => {
            assert_eq!(restored, vec![Position::new(2.0, 0.0, 2.0)]);
            assert_eq!(rejected, 1);
        }
        other => panic!("Expected localization, got {:?}", other),
    }
}

#[test]
fn test_room_123_ledger_example() {
    let dir = tempfile::tempdir().unwrap();
    let store = anchorkeep::BlobStore::open(dir.path()).unwrap();
    let ledger = ObjectLedger::new(store.clone(), MalformedRecordPolicy::Skip);
    let room = MapSignature::parse("room_123").unwrap();

    ledger.append(&room, Position::new(1.0, 0.0, 2.0)).unwrap();
    ledger.append(&room, Position::new(0.0, 0.0, 3.0)).unwrap();
    assert_eq!(
        ledger.load_all(&room).unwrap().positions,
        vec![Position::new(1.0, 0.0, 2.0), Position::new(0.0, 0.0, 3.0)]
    );

    ledger.clear_all(&room).unwrap();
    assert!(!store.exists("room_123_objects"));
}
