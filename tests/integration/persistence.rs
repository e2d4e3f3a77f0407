//! Integration tests for state that must survive a restart

use super::common::fixtures::{localizes, TestSession};
use anchorkeep::engine::mock::EngineCall;
use anchorkeep::session::{KEY_CURRENT_MAP_PATH, KEY_LAST_SIGNATURE};
use anchorkeep::storage::blob_name;
use anchorkeep::{
    AppStateStore, ArtifactKind, Config, LocalizeOutcome, MapSessionStore, Position,
    SessionError, SessionState,
};

#[tokio::test]
async fn test_context_is_written_at_ready() {
    let mut session = TestSession::new();
    let signature = session.scan().await;

    let app_state = AppStateStore::new(session.db.connection());
    assert_eq!(
        app_state.get(KEY_LAST_SIGNATURE).unwrap(),
        Some(signature.as_str().to_string())
    );
    let path = app_state.get(KEY_CURRENT_MAP_PATH).unwrap().unwrap();
    assert!(path.ends_with(&format!("{}_map", signature)));
}

#[tokio::test]
async fn test_restart_restores_last_map_and_objects() {
    let mut session = TestSession::new();
    let signature = session.scan().await;
    let p = Position::new(0.5, 0.0, -1.5);
    session.manager.place_object(p).await.unwrap();
    session.manager.exit().await;

    let mut session = session.restart(Config::default(), localizes());
    assert_eq!(session.manager.state(), SessionState::Idle);
    assert_eq!(
        session.manager.context().last_signature.as_ref(),
        Some(&signature)
    );
    assert!(session.manager.has_saved_map());

    let pending = session.manager.begin_localize().await.unwrap();
    session.manager.process_pending().await;

    match pending.await.unwrap() {
        LocalizeOutcome::Localized {
            signature: localized,
            restored,
            ..
        } => {
            assert_eq!(localized, signature);
            assert_eq!(restored, vec![p]);
        }
        other => panic!("Expected localization, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_scan_after_restart_resumes_saved_map() {
    let mut session = TestSession::new();
    session.scan().await;
    session.manager.exit().await;

    let mut session = session.restart(Config::default(), localizes());
    session.manager.begin_scan().await.unwrap();

    let seeded = session.mapper.calls().into_iter().find_map(|call| match call {
        EngineCall::SetMap(map) => Some(map),
        _ => None,
    });
    assert_eq!(seeded.flatten().map(|g| g.node_count()), Some(3));
}

#[tokio::test]
async fn test_resume_can_be_disabled() {
    let mut session = TestSession::new();
    session.scan().await;
    session.manager.exit().await;

    let mut session = session.restart(Config::default().with_resume(false), localizes());
    session.manager.begin_scan().await.unwrap();

    assert!(session.mapper.calls().contains(&EngineCall::SetMap(None)));
}

#[tokio::test]
async fn test_signatures_keep_increasing_across_restart() {
    let session = TestSession::new();
    let previous = "room_900000000000000000";
    AppStateStore::new(session.db.connection())
        .set(KEY_LAST_SIGNATURE, previous)
        .unwrap();

    let mut session = session.restart(Config::default(), localizes());
    assert_eq!(
        session.manager.context().last_signature.as_ref().map(|s| s.as_str()),
        Some(previous)
    );
    let signature = session.scan().await;

    let ticks = |s: &str| -> u64 { s["room_".len()..].parse().unwrap() };
    assert!(ticks(signature.as_str()) > ticks(previous));
}

#[tokio::test]
async fn test_corrupt_map_cannot_be_localized() {
    let mut session = TestSession::new();
    let signature = session.scan().await;
    session.manager.exit().await;

    let name = blob_name(&signature, ArtifactKind::Map);
    let mut bytes = session.store.read_blob(&name).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    session.store.write_blob(&name, &bytes).unwrap();

    assert!(matches!(
        session.manager.begin_localize().await,
        Err(SessionError::Codec(_))
    ));
    assert_eq!(session.manager.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_deleted_map_means_no_saved_map() {
    let mut session = TestSession::new();
    let signature = session.scan().await;
    session.manager.exit().await;

    session
        .store
        .delete_blob(&blob_name(&signature, ArtifactKind::Map))
        .unwrap();

    assert!(!session.manager.has_saved_map());
    assert!(matches!(
        session.manager.begin_localize().await,
        Err(SessionError::NoSavedMap)
    ));
}

#[tokio::test]
async fn test_each_scan_gets_a_new_signature_and_history_row() {
    let mut session = TestSession::new();
    let first = session.scan().await;
    session.manager.exit().await;
    let second = session.scan().await;

    assert_ne!(first, second);
    assert_eq!(session.manager.context().last_signature.as_ref(), Some(&second));

    let history = MapSessionStore::new(session.db.connection()).list().unwrap();
    let mut signatures: Vec<_> = history.iter().map(|r| r.signature.clone()).collect();
    signatures.sort();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(signatures, expected);
    assert!(history.iter().all(|r| r.node_count == 3 && r.edge_count == 2));

    // Both map blobs stay on disk
    assert!(session.store.exists(&blob_name(&first, ArtifactKind::Map)));
    assert!(session.store.exists(&blob_name(&second, ArtifactKind::Map)));
}

#[tokio::test]
async fn test_ledgers_follow_the_active_signature() {
    let mut session = TestSession::new();
    let first = session.scan().await;
    session
        .manager
        .place_object(Position::new(1.0, 0.0, 0.0))
        .await
        .unwrap();
    session.manager.exit().await;

    let second = session.scan().await;
    session
        .manager
        .place_object(Position::new(2.0, 0.0, 0.0))
        .await
        .unwrap();

    let ledger = session.manager.ledger();
    assert_eq!(
        ledger.load_all(&first).unwrap().positions,
        vec![Position::new(1.0, 0.0, 0.0)]
    );
    assert_eq!(
        ledger.load_all(&second).unwrap().positions,
        vec![Position::new(2.0, 0.0, 0.0)]
    );
}
