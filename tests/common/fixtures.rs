//! Session harness and map fixtures

use std::path::PathBuf;
use std::sync::Arc;

use anchorkeep::engine::mock::{MockMappingEngine, MockTracker};
use anchorkeep::{
    engine_channel, BlobStore, Config, Database, Engines, FinalizedMap, MapEdge, MapNode,
    MapSubgraph, MappingOutcome, MapSignature, Pose, SessionManager, TrackingStatus,
};
use tempfile::TempDir;

/// A small room: two fragments sharing node 2
pub fn room_map() -> FinalizedMap {
    FinalizedMap::new(vec![
        MapSubgraph::new(
            vec![
                MapNode::new(1, Pose::IDENTITY),
                MapNode::new(2, Pose::at(1.0, 0.0, 0.0)),
            ],
            vec![MapEdge::new(1, 2, 0.9)],
        ),
        MapSubgraph::new(
            vec![
                MapNode::new(2, Pose::at(1.0, 0.0, 0.0)).with_revision(1),
                MapNode::new(3, Pose::at(1.0, 0.0, 2.0)),
            ],
            vec![MapEdge::new(2, 3, 0.8)],
        ),
    ])
}

/// Nodes but no edges: merges fine, fails validation
pub fn edgeless_map() -> FinalizedMap {
    FinalizedMap::new(vec![MapSubgraph::new(
        vec![MapNode::new(1, Pose::IDENTITY)],
        Vec::new(),
    )])
}

/// A session manager over mock engines in a scratch data directory
pub struct TestSession {
    pub dir: TempDir,
    pub db: Database,
    pub store: BlobStore,
    pub mapper: MockMappingEngine,
    pub tracker: MockTracker,
    pub manager: SessionManager,
}

impl TestSession {
    /// Engine finalizes `room_map()` on stop; tracker localizes right away
    pub fn new() -> Self {
        Self::with(Config::default(), Some(room_map()), localizes())
    }

    pub fn with(
        config: Config,
        final_map: Option<FinalizedMap>,
        script: Vec<TrackingStatus>,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Self::open(dir, config, final_map, script)
    }

    /// Like [`TestSession::new`], but the tracker rejects `command`
    pub fn with_tracker_failing(command: &'static str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Self::build(dir, Config::default(), Some(room_map()), localizes(), Some(command))
    }

    /// Open a fresh manager over an existing data directory, as after a restart
    pub fn open(
        dir: TempDir,
        config: Config,
        final_map: Option<FinalizedMap>,
        script: Vec<TrackingStatus>,
    ) -> Self {
        Self::build(dir, config, final_map, script, None)
    }

    fn build(
        dir: TempDir,
        config: Config,
        final_map: Option<FinalizedMap>,
        script: Vec<TrackingStatus>,
        tracker_fails_on: Option<&'static str>,
    ) -> Self {
        let db = Database::open(dir.path().join("anchorkeep.db")).expect("Failed to open database");
        let store = BlobStore::open(dir.path().join("artifacts")).expect("Failed to open store");
        let (tx, rx) = engine_channel();
        let mapper = MockMappingEngine::new(tx.clone()).finalize_on_stop(final_map);
        let mut tracker = MockTracker::new(tx).with_script(script);
        if let Some(command) = tracker_fails_on {
            tracker = tracker.failing_on(command);
        }
        let manager = SessionManager::new(
            config,
            Engines {
                mapper: Arc::new(mapper.clone()),
                tracker: Arc::new(tracker.clone()),
                events: rx,
            },
            store.clone(),
            &db,
        )
        .expect("Failed to create session manager");

        Self {
            dir,
            db,
            store,
            mapper,
            tracker,
            manager,
        }
    }

    /// Drop the manager and reopen the same data directory
    pub fn restart(self, config: Config, script: Vec<TrackingStatus>) -> Self {
        let TestSession { dir, .. } = self;
        Self::open(dir, config, Some(room_map()), script)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    /// Names of every file in the artifact store
    pub fn artifact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.artifacts_dir())
            .expect("Failed to read artifacts")
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Run a complete successful scan and return the new signature
    pub async fn scan(&mut self) -> MapSignature {
        let pending = self.manager.begin_scan().await.expect("begin_scan");
        self.manager.finish_scan().await.expect("finish_scan");
        self.manager.process_pending().await;
        match pending.await.expect("outcome") {
            MappingOutcome::Succeeded { signature, .. } => signature,
            other => panic!("Expected a successful scan, got {:?}", other),
        }
    }
}

pub fn localizes() -> Vec<TrackingStatus> {
    vec![TrackingStatus::Searching, TrackingStatus::Localized]
}
