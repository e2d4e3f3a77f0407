//! The session state machine.
//!
//! [`SessionManager`] is the only writer of [`SessionState`]. Commands run on
//! the caller's task and suspend only while awaiting a collaborator.
//! Completions arrive later as [`EngineEvent`]s and are fed back in through
//! [`SessionManager::process_event`] (or the `process_pending` and
//! `next_event` helpers). Each scan or localization hands the caller a
//! [`PendingOutcome`] that resolves at most once.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use super::context::SessionContext;
use super::outcome::{FailureReason, LocalizeOutcome, MappingOutcome};
use super::state::{Command, SessionEvent, SessionState};
use crate::config::Config;
use crate::data::{AppStateStore, Database, MapSessionRecord, MapSessionStore};
use crate::dispatch::{EventDispatcher, PendingOutcome, SubscriptionToken};
use crate::engine::{
    EngineError, EngineEvent, EngineEventReceiver, FinalizedMap, MappingEngine, RunId, Tracker,
    TrackingStatus,
};
use crate::error::SessionError;
use crate::ledger::{ObjectLedger, Position};
use crate::map::{deserialize, merge, serialize, validate, MapGraph};
use crate::storage::{blob_name, ArtifactKind, BlobStore, StorageError};
use crate::util::{MapSignature, SignatureGenerator};

const STATE_EVENT_CAPACITY: usize = 64;

/// External collaborators driven by the session manager
pub struct Engines {
    pub mapper: Arc<dyn MappingEngine>,
    pub tracker: Arc<dyn Tracker>,
    /// Completion events pushed by `mapper` and `tracker`
    pub events: EngineEventReceiver,
}

pub struct SessionManager {
    config: Config,
    mapper: Arc<dyn MappingEngine>,
    tracker: Arc<dyn Tracker>,
    events: EngineEventReceiver,
    store: BlobStore,
    ledger: ObjectLedger,
    app_state: AppStateStore,
    map_sessions: MapSessionStore,
    state: SessionState,
    context: SessionContext,
    signatures: SignatureGenerator,
    mapping: EventDispatcher<MappingOutcome>,
    localize: EventDispatcher<LocalizeOutcome>,
    mapping_token: Option<SubscriptionToken>,
    localize_token: Option<SubscriptionToken>,
    last_run: u64,
    state_tx: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Build a manager in `Idle`, restoring the durable context from `db`
    pub fn new(
        config: Config,
        engines: Engines,
        store: BlobStore,
        db: &Database,
    ) -> Result<Self, SessionError> {
        let mut signatures = SignatureGenerator::new(config.session.signature_prefix.clone())?;
        let app_state = AppStateStore::new(db.connection());
        let map_sessions = MapSessionStore::new(db.connection());
        let context = SessionContext::restore(&app_state)?;
        if let Some(last) = &context.last_signature {
            signatures.resume_after(last);
        }
        let ledger = ObjectLedger::new(store.clone(), config.ledger.malformed_records);
        let (state_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);

        tracing::info!(
            last_signature = ?context.last_signature.as_ref().map(MapSignature::as_str),
            current_map_path = ?context.current_map_path,
            "Restored session context"
        );

        Ok(Self {
            config,
            mapper: engines.mapper,
            tracker: engines.tracker,
            events: engines.events,
            store,
            ledger,
            app_state,
            map_sessions,
            state: SessionState::Idle,
            context,
            signatures,
            mapping: EventDispatcher::new("mapping"),
            localize: EventDispatcher::new("localize"),
            mapping_token: None,
            localize_token: None,
            last_run: 0,
            state_tx,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &ObjectLedger {
        &self.ledger
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Observe state changes
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state_tx.subscribe()
    }

    /// Signature of the last map, if its map blob is still on disk
    pub fn saved_signature(&self) -> Option<MapSignature> {
        self.context
            .last_signature
            .clone()
            .filter(|sig| self.store.exists(&blob_name(sig, ArtifactKind::Map)))
    }

    /// Whether there is a saved map to localize against
    pub fn has_saved_map(&self) -> bool {
        self.saved_signature().is_some()
    }

    fn require(&self, command: Command) -> Result<(), SessionError> {
        if self.state.allows(command) {
            Ok(())
        } else {
            tracing::warn!(command = %command, state = %self.state, "Rejected command");
            Err(SessionError::protocol(command, self.state))
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(from = %from, to = %to, "Session state changed");
        // No receivers is fine
        let _ = self.state_tx.send(SessionEvent::StateChanged { from, to });
    }

    fn next_run(&mut self) -> RunId {
        self.last_run += 1;
        RunId(self.last_run)
    }

    fn active_signature(&self) -> Result<MapSignature, SessionError> {
        self.context
            .last_signature
            .clone()
            .ok_or(SessionError::NoSavedMap)
    }

    /// Disable then re-enable the engine, yielding after each step
    async fn reset_mapper(&self) -> Result<(), EngineError> {
        tracing::debug!("Resetting mapping engine");
        self.mapper.set_enabled(false).await?;
        tokio::task::yield_now().await;
        self.mapper.set_enabled(true).await?;
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Push mapping settings to the engine and reset it so they apply
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.require(Command::Configure)?;
        let settings = self.config.mapping;
        self.mapper.configure(settings).await?;
        self.reset_mapper().await?;
        tracing::info!(
            splitter_max_distance_m = settings.splitter_max_distance_m,
            splitter_max_duration_s = settings.splitter_max_duration_s,
            edge_output = ?settings.edge_output,
            "Mapping engine configured"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Start a mapping run. The returned outcome resolves when the engine
    /// finalizes, or is cancelled by `stop_scan`/`exit`.
    pub async fn begin_scan(&mut self) -> Result<PendingOutcome<MappingOutcome>, SessionError> {
        self.require(Command::BeginScan)?;

        match self.start_scan().await {
            Ok(pending) => Ok(pending),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start scan");
                self.release_mapping();
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn start_scan(&mut self) -> Result<PendingOutcome<MappingOutcome>, SessionError> {
        self.reset_mapper().await?;

        let seed = self.load_resume_map()?;
        let resumed = seed.is_some();
        self.mapper.set_map(seed).await?;

        let run = self.next_run();
        let (token, pending) = self.mapping.subscribe(run)?;
        self.mapping_token = Some(token);
        self.transition(SessionState::Scanning);

        self.mapper.start_mapping(run).await?;
        tracing::info!(run = %run, resumed, "Scan started");
        Ok(pending)
    }

    /// The map to seed a new scan with. A stale or unreadable current-map
    /// path is dropped and the scan starts empty.
    fn load_resume_map(&mut self) -> Result<Option<MapGraph>, SessionError> {
        if !self.config.session.resume_from_current_map {
            return Ok(None);
        }
        let Some(path) = self.context.current_map_path.clone() else {
            return Ok(None);
        };

        let bytes = match self.store.read_path(&path) {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(path = %path.display(), "Current map is gone; starting empty");
                self.drop_current_map_path()?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match deserialize(&bytes).and_then(|graph| validate(&graph).map(|_| graph)) {
            Ok(graph) => {
                tracing::info!(
                    path = %path.display(),
                    nodes = graph.node_count(),
                    "Resuming from current map"
                );
                Ok(Some(graph))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Current map is unusable; starting empty");
                self.drop_current_map_path()?;
                Ok(None)
            }
        }
    }

    fn drop_current_map_path(&mut self) -> Result<(), SessionError> {
        self.context.current_map_path = None;
        self.context.persist(&self.app_state)?;
        Ok(())
    }

    /// End mapping and keep waiting for the engine to finalize the run
    pub async fn finish_scan(&mut self) -> Result<(), SessionError> {
        self.require(Command::FinishScan)?;

        if let Err(e) = self.mapper.stop_mapping().await {
            tracing::error!(error = %e, "Failed to finish scan");
            self.release_mapping();
            self.transition(SessionState::Failed);
            return Err(e.into());
        }
        tracing::info!(run = ?self.mapping.current_run(), "Finishing scan");
        Ok(())
    }

    /// Cancel mapping. No outcome is delivered for the cancelled run.
    pub async fn stop_scan(&mut self) -> Result<(), SessionError> {
        self.require(Command::StopScan)?;

        // Unsubscribe before stopping: the engine may finalize on stop
        self.release_mapping();
        if let Err(e) = self.mapper.stop_mapping().await {
            tracing::warn!(error = %e, "Engine failed to stop mapping");
        }
        self.transition(SessionState::Idle);
        tracing::info!("Scan cancelled");
        Ok(())
    }

    fn release_mapping(&mut self) {
        if let Some(token) = self.mapping_token.take() {
            self.mapping.unsubscribe(token);
        }
    }

    fn on_map_finalized(&mut self, run: RunId, map: Option<FinalizedMap>) -> bool {
        if self.state != SessionState::Scanning || !self.mapping.accepts(run) {
            tracing::warn!(run = %run, state = %self.state, "Dropping stale map finalization");
            return false;
        }

        self.transition(SessionState::Finalizing);
        let outcome = match self.persist_map(map) {
            Ok((signature, map_path)) => {
                self.transition(SessionState::Ready);
                MappingOutcome::Succeeded {
                    signature,
                    map_path,
                }
            }
            Err(reason) => {
                tracing::warn!(run = %run, reason = %reason, "Scan failed");
                self.transition(SessionState::Failed);
                MappingOutcome::Failed(reason)
            }
        };

        self.mapping.deliver(run, outcome);
        self.mapping_token = None;
        true
    }

    /// Merge, validate and write the finalized map, then record it as the
    /// current map. Nothing is left on disk when this fails.
    fn persist_map(
        &mut self,
        map: Option<FinalizedMap>,
    ) -> Result<(MapSignature, PathBuf), FailureReason> {
        let map = map
            .filter(FinalizedMap::has_content)
            .ok_or(FailureReason::NoMapProduced)?;
        let graph =
            merge(&map.subgraphs).map_err(|e| FailureReason::InvalidMap(e.to_string()))?;
        validate(&graph).map_err(|e| FailureReason::InvalidMap(e.to_string()))?;

        let signature = self.signatures.next();
        let name = blob_name(&signature, ArtifactKind::Map);
        let bytes = serialize(&graph);
        let map_path = self.store.write_blob(&name, &bytes).map_err(|e| {
            tracing::error!(signature = %signature, error = %e, "Failed to write map");
            FailureReason::Persistence(e.to_string())
        })?;

        let context = SessionContext::new(signature.clone(), map_path.clone());
        if let Err(e) = context.persist(&self.app_state) {
            tracing::error!(signature = %signature, error = %e, "Failed to persist session context");
            if let Err(cleanup) = self.store.delete_blob(&name) {
                tracing::warn!(name = %name, error = %cleanup, "Failed to remove orphaned map");
            }
            return Err(FailureReason::Persistence(e.to_string()));
        }
        self.context = context;

        let record = MapSessionRecord {
            signature: signature.clone(),
            map_path: map_path.clone(),
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.map_sessions.record(&record) {
            tracing::warn!(signature = %signature, error = %e, "Failed to record map history");
        }

        tracing::info!(
            signature = %signature,
            path = %map_path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            bytes = bytes.len(),
            "Persisted map"
        );
        Ok((signature, map_path))
    }

    // ------------------------------------------------------------------
    // Localization
    // ------------------------------------------------------------------

    /// Start localizing against the last saved map
    pub async fn begin_localize(
        &mut self,
    ) -> Result<PendingOutcome<LocalizeOutcome>, SessionError> {
        self.require(Command::BeginLocalize)?;

        let signature = self.saved_signature().ok_or(SessionError::NoSavedMap)?;
        let bytes = self
            .store
            .read_blob(&blob_name(&signature, ArtifactKind::Map))?;
        let graph = deserialize(&bytes)?;
        validate(&graph)?;

        let run = self.next_run();
        let (token, pending) = self.localize.subscribe(run)?;
        self.localize_token = Some(token);
        self.transition(SessionState::Localizing);

        if let Err(e) = self.tracker.start_tracking(run, graph).await {
            tracing::error!(run = %run, error = %e, "Failed to start tracking");
            self.release_localize();
            self.clear_engines().await;
            self.transition(SessionState::Idle);
            return Err(e.into());
        }
        tracing::info!(run = %run, signature = %signature, "Localization started");
        Ok(pending)
    }

    fn release_localize(&mut self) {
        if let Some(token) = self.localize_token.take() {
            self.localize.unsubscribe(token);
        }
    }

    async fn on_tracking_progress(&mut self, run: RunId, status: TrackingStatus) -> bool {
        if self.state != SessionState::Localizing || !self.localize.accepts(run) {
            tracing::warn!(run = %run, state = %self.state, status = ?status, "Dropping stale tracking progress");
            return false;
        }

        let outcome = match status {
            TrackingStatus::Searching => {
                tracing::debug!(run = %run, "Still searching");
                return true;
            }
            TrackingStatus::Localized => match self.restore_objects().await {
                Ok(outcome) => {
                    self.transition(SessionState::Ready);
                    outcome
                }
                Err(reason) => {
                    tracing::warn!(run = %run, reason = %reason, "Localization failed");
                    self.clear_engines().await;
                    self.transition(SessionState::Failed);
                    LocalizeOutcome::Failed(reason)
                }
            },
            TrackingStatus::Lost => {
                tracing::warn!(run = %run, "Tracking lost; exiting session");
                self.clear_engines().await;
                self.transition(SessionState::Idle);
                LocalizeOutcome::Failed(FailureReason::TrackingLost)
            }
        };

        self.localize.deliver(run, outcome);
        self.localize_token = None;
        true
    }

    /// Re-attach every object recorded for the active map
    async fn restore_objects(&mut self) -> Result<LocalizeOutcome, FailureReason> {
        let signature = self
            .context
            .last_signature
            .clone()
            .ok_or_else(|| FailureReason::ObjectRestore("no active map".to_string()))?;
        let load = self
            .ledger
            .load_all(&signature)
            .map_err(|e| FailureReason::ObjectRestore(e.to_string()))?;

        for position in &load.positions {
            self.tracker
                .attach_object(*position)
                .await
                .map_err(|e| FailureReason::Engine(e.to_string()))?;
        }

        tracing::info!(
            signature = %signature,
            restored = load.positions.len(),
            rejected = load.rejected.len(),
            "Restored placed objects"
        );
        Ok(LocalizeOutcome::Localized {
            signature,
            restored: load.positions,
            rejected: load.rejected.len(),
        })
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Attach an object at an anchor-relative position, then record it.
    ///
    /// A rejected attach records nothing. If the record cannot be written the
    /// object stays attached for this session only and the error is returned.
    pub async fn place_object(&mut self, position: Position) -> Result<(), SessionError> {
        self.require(Command::PlaceObject)?;
        let signature = self.active_signature()?;
        if !position.is_finite() {
            return Err(SessionError::NonFinitePosition(position));
        }

        self.tracker.attach_object(position).await?;
        self.ledger.append(&signature, position)?;
        tracing::info!(signature = %signature, position = %position, "Placed object");
        Ok(())
    }

    /// Clear the durable ledger, then the live objects.
    ///
    /// If the ledger cannot be cleared the live objects are left alone. If
    /// the tracker refuses to detach, the ledger is put back as it was.
    pub async fn clear_objects(&mut self) -> Result<(), SessionError> {
        self.require(Command::ClearObjects)?;
        let signature = self.active_signature()?;

        let snapshot = self.ledger.snapshot(&signature)?;
        self.ledger.clear_all(&signature)?;
        if let Err(e) = self.tracker.detach_all_objects().await {
            if let Err(restore_err) = self.ledger.restore(&signature, snapshot) {
                tracing::error!(
                    signature = %signature,
                    error = %restore_err,
                    "Failed to restore object ledger after detach failure"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exit
    // ------------------------------------------------------------------

    /// Tear everything down and return to `Idle`. Safe from any state and
    /// safe to repeat; pending outcomes are cancelled, never delivered.
    pub async fn exit(&mut self) {
        let from = self.state;

        self.release_mapping();
        self.release_localize();
        self.mapping.cancel();
        self.localize.cancel();

        self.clear_engines().await;
        self.transition(SessionState::Idle);
        tracing::info!(from = %from, "Exited session");
    }

    /// Stop and clear both collaborators. Failures are logged, not returned.
    async fn clear_engines(&self) {
        if let Err(e) = self.mapper.stop_mapping().await {
            tracing::warn!(error = %e, "Failed to stop mapping");
        }
        if let Err(e) = self.mapper.set_enabled(false).await {
            tracing::warn!(error = %e, "Failed to disable mapping engine");
        }
        if let Err(e) = self.mapper.clear_device_map().await {
            tracing::warn!(error = %e, "Failed to clear device map");
        }
        tokio::task::yield_now().await;

        if let Err(e) = self.tracker.clear_all_state().await {
            tracing::warn!(error = %e, "Failed to clear tracker state");
        }
        tokio::task::yield_now().await;
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Handle one collaborator event. Returns false if it was stale.
    pub async fn process_event(&mut self, event: EngineEvent) -> bool {
        tracing::debug!(run = %event.run(), event = event.event_type_name(), "Engine event");
        match event {
            EngineEvent::MapFinalized { run, map } => self.on_map_finalized(run, map),
            EngineEvent::TrackingProgress { run, status } => {
                self.on_tracking_progress(run, status).await
            }
        }
    }

    /// Handle every event already queued. Returns how many were accepted.
    pub async fn process_pending(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.process_event(event).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Wait for the next event and handle it. `None` once every sender is gone.
    pub async fn next_event(&mut self) -> Option<bool> {
        let event = self.events.recv().await?;
        Some(self.process_event(event).await)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("mapping", &self.mapping)
            .field("localize", &self.localize)
            .finish()
    }
}
