//! Mock collaborators for deterministic testing
//!
//! [`MockMappingEngine`] and [`MockTracker`] implement the engine traits
//! without any device behind them. They record every call for ordering
//! assertions and emit scripted completion events into the engine channel.
//!
//! # Example
//! ```no_run
//! use anchorkeep::engine::{engine_channel, FinalizedMap};
//! use anchorkeep::engine::mock::MockMappingEngine;
//!
//! let (events, _rx) = engine_channel();
//! let engine = MockMappingEngine::new(events)
//!     .finalize_on_stop(Some(FinalizedMap::default()));
//! assert!(engine.calls().is_empty());
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    EngineError, EngineEvent, EngineEventSender, FinalizedMap, MappingEngine, MappingSettings,
    RunId, Tracker, TrackingStatus,
};
use crate::ledger::Position;
use crate::map::MapGraph;

/// A call received by [`MockMappingEngine`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Configure(MappingSettings),
    SetEnabled(bool),
    SetMap(Option<MapGraph>),
    StartMapping(RunId),
    StopMapping,
    ClearDeviceMap,
}

impl EngineCall {
    pub fn name(&self) -> &'static str {
        match self {
            EngineCall::Configure(_) => "configure",
            EngineCall::SetEnabled(_) => "set_enabled",
            EngineCall::SetMap(_) => "set_map",
            EngineCall::StartMapping(_) => "start_mapping",
            EngineCall::StopMapping => "stop_mapping",
            EngineCall::ClearDeviceMap => "clear_device_map",
        }
    }
}

/// A call received by [`MockTracker`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCall {
    StartTracking { run: RunId, nodes: usize },
    ClearAllState,
    AttachObject(Position),
    DetachAllObjects,
}

impl TrackerCall {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerCall::StartTracking { .. } => "start_tracking",
            TrackerCall::ClearAllState => "clear_all_state",
            TrackerCall::AttachObject(_) => "attach_object",
            TrackerCall::DetachAllObjects => "detach_all_objects",
        }
    }
}

fn rejected(command: &'static str) -> EngineError {
    EngineError::Rejected {
        command,
        reason: "mock failure".to_string(),
    }
}

/// Mock mapping engine
#[derive(Clone)]
pub struct MockMappingEngine {
    events: EngineEventSender,
    /// What to report when mapping is stopped while a run is live
    finalize_on_stop: Option<Option<FinalizedMap>>,
    /// Command name that should fail
    fail_on: Option<&'static str>,
    calls: Arc<Mutex<Vec<EngineCall>>>,
    running: Arc<Mutex<Option<RunId>>>,
}

impl MockMappingEngine {
    pub fn new(events: EngineEventSender) -> Self {
        Self {
            events,
            finalize_on_stop: None,
            fail_on: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Emit `MapFinalized` with `map` whenever a live run is stopped
    pub fn finalize_on_stop(mut self, map: Option<FinalizedMap>) -> Self {
        self.finalize_on_stop = Some(map);
        self
    }

    /// Make the named command fail (e.g. `"start_mapping"`)
    pub fn failing_on(mut self, command: &'static str) -> Self {
        self.fail_on = Some(command);
        self
    }

    /// Get captured calls for assertions
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Names of captured calls, in order
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(EngineCall::name).collect()
    }

    /// The run currently mapping, if any
    pub fn current_run(&self) -> Option<RunId> {
        *self.running.lock()
    }

    /// Report finalization for the current run, as a real engine would
    /// after finishing on its own. Returns the run it reported for.
    pub fn finalize(&self, map: Option<FinalizedMap>) -> Option<RunId> {
        let run = self.running.lock().take()?;
        self.finalize_run(run, map);
        Some(run)
    }

    /// Report finalization for an arbitrary run (late or stale deliveries)
    pub fn finalize_run(&self, run: RunId, map: Option<FinalizedMap>) {
        self.events.send(EngineEvent::MapFinalized { run, map });
    }

    /// Reset all captured state
    pub fn reset(&self) {
        self.calls.lock().clear();
        *self.running.lock() = None;
    }

    fn record(&self, call: EngineCall) -> Result<(), EngineError> {
        let name = call.name();
        self.calls.lock().push(call);
        if self.fail_on == Some(name) {
            return Err(rejected(name));
        }
        Ok(())
    }
}

#[async_trait]
impl MappingEngine for MockMappingEngine {
    async fn configure(&self, settings: MappingSettings) -> Result<(), EngineError> {
        self.record(EngineCall::Configure(settings))
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.record(EngineCall::SetEnabled(enabled))
    }

    async fn set_map(&self, map: Option<MapGraph>) -> Result<(), EngineError> {
        self.record(EngineCall::SetMap(map))
    }

    async fn start_mapping(&self, run: RunId) -> Result<(), EngineError> {
        self.record(EngineCall::StartMapping(run))?;
        *self.running.lock() = Some(run);
        Ok(())
    }

    async fn stop_mapping(&self) -> Result<(), EngineError> {
        self.record(EngineCall::StopMapping)?;
        let run = self.running.lock().take();
        if let (Some(run), Some(map)) = (run, self.finalize_on_stop.clone()) {
            self.finalize_run(run, map);
        }
        Ok(())
    }

    async fn clear_device_map(&self) -> Result<(), EngineError> {
        self.record(EngineCall::ClearDeviceMap)
    }
}

/// Mock tracker with a scripted sequence of progress reports
#[derive(Clone)]
pub struct MockTracker {
    events: EngineEventSender,
    /// Progress reported as soon as tracking starts
    script: Vec<TrackingStatus>,
    fail_on: Option<&'static str>,
    calls: Arc<Mutex<Vec<TrackerCall>>>,
    attached: Arc<Mutex<Vec<Position>>>,
    running: Arc<Mutex<Option<RunId>>>,
}

impl MockTracker {
    pub fn new(events: EngineEventSender) -> Self {
        Self {
            events,
            script: Vec::new(),
            fail_on: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            attached: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Report these statuses, in order, when tracking starts
    pub fn with_script(mut self, script: Vec<TrackingStatus>) -> Self {
        self.script = script;
        self
    }

    pub fn failing_on(mut self, command: &'static str) -> Self {
        self.fail_on = Some(command);
        self
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.calls.lock().clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(TrackerCall::name).collect()
    }

    /// Live objects currently attached to the anchor
    pub fn attached(&self) -> Vec<Position> {
        self.attached.lock().clone()
    }

    pub fn current_run(&self) -> Option<RunId> {
        *self.running.lock()
    }

    /// Report progress for the current tracking run
    pub fn progress(&self, status: TrackingStatus) -> Option<RunId> {
        let run = (*self.running.lock())?;
        self.progress_run(run, status);
        Some(run)
    }

    /// Report progress for an arbitrary run (late or stale deliveries)
    pub fn progress_run(&self, run: RunId, status: TrackingStatus) {
        self.events
            .send(EngineEvent::TrackingProgress { run, status });
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
        self.attached.lock().clear();
        *self.running.lock() = None;
    }

    fn record(&self, call: TrackerCall) -> Result<(), EngineError> {
        let name = call.name();
        self.calls.lock().push(call);
        if self.fail_on == Some(name) {
            return Err(rejected(name));
        }
        Ok(())
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn start_tracking(&self, run: RunId, map: MapGraph) -> Result<(), EngineError> {
        self.record(TrackerCall::StartTracking {
            run,
            nodes: map.node_count(),
        })?;
        *self.running.lock() = Some(run);
        for status in &self.script {
            self.events.send(EngineEvent::TrackingProgress {
                run,
                status: *status,
            });
        }
        Ok(())
    }

    async fn clear_all_state(&self) -> Result<(), EngineError> {
        self.record(TrackerCall::ClearAllState)?;
        *self.running.lock() = None;
        self.attached.lock().clear();
        Ok(())
    }

    async fn attach_object(&self, position: Position) -> Result<(), EngineError> {
        self.record(TrackerCall::AttachObject(position))?;
        self.attached.lock().push(position);
        Ok(())
    }

    async fn detach_all_objects(&self) -> Result<(), EngineError> {
        self.record(TrackerCall::DetachAllObjects)?;
        self.attached.lock().clear();
        Ok(())
    }
}
