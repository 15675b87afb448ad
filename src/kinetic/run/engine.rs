// SPDX-License-Identifier: MIT

//! Run-state reconciliation
//!
//! One `RunEngine` owns the `GraphRunState` of one run. Events are applied
//! synchronously in delivery order, which need not match the order the
//! server produced them in, so every transition is guarded:
//!
//! - a node never leaves a terminal status within a run
//! - events for retired or foreign runs are dropped
//! - while a snapshot is awaited, events are buffered and later replayed
//!   only if they are newer than the snapshot
//! - a snapshot that never comes stops being awaited after
//!   `snapshot_grace_events` buffered events

use super::state::{GraphRunState, NodeProgress, NodeStatus, RunSnapshot, RunStatus};
use crate::kinetic::events::{EventKind, RunEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Engine tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Events held while waiting for a snapshot; the oldest is dropped beyond this
    pub max_buffered_events: usize,
    /// Buffered events after which a missing snapshot is given up on and the
    /// buffer replayed as-is; 0 waits indefinitely
    pub snapshot_grace_events: usize,
    /// Stamp events that carry no timestamp with the current time
    pub stamp_untimed_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffered_events: 1024,
            snapshot_grace_events: 64,
            stamp_untimed_events: true,
        }
    }
}

/// Parameters for an optimistic local start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    /// Node shown as active before the server confirms anything
    pub entry_node: Option<String>,
}

/// What happened to an event handed to [`RunEngine::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed
    Applied,
    /// Held until the awaited snapshot arrives
    Buffered,
    /// Snapshot adopted; `replayed` buffered events were applied after it
    SnapshotAdopted { replayed: usize },
    /// No snapshot within the grace window; the buffer was replayed unfiltered
    SnapshotAbandoned { replayed: usize },
    /// Duplicate, out of order, or no effect on graph state
    Ignored,
    /// Belongs to a run that is not the active one
    Stale,
}

impl ApplyOutcome {
    /// Whether observers should be told about a new state
    pub fn changed_state(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Applied
                | ApplyOutcome::SnapshotAdopted { .. }
                | ApplyOutcome::SnapshotAbandoned { .. }
        )
    }
}

/// Reconciles an event feed into one `GraphRunState`
#[derive(Debug, Clone, Default)]
pub struct RunEngine {
    state: GraphRunState,
    config: EngineConfig,
    awaiting_snapshot: bool,
    buffer: VecDeque<RunEvent>,
    retired_runs: HashSet<String>,
}

impl RunEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Current read model
    pub fn state(&self) -> &GraphRunState {
        &self.state
    }

    pub fn into_state(self) -> GraphRunState {
        self.state
    }

    pub fn is_awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Optimistically start a new run
    ///
    /// Replaces whatever run was live; its id is retired so its late events
    /// are dropped.
    pub fn start(&mut self, options: StartOptions) {
        self.retire_active_run();
        if let Some(run_id) = &options.run_id {
            self.retired_runs.remove(run_id);
        }
        self.buffer.clear();
        self.awaiting_snapshot = false;

        let now = Utc::now();
        let mut state = GraphRunState {
            run_id: options.run_id,
            graph_id: options.graph_id,
            status: RunStatus::Running,
            start_time: Some(now),
            ..Default::default()
        };

        if let Some(entry) = options.entry_node {
            state.node_progress.insert(
                entry.clone(),
                NodeProgress {
                    start_time: Some(now),
                    ..NodeProgress::new(entry.clone(), NodeStatus::Running)
                },
            );
            state.execution_path.push(entry.clone());
            state.current_node_id = Some(entry);
        }

        log::info!(
            "Run {} started locally",
            state.run_id.as_deref().unwrap_or("<pending id>")
        );
        self.state = state;
    }

    /// Discard the live run and return to idle
    pub fn reset(&mut self) {
        self.retire_active_run();
        self.state = GraphRunState::idle();
        self.buffer.clear();
        self.awaiting_snapshot = false;
    }

    /// Buffer incoming events until the next snapshot arrives
    ///
    /// Called by the transport on every (re)connect, before the server's
    /// `init` event.
    pub fn await_snapshot(&mut self) {
        self.awaiting_snapshot = true;
    }

    /// Feed one normalised event
    pub fn apply(&mut self, event: RunEvent) -> ApplyOutcome {
        if self.is_stale(&event) {
            log::debug!(
                "Dropping stale {} for run {:?}",
                event.type_name(),
                event.run_id
            );
            return ApplyOutcome::Stale;
        }

        if self.awaiting_snapshot && !matches!(event.kind, EventKind::Init { .. }) {
            if self.buffer.len() >= self.config.max_buffered_events {
                if let Some(dropped) = self.buffer.pop_front() {
                    log::warn!(
                        "Snapshot buffer full ({}), dropping oldest {}",
                        self.config.max_buffered_events,
                        dropped.type_name()
                    );
                }
            }
            self.buffer.push_back(event);

            let grace = self.config.snapshot_grace_events;
            if grace > 0 && self.buffer.len() >= grace {
                log::warn!("No snapshot after {} buffered events, replaying them", grace);
                let replayed = self.release_snapshot_wait();
                return ApplyOutcome::SnapshotAbandoned { replayed };
            }
            return ApplyOutcome::Buffered;
        }

        self.apply_live(event)
    }

    /// Feed a raw wire event of either historical shape
    pub fn apply_raw(&mut self, value: &serde_json::Value) -> ApplyOutcome {
        match crate::kinetic::events::normalize(value) {
            Some(event) => self.apply(event),
            None => ApplyOutcome::Ignored,
        }
    }

    /// Stop waiting for a snapshot and replay everything buffered
    ///
    /// For streams that end, or run long, without ever sending `init`.
    /// Returns the number of replayed events.
    pub fn release_snapshot_wait(&mut self) -> usize {
        if !self.awaiting_snapshot {
            return 0;
        }
        self.replay_buffer(None)
    }

    /// Adopt a snapshot wholesale, then replay buffered events newer than it
    ///
    /// Without a snapshot timestamp every buffered event is replayed and the
    /// node guards absorb overlap. A snapshot of a retired or foreign run is
    /// `Stale`; the engine keeps waiting for a usable one.
    pub fn load_from_snapshot(&mut self, snapshot: RunSnapshot) -> ApplyOutcome {
        if let Some(run_id) = &snapshot.run_id {
            if self.retired_runs.contains(run_id) || self.conflicts(&self.state.run_id, run_id) {
                log::debug!("Ignoring snapshot for inactive run {}", run_id);
                return ApplyOutcome::Stale;
            }
        }

        let state_timestamp = snapshot.state_timestamp;
        log::info!(
            "Adopting snapshot for run {:?} ({} nodes, path length {})",
            snapshot.run_id,
            snapshot.node_progress.len(),
            snapshot.execution_path.len()
        );
        self.state = snapshot.into_state();
        let replayed = self.replay_buffer(state_timestamp);
        ApplyOutcome::SnapshotAdopted { replayed }
    }

    fn replay_buffer(&mut self, newer_than: Option<DateTime<Utc>>) -> usize {
        self.awaiting_snapshot = false;
        let buffered = std::mem::take(&mut self.buffer);
        let mut replayed = 0;

        for event in buffered {
            if self.is_stale(&event) {
                continue;
            }
            let newer = match (newer_than, event.timestamp) {
                (None, _) => true,
                (Some(cutoff), Some(ts)) => ts > cutoff,
                (Some(_), None) => false,
            };
            if !newer {
                log::debug!("Discarding buffered {} covered by snapshot", event.type_name());
                continue;
            }
            self.apply_live(event);
            replayed += 1;
        }
        replayed
    }

    fn apply_live(&mut self, event: RunEvent) -> ApplyOutcome {
        let timestamp = event
            .timestamp
            .or_else(|| self.config.stamp_untimed_events.then(Utc::now));

        match event.kind {
            EventKind::Init {
                snapshot: Some(snapshot),
                ..
            } => self.load_from_snapshot(snapshot),
            EventKind::Init { snapshot: None, .. } => {
                let replayed = self.replay_buffer(None);
                ApplyOutcome::SnapshotAdopted { replayed }
            }
            EventKind::GraphStart => {
                let adopted = self.adopt_identity(&event.run_id, &event.graph_id);
                match self.state.status {
                    RunStatus::Idle => {
                        self.state.status = RunStatus::Running;
                        if self.state.start_time.is_none() {
                            self.state.start_time = timestamp;
                        }
                        log::info!("Run {:?} started", self.state.run_id);
                        ApplyOutcome::Applied
                    }
                    _ if adopted => ApplyOutcome::Applied,
                    _ => ApplyOutcome::Ignored,
                }
            }
            EventKind::NodeStart { node_id } => {
                if !self.accepts_node_events(&event.run_id, &event.graph_id, timestamp) {
                    return ApplyOutcome::Ignored;
                }
                match self.state.node_status(&node_id) {
                    NodeStatus::Pending => {
                        self.state.node_progress.insert(
                            node_id.clone(),
                            NodeProgress {
                                start_time: timestamp,
                                ..NodeProgress::new(node_id.clone(), NodeStatus::Running)
                            },
                        );
                    }
                    NodeStatus::Running => return ApplyOutcome::Ignored,
                    // loop re-entry: status and start time stay as first recorded
                    NodeStatus::Completed | NodeStatus::Error => {
                        log::debug!("Node {} re-entered", node_id);
                    }
                }
                self.state.execution_path.push(node_id.clone());
                self.state.current_node_id = Some(node_id);
                ApplyOutcome::Applied
            }
            EventKind::NodeProgress {
                node_id,
                step,
                progress,
                ..
            } => {
                if self.state.status.is_terminal() {
                    return ApplyOutcome::Ignored;
                }
                match self.state.node_progress.get_mut(&node_id) {
                    Some(node) if node.status == NodeStatus::Running => {
                        if step.is_some() {
                            node.step_name = step;
                        }
                        if progress.is_some() {
                            node.progress = progress;
                        }
                        ApplyOutcome::Applied
                    }
                    _ => ApplyOutcome::Ignored,
                }
            }
            EventKind::NodeComplete { node_id } => self.finish_node(
                node_id,
                NodeStatus::Completed,
                None,
                &event.run_id,
                &event.graph_id,
                timestamp,
            ),
            EventKind::NodeError { node_id, error } => self.finish_node(
                node_id,
                NodeStatus::Error,
                error,
                &event.run_id,
                &event.graph_id,
                timestamp,
            ),
            EventKind::GraphComplete | EventKind::RunComplete => {
                self.adopt_identity(&event.run_id, &event.graph_id);
                self.finish_run(RunStatus::Completed, None, timestamp)
            }
            EventKind::GraphError { error } | EventKind::RunError { error } => {
                self.adopt_identity(&event.run_id, &event.graph_id);
                self.finish_run(RunStatus::Error, error, timestamp)
            }
            EventKind::Tool { phase, name, .. } => {
                log::trace!("Tool {:?} {:?}", phase, name);
                ApplyOutcome::Ignored
            }
        }
    }

    fn finish_node(
        &mut self,
        node_id: String,
        status: NodeStatus,
        error: Option<String>,
        run_id: &Option<String>,
        graph_id: &Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> ApplyOutcome {
        if !self.accepts_node_events(run_id, graph_id, timestamp) {
            return ApplyOutcome::Ignored;
        }

        if !self.state.node_progress.contains_key(&node_id) {
            // Finished without a start we saw; it still ran
            self.state.execution_path.push(node_id.clone());
        }
        let node = self
            .state
            .node_progress
            .entry(node_id.clone())
            .or_insert_with(|| NodeProgress::new(node_id.clone(), NodeStatus::Pending));

        if node.status.is_terminal() {
            log::debug!("Ignoring repeated terminal event for node {}", node_id);
            return ApplyOutcome::Ignored;
        }

        if status == NodeStatus::Error {
            log::warn!(
                "Node {} failed: {}",
                node_id,
                error.as_deref().unwrap_or("unknown error")
            );
        }
        node.status = status;
        node.end_time = timestamp;
        node.error = error;
        ApplyOutcome::Applied
    }

    /// Terminal run-level event
    ///
    /// Nodes still running are coerced to completed: the feed carries no
    /// signal telling a finished node from an abandoned one.
    fn finish_run(
        &mut self,
        status: RunStatus,
        error: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> ApplyOutcome {
        if self.state.status.is_terminal() {
            return ApplyOutcome::Ignored;
        }

        for node in self.state.node_progress.values_mut() {
            if node.status == NodeStatus::Running {
                node.status = NodeStatus::Completed;
                node.end_time = timestamp;
            }
        }

        self.state.status = status;
        self.state.end_time = timestamp;
        self.state.current_node_id = None;
        if status == RunStatus::Error {
            self.state.error = Some(error.unwrap_or_else(|| "Run failed".to_string()));
        }

        log::info!("Run {:?} finished: {:?}", self.state.run_id, status);
        ApplyOutcome::Applied
    }

    /// Node events are refused once the run is terminal; while idle they
    /// imply a run we subscribed to late.
    fn accepts_node_events(
        &mut self,
        run_id: &Option<String>,
        graph_id: &Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        if self.state.status.is_terminal() {
            return false;
        }
        self.adopt_identity(run_id, graph_id);
        if self.state.status == RunStatus::Idle {
            log::debug!("Node event while idle, promoting run to running");
            self.state.status = RunStatus::Running;
            if self.state.start_time.is_none() {
                self.state.start_time = timestamp;
            }
        }
        true
    }

    /// Take run/graph ids from an event when the state has none yet
    fn adopt_identity(&mut self, run_id: &Option<String>, graph_id: &Option<String>) -> bool {
        let mut adopted = false;
        if self.state.run_id.is_none() {
            if let Some(id) = run_id {
                self.state.run_id = Some(id.clone());
                adopted = true;
            }
        }
        if self.state.graph_id.is_none() {
            if let Some(id) = graph_id {
                self.state.graph_id = Some(id.clone());
                adopted = true;
            }
        }
        adopted
    }

    fn is_stale(&self, event: &RunEvent) -> bool {
        match &event.run_id {
            Some(id) if self.retired_runs.contains(id) => return true,
            Some(id) if self.conflicts(&self.state.run_id, id) => return true,
            _ => {}
        }
        match &event.graph_id {
            Some(id) => self.conflicts(&self.state.graph_id, id),
            None => false,
        }
    }

    fn conflicts(&self, active: &Option<String>, incoming: &str) -> bool {
        active.as_deref().is_some_and(|a| a != incoming)
    }

    fn retire_active_run(&mut self) {
        if let Some(run_id) = self.state.run_id.take() {
            log::debug!("Retiring run {}", run_id);
            self.retired_runs.insert(run_id);
        }
    }
}
