// SPDX-License-Identifier: MIT

//! Independent run engines keyed by run id
//!
//! Runs never share state; each has its own engine and its own set of
//! state subscribers.

use crate::kinetic::error::MonitorError;
use crate::kinetic::run::{ApplyOutcome, EngineConfig, GraphRunState, RunEngine, StartOptions};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

const SUBSCRIBER_CAPACITY: usize = 64;

struct RunEntry {
    engine: RunEngine,
    subscribers: Vec<mpsc::Sender<GraphRunState>>,
}

impl RunEntry {
    /// Push the current state to every live subscriber
    fn notify(&mut self) {
        let state = self.engine.state();
        self.subscribers.retain(|tx| match tx.try_send(state.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Subscriber lagging, skipping one state update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
    config: EngineConfig,
}

impl RunRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Create an engine and start it optimistically
    ///
    /// The run id is taken from `options` or generated.
    pub async fn create(&self, mut options: StartOptions) -> (String, GraphRunState) {
        let id = options
            .run_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let mut engine = RunEngine::new(self.config.clone());
        engine.start(options);
        let state = engine.state().clone();

        let mut runs = self.runs.write().await;
        if runs.contains_key(&id) {
            log::warn!("Replacing existing run {}", id);
        }
        runs.insert(
            id.clone(),
            RunEntry {
                engine,
                subscribers: Vec::new(),
            },
        );
        (id, state)
    }

    pub async fn state(&self, id: &str) -> Result<GraphRunState, MonitorError> {
        let runs = self.runs.read().await;
        runs.get(id)
            .map(|entry| entry.engine.state().clone())
            .ok_or_else(|| MonitorError::run_not_found(id))
    }

    /// Apply one raw wire event to a run
    pub async fn apply(
        &self,
        id: &str,
        event: &Value,
    ) -> Result<(ApplyOutcome, GraphRunState), MonitorError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(id)
            .ok_or_else(|| MonitorError::run_not_found(id))?;

        let outcome = entry.engine.apply_raw(event);
        if outcome.changed_state() {
            entry.notify();
        }
        Ok((outcome, entry.engine.state().clone()))
    }

    /// Put a run back into snapshot-await mode
    pub async fn await_snapshot(&self, id: &str) -> Result<(), MonitorError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(id)
            .ok_or_else(|| MonitorError::run_not_found(id))?;
        entry.engine.await_snapshot();
        Ok(())
    }

    pub async fn reset(&self, id: &str) -> Result<GraphRunState, MonitorError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(id)
            .ok_or_else(|| MonitorError::run_not_found(id))?;
        entry.engine.reset();
        entry.notify();
        Ok(entry.engine.state().clone())
    }

    pub async fn remove(&self, id: &str) -> Result<(), MonitorError> {
        let mut runs = self.runs.write().await;
        runs.remove(id)
            .map(|_| ())
            .ok_or_else(|| MonitorError::run_not_found(id))
    }

    /// Receive the run's state now and after every change
    pub async fn subscribe(&self, id: &str) -> Result<mpsc::Receiver<GraphRunState>, MonitorError> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(id)
            .ok_or_else(|| MonitorError::run_not_found(id))?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        // capacity is non-zero and the receiver is alive
        let _ = tx.try_send(entry.engine.state().clone());
        entry.subscribers.push(tx);
        Ok(rx)
    }

    pub async fn ids(&self) -> Vec<String> {
        let runs = self.runs.read().await;
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::run::{NodeStatus, RunStatus};
    use serde_json::json;

    fn start(run_id: &str) -> StartOptions {
        StartOptions {
            run_id: Some(run_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_generates_id() {
        let registry = RunRegistry::default();
        let (id, state) = registry.create(StartOptions::default()).await;

        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(state.run_id.as_deref(), Some(id.as_str()));
        assert_eq!(state.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let registry = RunRegistry::default();
        registry.create(start("r1")).await;
        registry.create(start("r2")).await;

        registry
            .apply("r1", &json!({"type": "node_start", "nodeId": "a"}))
            .await
            .unwrap();

        assert_eq!(
            registry.state("r1").await.unwrap().node_status("a"),
            NodeStatus::Running
        );
        assert_eq!(
            registry.state("r2").await.unwrap().node_status("a"),
            NodeStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_foreign_run_event_is_stale() {
        let registry = RunRegistry::default();
        registry.create(start("r1")).await;

        let (outcome, state) = registry
            .apply("r1", &json!({"type": "node_start", "nodeId": "a", "runId": "r2"}))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert!(state.node("a").is_none());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let registry = RunRegistry::default();
        assert!(matches!(
            registry.state("missing").await,
            Err(MonitorError::RunNotFound { .. })
        ));
        assert!(registry.remove("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_sees_initial_and_changes() {
        let registry = RunRegistry::default();
        registry.create(start("r1")).await;
        let mut rx = registry.subscribe("r1").await.unwrap();

        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.status, RunStatus::Running);

        registry
            .apply("r1", &json!({"type": "run_complete"}))
            .await
            .unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.status, RunStatus::Completed);

        // ignored events are not pushed
        registry
            .apply("r1", &json!({"type": "run_complete"}))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_and_remove() {
        let registry = RunRegistry::default();
        registry.create(start("r1")).await;

        let state = registry.reset("r1").await.unwrap();
        assert_eq!(state, GraphRunState::idle());

        registry.remove("r1").await.unwrap();
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_is_clone() {
        let registry = RunRegistry::default();
        let cloned = registry.clone();
        cloned.create(start("r1")).await;
        assert_eq!(registry.ids().await, vec!["r1"]);
    }
}
