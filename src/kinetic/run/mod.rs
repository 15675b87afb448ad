// SPDX-License-Identifier: MIT

//! Run tracking: the state read model and the engine that reconciles
//! event feeds into it.

pub mod engine;
pub mod state;

pub use engine::{ApplyOutcome, EngineConfig, RunEngine, StartOptions};
pub use state::{GraphRunState, NodeProgress, NodeStatus, RunSnapshot, RunStatus};
