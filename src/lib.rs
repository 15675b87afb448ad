// SPDX-License-Identifier: MIT

//! kinetic-monitor
//!
//! Layout and live run-state tracking for remotely executed workflow graphs.
//!
//! - [`kinetic::graph`] turns a graph definition into a stable 2D layout
//! - [`kinetic::events`] normalises both historical wire-event shapes
//! - [`kinetic::run`] reconciles the event feed into one `GraphRunState`

pub mod kinetic;
