// SPDX-License-Identifier: MIT

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod registry;
pub mod run;
pub mod server;
pub mod transport;
