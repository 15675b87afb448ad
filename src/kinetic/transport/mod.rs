// SPDX-License-Identifier: MIT

//! Event transport: SSE decoding and the subscription that feeds an engine

pub mod client;
pub mod sse;

pub use client::{EventSource, HttpEventSource, ReconnectPolicy, Subscription};
pub use sse::{decode_capture, SseDecoder, StreamItem, DONE_SENTINEL};
