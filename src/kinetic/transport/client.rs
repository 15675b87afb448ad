// SPDX-License-Identifier: MIT

//! Event sources and the subscription loop that drives a `RunEngine`

use super::sse::{SseDecoder, StreamItem};
use crate::kinetic::error::TransportError;
use crate::kinetic::run::{ApplyOutcome, GraphRunState, RunEngine};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

/// A connectable feed of raw wire events
///
/// Each call to `connect` opens a fresh stream. The server may lead it with
/// an `init` snapshot; streams without one are replayed once the engine's
/// grace window passes or the stream ends.
#[async_trait]
pub trait EventSource: Send {
    /// Describe the source for logs
    fn describe(&self) -> String;

    /// Open (or reopen) the stream
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Next item, `None` once the connection closed
    async fn next_item(&mut self) -> Result<Option<StreamItem>, TransportError>;
}

/// SSE over HTTP
pub struct HttpEventSource {
    client: Client,
    url: Url,
    response: Option<reqwest::Response>,
    decoder: SseDecoder,
    pending: VecDeque<StreamItem>,
}

impl HttpEventSource {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::new(),
            url: Url::parse(url)?,
            response: None,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.response = None;
        self.decoder = SseDecoder::new();
        self.pending.clear();

        let response = self
            .client
            .get(self.url.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::connect(self.url.as_str(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        log::info!("Connected to {}", self.url);
        self.response = Some(response);
        Ok(())
    }

    async fn next_item(&mut self) -> Result<Option<StreamItem>, TransportError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };

            match response.chunk().await? {
                Some(bytes) => self.pending.extend(self.decoder.feed_bytes(&bytes)),
                None => {
                    self.response = None;
                    return Ok(self.decoder.finish());
                }
            }
        }
    }
}

/// Reconnect policy for [`Subscription::run_with_reconnect`]
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// One engine fed by one source
pub struct Subscription<S> {
    source: S,
    engine: RunEngine,
}

impl<S: EventSource> Subscription<S> {
    pub fn new(source: S, engine: RunEngine) -> Self {
        Self { source, engine }
    }

    pub fn engine(&self) -> &RunEngine {
        &self.engine
    }

    pub fn into_engine(self) -> RunEngine {
        self.engine
    }

    /// Connect once and apply events until the end-of-stream sentinel
    ///
    /// `on_change` sees the state after every event that changed it. A
    /// connection that closes before `[DONE]` is an error; engine state is
    /// left as last applied.
    pub async fn run<F>(&mut self, mut on_change: F) -> Result<(), TransportError>
    where
        F: FnMut(&GraphRunState, ApplyOutcome) + Send,
    {
        self.source.connect().await?;
        self.engine.await_snapshot();

        while let Some(item) = self.source.next_item().await? {
            match item {
                StreamItem::Event(value) => {
                    let outcome = self.engine.apply_raw(&value);
                    if outcome.changed_state() {
                        on_change(self.engine.state(), outcome);
                    }
                }
                StreamItem::Done => {
                    if self.engine.release_snapshot_wait() > 0 {
                        on_change(self.engine.state(), ApplyOutcome::Applied);
                    }
                    log::info!("Stream {} finished", self.source.describe());
                    return Ok(());
                }
            }
        }

        Err(TransportError::Closed(format!(
            "{} closed before end of stream",
            self.source.describe()
        )))
    }

    /// Like [`run`](Self::run), reconnecting after transport failures
    ///
    /// Each reconnect re-enters snapshot-await mode, so the server's next
    /// snapshot resynchronises the engine.
    pub async fn run_with_reconnect<F>(
        &mut self,
        policy: ReconnectPolicy,
        mut on_change: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(&GraphRunState, ApplyOutcome) + Send,
    {
        let mut attempt = 0;
        loop {
            match self.run(&mut on_change).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < policy.max_attempts => {
                    attempt += 1;
                    log::warn!(
                        "Stream {} failed ({}), reconnecting {}/{}",
                        self.source.describe(),
                        e,
                        attempt,
                        policy.max_attempts - 1
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
