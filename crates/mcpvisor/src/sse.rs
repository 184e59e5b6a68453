//! SSE (Server-Sent Events) transport for remote MCP servers.
//!
//! The connection is a long-lived GET whose body is an event stream. A
//! background reader timestamps every line received (events and keep-alive
//! comments alike) so the healthcheck can tell a live stream from a stalled
//! one.

use crate::protocol::LineBuffer;
use crate::server::{SseConfig, TransportKind};
use crate::transport::{format_duration, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures::StreamExt;
use mcpvisor_util::expand_env;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default window after which a silent stream is considered stalled.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// What the reader task has observed on the stream.
#[derive(Debug, Default)]
struct StreamActivity {
    last_seen: Mutex<Option<Instant>>,
    endpoint: Mutex<Option<String>>,
    close_reason: Mutex<Option<String>>,
    closed: AtomicBool,
    events: AtomicU64,
}

impl StreamActivity {
    fn touch(&self) {
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Some(Instant::now());
        }
    }

    fn close(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.close_reason.lock() {
            slot.get_or_insert(reason.into());
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().ok().and_then(|e| e.clone())
    }

    fn check(&self, now: Instant, stale_after: Duration) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            let reason = self
                .close_reason
                .lock()
                .ok()
                .and_then(|r| r.clone())
                .unwrap_or_else(|| "closed".to_string());
            return Err(TransportError::new(format!("Event stream {reason}")));
        }
        let last = self.last_seen.lock().ok().and_then(|l| *l);
        match last {
            Some(last) if now.saturating_duration_since(last) <= stale_after => Ok(()),
            Some(_) => Err(TransportError::new(format!(
                "No events received for {}",
                format_duration(stale_after)
            ))),
            None => Err(TransportError::new("No events received")),
        }
    }

    /// Apply one complete line of the event stream.
    fn handle_line(&self, line: &str, current_event: &mut Option<String>) {
        self.touch();
        if line.is_empty() {
            // Blank line terminates an event.
            if current_event.take().is_some() {
                self.events.fetch_add(1, Ordering::SeqCst);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(name) = line.strip_prefix("event:") {
            *current_event = Some(name.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            let event = current_event.get_or_insert_with(|| "message".to_string());
            if event.as_str() == "endpoint" {
                if let Ok(mut endpoint) = self.endpoint.lock() {
                    *endpoint = Some(data.trim().to_string());
                }
            }
        }
    }
}

/// SSE transport.
pub struct SseTransport {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    stale_after: Duration,
    cancel: Option<CancellationToken>,
    reader: Option<JoinHandle<()>>,
    activity: Arc<StreamActivity>,
}

impl SseTransport {
    pub fn new(name: &str, config: &SseConfig, timeout: Duration) -> TransportResult<Self> {
        reqwest::Url::parse(&config.url)
            .map_err(|e| TransportError::new(format!("Invalid url '{}': {e}", config.url)))?;

        Ok(Self {
            name: name.to_string(),
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v)))
                .collect(),
            timeout,
            stale_after: DEFAULT_STALE_AFTER,
            cancel: None,
            reader: None,
            activity: Arc::new(StreamActivity::default()),
        })
    }

    /// Override the staleness window.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    async fn stop_reader(&mut self, wait: bool) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(reader) = self.reader.take() {
            if wait {
                if tokio::time::timeout(Duration::from_secs(1), reader).await.is_err() {
                    warn!(server = %self.name, "SSE reader did not stop in time");
                }
            } else {
                reader.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.reader.is_some() {
            return Err(TransportError::new("Already connected"));
        }

        // No overall timeout: the body is meant to stay open.
        let client = Client::builder()
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::new(format!("Failed to create HTTP client: {e}")))?;

        let mut req = client
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }

        debug!(server = %self.name, url = %self.url, "Opening SSE stream");
        let response = req.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::new(format!(
                "Authentication required ({status})"
            )));
        }
        if !status.is_success() {
            return Err(TransportError::new(format!("Server returned {status}")));
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/event-stream") {
            return Err(TransportError::new(format!(
                "Expected text/event-stream, got '{content_type}'"
            )));
        }

        let activity = Arc::new(StreamActivity::default());
        activity.touch();
        self.activity = Arc::clone(&activity);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name.clone();
        let mut stream = response.bytes_stream();

        self.reader = Some(tokio::spawn(async move {
            let mut lines = LineBuffer::new();
            let mut current_event = None;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        activity.close("closed by client");
                        break;
                    }
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            if let Err(e) = lines.push(&bytes) {
                                warn!(server = %name, error = %e, "Dropping SSE stream");
                                activity.close(format!("failed: {e}"));
                                break;
                            }
                            while let Some(line) = lines.next_line() {
                                activity.handle_line(&line, &mut current_event);
                            }
                        }
                        Some(Err(e)) => {
                            debug!(server = %name, error = %e, "SSE stream error");
                            activity.close(format!("failed: {e}"));
                            break;
                        }
                        None => {
                            debug!(server = %name, "SSE stream ended");
                            activity.close("ended by server");
                            break;
                        }
                    }
                }
            }
        }));
        self.cancel = Some(cancel);
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.stop_reader(true).await;
        Ok(())
    }

    async fn healthcheck(&mut self) -> TransportResult<()> {
        if self.reader.is_none() {
            return Err(TransportError::new("Not connected"));
        }
        self.activity.check(Instant::now(), self.stale_after)
    }

    async fn force_terminate(&mut self) {
        self.stop_reader(false).await;
    }

    fn metadata(&self) -> Vec<(String, String)> {
        let mut meta = vec![
            ("transport".to_string(), "sse".to_string()),
            ("url".to_string(), self.url.clone()),
            (
                "events_received".to_string(),
                self.activity.events.load(Ordering::SeqCst).to_string(),
            ),
        ];
        if let Some(endpoint) = self.activity.endpoint() {
            meta.push(("endpoint".to_string(), endpoint));
        }
        meta
    }
}
