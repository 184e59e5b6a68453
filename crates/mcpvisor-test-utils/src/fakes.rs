//! Fake transport adapters.
//!
//! A [`FakeTransportFactory`] hands out [`FakeTransport`]s that share one
//! script and one set of counters, so a test can decide how each connect
//! attempt ends and afterwards check how the controller drove the adapter.

use async_trait::async_trait;
use mcpvisor::{ServerConfig, Transport, TransportError, TransportFactory, TransportKind, TransportResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a connect attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    Fail(String),
    /// Never completes; only a timeout or a cancelling stop ends it.
    Hang,
}

impl ConnectOutcome {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

#[derive(Debug)]
struct FakeState {
    script: Mutex<VecDeque<ConnectOutcome>>,
    fallback: Mutex<ConnectOutcome>,
    connect_delay: Mutex<Duration>,
    disconnect_delay: Mutex<Duration>,
    healthy: AtomicBool,
    created: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    healthchecks: AtomicUsize,
    forced: AtomicUsize,
    configs: Mutex<Vec<ServerConfig>>,
}

impl FakeState {
    fn next_outcome(&self) -> ConnectOutcome {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

/// Factory producing scripted fake adapters.
///
/// Cloning shares the script and the counters.
///
/// # Example
///
/// ```rust
/// use mcpvisor_test_utils::{ConnectOutcome, FakeTransportFactory};
///
/// // Fail twice, then succeed forever.
/// let factory = FakeTransportFactory::new(ConnectOutcome::Succeed)
///     .then(ConnectOutcome::fail("refused"))
///     .then(ConnectOutcome::fail("refused"));
/// assert_eq!(factory.connect_calls(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct FakeTransportFactory {
    state: Arc<FakeState>,
}

impl FakeTransportFactory {
    /// Every connect ends with `fallback` unless scripted otherwise.
    pub fn new(fallback: ConnectOutcome) -> Self {
        Self {
            state: Arc::new(FakeState {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                connect_delay: Mutex::new(Duration::ZERO),
                disconnect_delay: Mutex::new(Duration::ZERO),
                healthy: AtomicBool::new(true),
                created: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                healthchecks: AtomicUsize::new(0),
                forced: AtomicUsize::new(0),
                configs: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(ConnectOutcome::Succeed)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(ConnectOutcome::fail(message))
    }

    /// Queue the outcome of the next unscripted connect.
    pub fn then(self, outcome: ConnectOutcome) -> Self {
        self.state.script.lock().unwrap().push_back(outcome);
        self
    }

    /// Delay before a connect resolves.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock().unwrap() = delay;
        self
    }

    /// Delay before a disconnect resolves; use to exercise forced stops.
    pub fn with_disconnect_delay(self, delay: Duration) -> Self {
        *self.state.disconnect_delay.lock().unwrap() = delay;
        self
    }

    /// Change the outcome used once the script runs out.
    pub fn set_fallback(&self, outcome: ConnectOutcome) {
        *self.state.fallback.lock().unwrap() = outcome;
    }

    /// Make healthchecks pass or fail from now on.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn healthcheck_calls(&self) -> usize {
        self.state.healthchecks.load(Ordering::SeqCst)
    }

    pub fn force_terminate_calls(&self) -> usize {
        self.state.forced.load(Ordering::SeqCst)
    }

    /// Configs adapters were created for, in order.
    pub fn configs(&self) -> Vec<ServerConfig> {
        self.state.configs.lock().unwrap().clone()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(
        &self,
        config: &ServerConfig,
        _timeout: Duration,
    ) -> TransportResult<Box<dyn Transport>> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        self.state.configs.lock().unwrap().push(config.clone());
        Ok(Box::new(FakeTransport {
            kind: config.kind(),
            state: Arc::clone(&self.state),
            connected: false,
        }))
    }
}

/// Adapter driven by a [`FakeTransportFactory`].
#[derive(Debug)]
pub struct FakeTransport {
    kind: TransportKind,
    state: Arc<FakeState>,
    connected: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> TransportResult<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self.state.next_outcome();
        let delay = *self.state.connect_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        match outcome {
            ConnectOutcome::Succeed => {
                self.connected = true;
                Ok(())
            }
            ConnectOutcome::Fail(message) => Err(TransportError::new(message)),
            ConnectOutcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.disconnect_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.connected = false;
        Ok(())
    }

    async fn healthcheck(&mut self) -> TransportResult<()> {
        self.state.healthchecks.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return Err(TransportError::new("Not connected"));
        }
        if self.state.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::new("fake server stopped responding"))
        }
    }

    async fn force_terminate(&mut self) {
        self.state.forced.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn metadata(&self) -> Vec<(String, String)> {
        vec![
            ("fake".to_string(), "true".to_string()),
            (
                "connects".to_string(),
                self.state.connects.load(Ordering::SeqCst).to_string(),
            ),
        ]
    }
}
