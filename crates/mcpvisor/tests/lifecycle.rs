//! Lifecycle controller behaviour against scripted fake adapters.

use mcpvisor::{
    EventLevel, HttpConfig, ManagerConfig, McpError, McpManager, ServerConfig, ServerId,
    ServerRegistry, ServerSnapshot, ServerState, TransportConfig,
};
use mcpvisor_test_utils::{init_test_logging, ConnectOutcome, FakeTransportFactory, ManualClock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn fast_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_grace_period(Duration::from_millis(50))
        .with_health_interval(Duration::from_millis(50))
        .with_teardown_timeout(Duration::from_millis(200))
}

fn manager_with(factory: &FakeTransportFactory, config: ManagerConfig) -> McpManager {
    init_test_logging();
    McpManager::new(ServerRegistry::in_memory(), config)
        .with_transport_factory(Arc::new(factory.clone()))
}

async fn install_echo(manager: &McpManager) -> ServerId {
    manager
        .install(ServerConfig::stdio("echo", "echo", ["hi"]).with_timeout(5))
        .await
        .unwrap()
}

async fn wait_until<F>(rx: &mut watch::Receiver<ServerSnapshot>, predicate: F)
where
    F: FnMut(&ServerSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for server state")
        .expect("server slot dropped");
}

async fn wait_for_event(manager: &McpManager, id: &ServerId, message: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let logs = manager.logs(id, 50).await.unwrap();
            if logs.iter().any(|e| e.message == message) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("event '{message}' never recorded"));
}

#[tokio::test]
async fn test_stdio_start_stop_records_events() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Running);
    assert_eq!(manager.get_status(&id).await.state, ServerState::Running);

    assert_eq!(manager.stop(&id).await.unwrap(), ServerState::Stopped);
    let status = manager.get_status(&id).await;
    assert!(status.exists);
    assert_eq!(status.state, ServerState::Stopped);
    assert!(status.recent_events_count >= 4);
    assert_eq!(status.recent_events[0].message, "Server stopped");
    assert_eq!(factory.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_http_without_url_is_rejected() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());

    let config = ServerConfig::new("remote", TransportConfig::Http(HttpConfig::default()));
    let err = manager.install(config).await.unwrap_err();
    assert!(matches!(err, McpError::Validation(_)));
    assert!(manager.servers(true).await.is_empty());
    assert!(manager.list_status(true).await.is_empty());
}

#[tokio::test]
async fn test_quarantine_then_clear_then_recover() {
    let factory = FakeTransportFactory::succeeding()
        .then(ConnectOutcome::fail("refused"))
        .then(ConnectOutcome::fail("refused"))
        .then(ConnectOutcome::fail("refused"));
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    for _ in 0..3 {
        assert_eq!(manager.start(&id).await.unwrap(), ServerState::Error);
    }
    let status = manager.get_status(&id).await;
    assert!(status.quarantined);
    assert!(status
        .recent_events
        .iter()
        .any(|e| e.level == EventLevel::Warn && e.message.contains("Quarantined")));

    // Rejected without touching the adapter.
    let err = manager.start(&id).await.unwrap_err();
    assert!(matches!(err, McpError::Quarantined(_)));
    assert_eq!(factory.connect_calls(), 3);

    manager.clear_quarantine(&id).await.unwrap();
    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Running);
    wait_for_event(&manager, &id, "Healthy after grace period").await;

    let status = manager.get_status(&id).await;
    assert_eq!(status.state, ServerState::Running);
    assert!(!status.quarantined);
    assert_eq!(manager.quarantine().state(&id).consecutive_failure_count, 0);
    manager.stop(&id).await.unwrap();
}

#[tokio::test]
async fn test_each_failed_start_passes_through_starting() {
    let factory = FakeTransportFactory::failing("refused").with_connect_delay(Duration::from_millis(50));
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;
    let mut rx = manager.subscribe(&id).await.unwrap();

    let starter = {
        let manager = manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.start(&id).await })
    };
    wait_until(&mut rx, |s| s.state == ServerState::Starting).await;
    wait_until(&mut rx, |s| s.state == ServerState::Error).await;
    assert_eq!(starter.await.unwrap().unwrap(), ServerState::Error);

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.error_message.as_deref(), Some("Start failed: refused"));
    assert!(!snapshot.quarantined);
}

#[tokio::test]
async fn test_stop_during_start_never_reaches_running() {
    let factory = FakeTransportFactory::new(ConnectOutcome::Hang);
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;
    let mut rx = manager.subscribe(&id).await.unwrap();

    let starter = {
        let manager = manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.start(&id).await })
    };
    wait_until(&mut rx, |s| s.state == ServerState::Starting).await;

    let stopped = tokio::time::timeout(Duration::from_secs(2), manager.stop(&id))
        .await
        .expect("stop waited for the hanging connect")
        .unwrap();
    assert_eq!(stopped, ServerState::Stopped);
    assert_ne!(starter.await.unwrap().unwrap(), ServerState::Running);

    let logs = manager.logs(&id, 50).await.unwrap();
    assert!(logs.iter().all(|e| e.message != "Server running"));
    assert_eq!(factory.disconnect_calls(), 1);
    assert_eq!(manager.get_status(&id).await.state, ServerState::Stopped);
}

#[tokio::test]
async fn test_slow_disconnect_is_forced() {
    let factory = FakeTransportFactory::succeeding().with_disconnect_delay(Duration::from_secs(30));
    let config = fast_config().with_teardown_timeout(Duration::from_millis(50));
    let manager = manager_with(&factory, config);
    let id = install_echo(&manager).await;

    manager.start(&id).await.unwrap();
    let started = Instant::now();
    assert_eq!(manager.stop(&id).await.unwrap(), ServerState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(factory.force_terminate_calls(), 1);

    let logs = manager.logs(&id, 10).await.unwrap();
    assert!(logs
        .iter()
        .any(|e| e.level == EventLevel::Warn && e.message.starts_with("Forced stop")));
}

#[tokio::test]
async fn test_health_failure_moves_to_error_without_restart() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;
    let mut rx = manager.subscribe(&id).await.unwrap();

    manager.start(&id).await.unwrap();
    wait_for_event(&manager, &id, "Healthy after grace period").await;

    factory.set_healthy(false);
    wait_until(&mut rx, |s| s.state == ServerState::Error).await;

    // No automatic retry.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(factory.connect_calls(), 1);
    assert_eq!(manager.get_status(&id).await.state, ServerState::Error);
}

#[tokio::test]
async fn test_concurrent_starts_connect_once() {
    let factory = FakeTransportFactory::succeeding().with_connect_delay(Duration::from_millis(100));
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    let (a, b) = tokio::join!(manager.start(&id), manager.start(&id));
    for state in [a.unwrap(), b.unwrap()] {
        assert!(matches!(state, ServerState::Starting | ServerState::Running));
    }
    assert_eq!(factory.connect_calls(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_different_servers_start_in_parallel() {
    let factory = FakeTransportFactory::succeeding().with_connect_delay(Duration::from_millis(500));
    let manager = manager_with(&factory, fast_config());
    let first = install_echo(&manager).await;
    let second = manager
        .install(ServerConfig::http("remote", "http://127.0.0.1:9/mcp"))
        .await
        .unwrap();

    let started = Instant::now();
    let (a, b) = tokio::join!(manager.start(&first), manager.start(&second));
    assert_eq!(a.unwrap(), ServerState::Running);
    assert_eq!(b.unwrap(), ServerState::Running);
    assert!(started.elapsed() < Duration::from_millis(950));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_reconnects() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    manager.start(&id).await.unwrap();
    assert_eq!(manager.restart(&id).await.unwrap(), ServerState::Running);
    assert_eq!(factory.connect_calls(), 2);
    assert_eq!(factory.disconnect_calls(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_uptime_follows_clock() {
    let clock = Arc::new(ManualClock::new());
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config()).with_clock(clock.clone());
    let id = install_echo(&manager).await;

    assert!(manager.get_status(&id).await.uptime.is_none());
    manager.start(&id).await.unwrap();
    assert_eq!(manager.get_status(&id).await.uptime, Some(Duration::ZERO));

    clock.advance(Duration::from_secs(90));
    let status = manager.get_status(&id).await;
    assert_eq!(status.uptime, Some(Duration::from_secs(90)));
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["tracker_uptime"], 90);
    assert_eq!(json["tracker_metadata"]["transport"], "stdio");

    manager.stop(&id).await.unwrap();
    assert!(manager.get_status(&id).await.uptime.is_none());
}

#[tokio::test]
async fn test_quarantine_cooldown() {
    let clock = Arc::new(ManualClock::new());
    let factory = FakeTransportFactory::succeeding().then(ConnectOutcome::fail("refused"));
    let config = fast_config()
        .with_quarantine_threshold(1)
        .with_quarantine_cooldown(Some(Duration::from_secs(60)));
    let manager = manager_with(&factory, config).with_clock(clock.clone());
    let id = install_echo(&manager).await;

    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Error);
    assert!(manager.start(&id).await.unwrap_err().is_quarantined());

    let status = manager.get_status(&id).await;
    assert!(status.quarantined);
    assert_eq!(status.state, ServerState::Error);

    clock.advance(Duration::from_secs(61));
    let mut rx = manager.subscribe(&id).await.unwrap();
    assert!(!manager.get_status(&id).await.quarantined);
    assert!(!rx.borrow_and_update().quarantined);

    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Running);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_status_agrees_with_published_snapshot() {
    let factory = FakeTransportFactory::failing("refused");
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;
    let rx = manager.subscribe(&id).await.unwrap();

    for _ in 0..3 {
        manager.start(&id).await.unwrap();
        let status = manager.get_status(&id).await;
        let snapshot = rx.borrow().clone();
        assert_eq!(status.state, snapshot.state);
        assert_eq!(status.quarantined, snapshot.quarantined);
        assert_eq!(status.error_message, snapshot.error_message);
    }
    assert!(rx.borrow().quarantined);
}

#[tokio::test]
async fn test_abandoned_start_still_settles() {
    let factory = FakeTransportFactory::new(ConnectOutcome::Hang);
    let manager = manager_with(&factory, fast_config());
    let id = manager
        .install(ServerConfig::stdio("echo", "echo", ["hi"]).with_timeout(1))
        .await
        .unwrap();
    let mut rx = manager.subscribe(&id).await.unwrap();

    // The caller gives up long before the connect timeout.
    let abandoned = tokio::time::timeout(Duration::from_millis(100), manager.start(&id)).await;
    assert!(abandoned.is_err());

    wait_until(&mut rx, |s| s.state == ServerState::Error).await;
    let error = rx.borrow().error_message.clone().unwrap();
    assert!(error.contains("connect timed out after 1s"), "{error}");
    assert_eq!(factory.force_terminate_calls(), 1);

    factory.set_fallback(ConnectOutcome::Succeed);
    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Running);
    assert_eq!(factory.connect_calls(), 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_start_queued_behind_uninstall_finds_server_gone() {
    let factory = FakeTransportFactory::succeeding().with_disconnect_delay(Duration::from_millis(300));
    let config = fast_config().with_teardown_timeout(Duration::from_secs(2));
    let manager = manager_with(&factory, config);
    let id = install_echo(&manager).await;
    assert_eq!(manager.start(&id).await.unwrap(), ServerState::Running);

    let uninstaller = {
        let manager = manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.uninstall(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let late_start = manager.start(&id).await;

    assert!(uninstaller.await.unwrap().unwrap());
    assert!(matches!(late_start, Err(McpError::ServerNotFound(_))));

    manager.shutdown().await;
    assert_eq!(factory.connect_calls(), 1);
    assert_eq!(factory.disconnect_calls(), 1);
    assert_eq!(factory.force_terminate_calls(), 0);
    assert!(!manager.get_status(&id).await.exists);
}

#[tokio::test]
async fn test_history_survives_restart_until_reset() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    manager.start(&id).await.unwrap();
    manager.stop(&id).await.unwrap();
    manager.start(&id).await.unwrap();
    assert!(manager.get_status(&id).await.recent_events_count >= 5);
    assert_eq!(manager.logs(&id, 3).await.unwrap().len(), 3);

    manager.reset_history(&id).await.unwrap();
    let status = manager.get_status(&id).await;
    assert_eq!(status.recent_events_count, 0);
    assert_eq!(status.state, ServerState::Running);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_edit_does_not_restart() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;
    manager.start(&id).await.unwrap();

    let updated = ServerConfig::stdio("echo-renamed", "echo", ["bye"]);
    assert!(manager.edit(&id, updated).await.unwrap());
    assert_eq!(factory.connect_calls(), 1);
    assert_eq!(manager.get_status(&id).await.state, ServerState::Running);
    assert_eq!(manager.find_id("echo-renamed").await, Some(id.clone()));
    assert_eq!(manager.find_id("echo").await, None);

    manager.restart(&id).await.unwrap();
    let last = factory.configs().pop().unwrap();
    assert_eq!(last.name, "echo-renamed");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_connectivity_failure_has_no_side_effects() {
    let factory = FakeTransportFactory::failing("connection refused");
    let manager = manager_with(&factory, fast_config());
    let id = install_echo(&manager).await;

    let report = manager.test_connectivity(&id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("connection refused"));
    assert_eq!(manager.quarantine().state(&id).consecutive_failure_count, 0);
    assert_eq!(manager.get_status(&id).await.state, ServerState::Stopped);

    factory.set_fallback(ConnectOutcome::Succeed);
    let candidate = ServerConfig::sse("events", "https://example.com/sse");
    assert!(manager.test_config(&candidate).await.unwrap().success);
    assert!(manager.find_id("events").await.is_none());

    let invalid = ServerConfig::sse("bad", "");
    assert!(matches!(
        manager.test_config(&invalid).await,
        Err(McpError::Validation(_))
    ));
}

#[tokio::test]
async fn test_unknown_server() {
    let factory = FakeTransportFactory::succeeding();
    let manager = manager_with(&factory, fast_config());
    let unknown = ServerId::from("srv_nope");

    assert!(matches!(
        manager.start(&unknown).await,
        Err(McpError::ServerNotFound(_))
    ));
    assert!(matches!(
        manager.stop(&unknown).await,
        Err(McpError::ServerNotFound(_))
    ));
    assert!(manager.subscribe(&unknown).await.is_err());
    assert!(manager.clear_quarantine(&unknown).await.is_err());

    let status = manager.get_status(&unknown).await;
    assert!(!status.exists);
    assert_eq!(status.state, ServerState::Stopped);
    assert!(status.kind.is_none());
    assert_eq!(factory.created(), 0);
}
