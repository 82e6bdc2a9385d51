use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant}
};
use loopwire::{
    bridge::{ExecutionContextBridge, StateBridge},
    signal::CompletionNotifier,
    transport::RequestScope,
    ErrorKind,
    HarnessConfig,
    SessionAccess,
    SyntheticRequest
};

mod common;

/// Keeps every completion notifier without ever firing it
#[derive(Clone, Default)]
struct SilentBridge(Arc<Mutex<Vec<CompletionNotifier>>>);

impl StateBridge for SilentBridge {
    fn restore(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), loopwire::Error> {
        ExecutionContextBridge.restore(sessions, scope)
    }

    fn capture(&self, sessions: &dyn SessionAccess, scope: &RequestScope) -> Result<(), loopwire::Error> {
        ExecutionContextBridge.capture(sessions, scope)
    }

    fn complete(&self, scope: &RequestScope) {
        if let Some(notifier) = scope.take_notifier() {
            self.0.lock().unwrap().push(notifier);
        }
    }
}

#[test]
fn it_returns_byte_exact_response() {
    let harness = common::builder().build().unwrap();

    let response = harness
        .submit(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let text = String::from_utf8(response.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-type: text/plain; charset=utf-8\r\n"));
    assert!(text.contains("content-length: 12\r\n"));
    assert!(text.ends_with("\r\n\r\nHello World!"));
    harness.shutdown().unwrap();
}

#[test]
fn it_defaults_missing_host_to_loopback() {
    let harness = common::builder().build().unwrap();

    let response = harness.handle(&SyntheticRequest::get("/host")).unwrap();

    assert_eq!(response.text(), "127.0.0.1");
}

#[test]
fn it_uses_configured_default_host() {
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_default_host("app.local"))
        .build()
        .unwrap();

    let defaulted = harness.handle(&SyntheticRequest::get("/host")).unwrap();
    let explicit = harness.handle(&SyntheticRequest::get("/host").with_host("other.local")).unwrap();

    assert_eq!(defaulted.text(), "app.local");
    assert_eq!(explicit.text(), "other.local");
}

#[test]
fn it_defaults_blank_host_header() {
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_default_host("app.local"))
        .build()
        .unwrap();

    let response = harness.submit(b"GET /host HTTP/1.1\r\nHost: \r\n\r\n").unwrap();

    assert!(response.ends_with(b"\r\n\r\napp.local"));
}

#[test]
fn it_fails_at_once_when_body_is_shorter_than_content_length() {
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_completion_timeout(Duration::from_secs(3)))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = harness
        .submit(b"POST /login HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn it_proceeds_when_completion_signal_never_fires() {
    let bridge = SilentBridge::default();
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_completion_timeout(Duration::from_millis(200)))
        .with_deployment(|deployment| deployment.with_bridge(bridge.clone()))
        .build()
        .unwrap();

    let started = Instant::now();
    let response = harness.handle(&SyntheticRequest::get("/hello")).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(response.status_code(), 200);
    assert_eq!(bridge.0.lock().unwrap().len(), 1);
}

#[test]
fn it_propagates_interrupted_wait() {
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_completion_timeout(Duration::from_secs(30)))
        .with_deployment(|deployment| deployment.with_bridge(SilentBridge::default()))
        .build()
        .unwrap();
    let handle = harness.interrupt_handle();

    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.interrupt();
    });
    let started = Instant::now();
    let err = harness.handle(&SyntheticRequest::get("/hello")).unwrap_err();
    interrupter.join().unwrap();

    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!harness.interrupt_handle().is_interrupted());
}

#[test]
fn it_fails_on_malformed_request() {
    let harness = common::builder().build().unwrap();

    let err = harness.submit(b"NOT HTTP AT ALL").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn it_sends_request_body() {
    let harness = common::builder().build().unwrap();

    let response = harness
        .handle(&SyntheticRequest::post("/login").with_body("alice"))
        .unwrap();

    assert_eq!(response.text(), "welcome alice");
}

#[test]
fn it_dumps_responses_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let harness = common::builder()
        .with_config(HarnessConfig::new().with_dump_dir(dir.path()))
        .build()
        .unwrap();

    harness.handle(&SyntheticRequest::get("/hello")).unwrap();
    harness.handle(&SyntheticRequest::get("/missing")).unwrap();

    let hello = std::fs::read_to_string(dir.path().join("0001_GET_hello.txt")).unwrap();
    let missing = std::fs::read_to_string(dir.path().join("0002_GET_missing.txt")).unwrap();
    assert_eq!(hello, "Hello World!");
    assert_eq!(missing, "Not Found");
}

#[test]
fn it_serves_requests_sequentially_with_fresh_contexts() {
    let harness = common::builder().build().unwrap();

    for _ in 0..5 {
        let response = harness.handle(&SyntheticRequest::get("/hello")).unwrap();
        assert_eq!(response.status_code(), 200);
    }
    harness.shutdown().unwrap();
}
