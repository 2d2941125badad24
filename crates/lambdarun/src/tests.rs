//! Tests for the Connector with a hand-played device on the other end.

use std::sync::Arc;
use std::time::Duration;

use lambdapack::CachePolicy;
use lambdapack::LambdaType;
use lambdapack::NameField;
use lambdapack::Packet;
use lambdapack::Value;

use crate::call::CallError;
use crate::call::CallResult;
use crate::call::CallStatus;
use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::mock_transport::BrokenTransport;
use crate::mock_transport::DuplexChannelTransport;
use crate::transport::Transport;

// ============================================================================
//  HARNESS
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn name(s: &str) -> NameField {
    NameField::new(s.as_bytes()).unwrap()
}

/// A host connector plus the raw device end of its link.
struct Rig {
    host: Arc<Connector>,
    device: DuplexChannelTransport,
}

impl Rig {
    fn new(timeout: Duration) -> Self {
        init_tracing();
        let (host_end, device) = DuplexChannelTransport::pair();
        let config = ConnectorConfig::new()
            .with_name("host")
            .with_call_timeout(timeout);
        let host = Arc::new(Connector::start(Arc::new(host_end), config));
        Self { host, device }
    }

    async fn send(&self, packet: Packet) {
        self.device.send(&packet.encode().unwrap()).await.unwrap();
    }

    async fn announce(&self, lambda: &str, ty: LambdaType, cache: CachePolicy) {
        let before = self.host.count();
        self.send(Packet::Registered { name: name(lambda), ty, cache }).await;
        wait_until(|| self.host.count() > before).await;
    }

    /// Waits for the next packet the host sends.
    async fn expect(&self) -> Packet {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.device.recv())
            .await
            .expect("host sent nothing")
            .unwrap()
            .unwrap();
        Packet::decode(&frame).unwrap()
    }

    fn assert_silent(&self) {
        assert!(self.device.try_recv().is_none(), "host sent an unexpected packet");
    }

    fn cached(&self, id: u8) -> Option<Value> {
        self.host
            .list_with_cache(None)
            .into_iter()
            .find(|l| l.info.id == id)
            .and_then(|l| l.cached)
    }

    /// Starts a call by id in the background.
    fn spawn_call(&self, id: u8, ty: LambdaType) -> tokio::task::JoinHandle<Result<CallResult, CallError>> {
        let host = self.host.clone();
        tokio::spawn(async move { host.call_by_id(id, ty).await })
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn success(value: Value) -> Result<CallResult, CallError> {
    Ok(CallResult { status: CallStatus::Success, value })
}

fn cached_result(status: CallStatus, value: Value) -> Result<CallResult, CallError> {
    Ok(CallResult { status, value })
}

// ============================================================================
//  1. REGISTRATION
// ============================================================================

#[tokio::test]
async fn test_announced_lambda_is_listed() {
    let rig = Rig::new(Duration::from_millis(200));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;
    rig.announce("volt", LambdaType::Double, CachePolicy::OnTimeout).await;

    let all = rig.host.list(None);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, 0);
    assert_eq!(all[0].name, "kram");
    assert_eq!(all[1].cache, CachePolicy::OnTimeout);

    let doubles = rig.host.list(Some(LambdaType::Double));
    assert_eq!(doubles.len(), 1);
    assert_eq!(doubles[0].name, "volt");
}

#[tokio::test]
async fn test_unregister_then_reregister_gets_next_id() {
    let rig = Rig::new(Duration::from_millis(200));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    rig.send(Packet::Unregistered { id: 0, name: name("kram") }).await;
    wait_until(|| rig.host.list(None).is_empty()).await;

    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;
    let all = rig.host.list(None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, 1);
}

// ============================================================================
//  2. ROUND TRIPS
// ============================================================================

#[tokio::test]
async fn test_result_wakes_blocked_caller() {
    let rig = Rig::new(Duration::from_secs(2));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    assert_eq!(rig.expect().await, Packet::CallById { id: 0, expected: LambdaType::Int });

    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    assert_eq!(call.await.unwrap(), success(Value::Int(42)));

    // no-cache never keeps the value
    assert_eq!(rig.cached(0), None);
}

#[tokio::test]
async fn test_call_by_name_sends_name() {
    let rig = Rig::new(Duration::from_secs(2));
    rig.announce("greet", LambdaType::String, CachePolicy::NoCache).await;

    let host = rig.host.clone();
    let call = tokio::spawn(async move { host.call_by_name("greet", LambdaType::String).await });
    assert_eq!(
        rig.expect().await,
        Packet::CallByName { name: name("greet"), expected: LambdaType::String }
    );

    rig.send(Packet::ResultString { id: 0, name: name("greet"), value: b"hi".to_vec() }).await;
    assert_eq!(call.await.unwrap(), success(Value::String(b"hi".to_vec())));
}

#[tokio::test]
async fn test_double_result() {
    let rig = Rig::new(Duration::from_secs(2));
    rig.announce("volt", LambdaType::Double, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Double);
    rig.expect().await;
    rig.send(Packet::ResultDouble { id: 0, name: name("volt"), value: -3.25 }).await;
    assert_eq!(call.await.unwrap(), success(Value::Double(-3.25)));
}

#[tokio::test]
async fn test_remote_error_code_passes_through() {
    let rig = Rig::new(Duration::from_secs(2));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    rig.send(Packet::ResultError { id: 0, name: name("kram"), code: -2 }).await;

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::Remote(-2));
    assert_eq!(err.code(), -2);
}

// ============================================================================
//  3. LOOKUP FAILURES
// ============================================================================

#[tokio::test]
async fn test_not_found_and_wrong_type_send_nothing() {
    let rig = Rig::new(Duration::from_millis(200));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    assert_eq!(rig.host.call_by_id(5, LambdaType::Int).await, Err(CallError::NotFound));
    assert_eq!(rig.host.call_by_name("nope", LambdaType::Int).await, Err(CallError::NotFound));
    assert_eq!(rig.host.call_by_id(0, LambdaType::String).await, Err(CallError::WrongType));
    assert_eq!(CallError::WrongType.code(), -2);
    rig.assert_silent();
}

// ============================================================================
//  4. CACHE POLICIES
// ============================================================================

#[tokio::test]
async fn test_call_once_asks_only_once() {
    let rig = Rig::new(Duration::from_secs(2));
    rig.announce("kram", LambdaType::Int, CachePolicy::CallOnce).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    assert_eq!(call.await.unwrap(), success(Value::Int(42)));

    let second = rig.host.call_by_id(0, LambdaType::Int).await;
    assert_eq!(second, cached_result(CallStatus::Cache, Value::Int(42)));
    rig.assert_silent();
}

#[tokio::test]
async fn test_cache_only_never_calls() {
    let rig = Rig::new(Duration::from_millis(200));
    rig.announce("temp", LambdaType::Int, CachePolicy::CacheOnly).await;

    assert_eq!(rig.host.call_by_id(0, LambdaType::Int).await, Err(CallError::CacheEmpty));
    rig.assert_silent();

    // a pushed result fills the cache
    rig.send(Packet::ResultInt { id: 0, name: name("temp"), value: 21 }).await;
    wait_until(|| rig.cached(0).is_some()).await;

    let result = rig.host.call_by_id(0, LambdaType::Int).await;
    assert_eq!(result, cached_result(CallStatus::Cache, Value::Int(21)));
    rig.assert_silent();
}

#[tokio::test]
async fn test_on_timeout_falls_back_to_cache() {
    let rig = Rig::new(Duration::from_millis(100));
    rig.announce("kram", LambdaType::Int, CachePolicy::OnTimeout).await;

    // nothing cached yet
    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    assert_eq!(call.await.unwrap(), Err(CallError::CacheTimeoutEmpty));

    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    wait_until(|| rig.cached(0).is_some()).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    assert_eq!(call.await.unwrap(), cached_result(CallStatus::CacheTimeout, Value::Int(42)));
}

#[tokio::test]
async fn test_no_cache_times_out() {
    let rig = Rig::new(Duration::from_millis(50));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::Timeout);
    assert_eq!(err.code(), -3);
}

#[tokio::test]
async fn test_malformed_frame_keeps_cache() {
    let rig = Rig::new(Duration::from_millis(100));
    rig.announce("kram", LambdaType::Int, CachePolicy::OnTimeout).await;
    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    wait_until(|| rig.cached(0).is_some()).await;

    let mut truncated = Packet::ResultInt { id: 0, name: name("kram"), value: 7 }.encode().unwrap();
    truncated.pop();
    rig.device.send(&truncated).await.unwrap();
    rig.device.send(&[42, 0, 0]).await.unwrap();

    // frames are handled in order, so once this lands the bad ones were seen
    rig.announce("marker", LambdaType::Int, CachePolicy::NoCache).await;
    assert_eq!(rig.cached(0), Some(Value::Int(42)));
}

#[tokio::test]
async fn test_malformed_frame_does_not_wake_caller() {
    let rig = Rig::new(Duration::from_secs(5));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;

    let mut truncated = Packet::ResultInt { id: 0, name: name("kram"), value: 7 }.encode().unwrap();
    truncated.push(0);
    rig.device.send(&truncated).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!call.is_finished());

    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    assert_eq!(call.await.unwrap(), success(Value::Int(42)));
}

// ============================================================================
//  5. TEARDOWN AND RACES
// ============================================================================

#[tokio::test]
async fn test_unregister_wakes_waiter_with_not_found() {
    let rig = Rig::new(Duration::from_secs(5));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    rig.send(Packet::Unregistered { id: 0, name: name("kram") }).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert_eq!(outcome, Err(CallError::NotFound));
}

#[tokio::test]
async fn test_stop_wakes_waiter_with_not_found() {
    let rig = Rig::new(Duration::from_secs(5));
    rig.announce("kram", LambdaType::Int, CachePolicy::OnTimeout).await;

    let call = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    rig.host.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert_eq!(outcome, Err(CallError::NotFound));
    assert!(rig.host.list(None).is_empty());
    assert_eq!(rig.host.call_by_id(0, LambdaType::Int).await, Err(CallError::NotFound));

    // stopping again is harmless
    rig.host.stop();
}

#[tokio::test]
async fn test_second_call_displaces_first() {
    let rig = Rig::new(Duration::from_secs(5));
    rig.announce("kram", LambdaType::Int, CachePolicy::NoCache).await;

    let first = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;
    let second = rig.spawn_call(0, LambdaType::Int);
    rig.expect().await;

    // the displaced caller gives up without waiting out its deadline
    let outcome = tokio::time::timeout(Duration::from_secs(1), first).await.unwrap().unwrap();
    assert_eq!(outcome, Err(CallError::Timeout));

    rig.send(Packet::ResultInt { id: 0, name: name("kram"), value: 42 }).await;
    assert_eq!(second.await.unwrap(), success(Value::Int(42)));
}

#[tokio::test]
async fn test_send_failure_takes_timeout_path() {
    init_tracing();
    let config = ConnectorConfig::new().with_call_timeout(Duration::from_secs(5));
    let host = Connector::start(Arc::new(BrokenTransport), config);

    for (lambda, cache) in [("a", CachePolicy::NoCache), ("b", CachePolicy::OnTimeout)] {
        let frame = Packet::Registered { name: name(lambda), ty: LambdaType::Int, cache }
            .encode()
            .unwrap();
        host.dispatch(&frame).unwrap();
    }

    let started = std::time::Instant::now();
    assert_eq!(host.call_by_id(0, LambdaType::Int).await, Err(CallError::Timeout));
    assert_eq!(host.call_by_id(1, LambdaType::Int).await, Err(CallError::CacheTimeoutEmpty));
    assert!(started.elapsed() < Duration::from_secs(1));

    let push = Packet::ResultInt { id: 1, name: name("b"), value: 9 }.encode().unwrap();
    host.dispatch(&push).unwrap();
    assert_eq!(
        host.call_by_id(1, LambdaType::Int).await,
        cached_result(CallStatus::CacheTimeout, Value::Int(9))
    );
}

#[tokio::test]
async fn test_config_defaults() {
    let config = ConnectorConfig::default();
    assert_eq!(config.call_timeout, Duration::from_secs(1));
    let config = config.with_name("bench").with_call_timeout(Duration::from_millis(10));
    assert_eq!(config.name, "bench");
    assert_eq!(config.call_timeout, Duration::from_millis(10));
}
