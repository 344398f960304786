#![allow(clippy::unwrap_used, clippy::float_cmp)]
// Integration tests for `Engine` against a wiremock upstream.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rackdash_core::{
    AuthState, CoreError, Credential, CredentialRecord, CredentialStore, DeviceSort, Engine,
    EngineConfig, FileStore, MemoryStore, OsCategory, SignalQuality, SpeedTestState,
};

// ── Helpers ─────────────────────────────────────────────────────────

const DEVICES_PATH: &str = "/2.2/networks/net-1/devices";
const REFRESH_PATH: &str = "/2.2/login/refresh";
const SPEEDTEST_PATH: &str = "/2.2/networks/net-1/speedtest";

fn config(server: &MockServer) -> EngineConfig {
    let mut config = EngineConfig::new(
        Url::parse(&format!("{}/2.2", server.uri())).unwrap(),
        "net-1",
    );
    config.request_timeout = Duration::from_secs(2);
    config.speedtest_poll_interval = Duration::from_millis(20);
    config.speedtest_deadline = Duration::from_secs(5);
    config
}

fn record(token: &str) -> CredentialRecord {
    CredentialRecord {
        credential: Some(Credential::new(
            SecretString::from(token.to_owned()),
            chrono::Utc::now(),
        )),
        identity: Some("ops@example.com".into()),
    }
}

async fn setup(token: &str) -> (MockServer, Engine) {
    let server = MockServer::start().await;
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::with_record(record(token)));
    let engine = Engine::with_store(config(&server), store).unwrap();
    (server, engine)
}

fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "meta": { "code": 200 }, "data": data }))
}

fn three_devices() -> Value {
    json!([
        {
            "mac": "aa:bb:cc:00:00:01",
            "nickname": "Living Room Pixel",
            "manufacturer": "Google",
            "connection_type": "wireless",
            "connected": true,
            "connectivity": { "signal": "-48 dBm", "score_bars": 5 },
            "interface": { "frequency": "5" }
        },
        {
            "mac": "aa:bb:cc:00:00:02",
            "hostname": "Johns-MacBook-Air",
            "manufacturer": "Apple",
            "connection_type": "wireless",
            "connectivity": { "signal": -72 },
            "interface": { "frequency": 2.4 }
        },
        {
            "mac": "aa:bb:cc:00:00:03",
            "hostname": "nas",
            "connection_type": "wired"
        },
        { "hostname": "no-mac-here" },
        { "mac": "aa:bb:cc:00:00:04", "hostname": "gone", "connected": false }
    ])
}

// ── Poll cycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_three_devices_distributions() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(envelope(three_devices()))
        .mount(&server)
        .await;

    let report = engine.poll_once().await.unwrap();
    assert_eq!(report.devices, 3);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.skipped_disconnected, 1);

    let devices = engine.current_devices(DeviceSort::Upstream);
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["Living Room Pixel", "Johns-MacBook-Air", "nas"]);
    assert_eq!(devices[2].signal_dbm, None);

    let dist = engine.distributions();
    assert_eq!(dist.device_count, 3);
    assert_eq!(dist.os[&OsCategory::Android], 1);
    assert_eq!(dist.os[&OsCategory::Ios], 1);
    assert_eq!(dist.os[&OsCategory::Other], 1);
    assert_eq!(dist.bands.values().sum::<usize>(), 3);
    assert_eq!(dist.average_signal_dbm, Some(-60.0));
    assert_eq!(dist.average_quality, Some(SignalQuality::VeryGood));

    let history = engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].device_count, 3);

    let status = engine.poll_status();
    assert!(status.last_success.is_some());
    assert_eq!(status.dropped_records, 1);
}

#[tokio::test]
async fn test_queries_empty_before_first_poll() {
    let (_server, engine) = setup("tok-1").await;
    assert!(engine.current_devices(DeviceSort::Name).is_empty());
    assert!(engine.history().is_empty());
    assert_eq!(engine.distributions().device_count, 0);
    assert!(engine.last_updated().is_none());
}

#[tokio::test]
async fn test_auth_failure_keeps_prior_snapshot_until_reauthorized() {
    let (server, engine) = setup("tok-1").await;

    // First poll succeeds with the original token.
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(envelope(three_devices()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // After that the original token is rejected.
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    // The first silent refresh is refused, the second succeeds.
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(envelope(json!({ "user_token": "tok-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-2"))
        .respond_with(envelope(json!({
            "devices": [{ "mac": "aa:bb:cc:00:00:09", "hostname": "new" }]
        })))
        .mount(&server)
        .await;

    engine.poll_once().await.unwrap();
    assert_eq!(engine.current_devices(DeviceSort::Upstream).len(), 3);

    let err = engine.poll_once().await.unwrap_err();
    assert_eq!(err, CoreError::ReauthorizationRequired);
    assert_eq!(engine.current_devices(DeviceSort::Upstream).len(), 3);
    assert_eq!(engine.history().len(), 1);
    assert_eq!(engine.auth_state(), AuthState::Expired);
    assert!(engine.auth_status().reauthorization_required);
    assert!(engine.poll_status().last_error.is_some());

    engine.reauthorize().await.unwrap();
    assert_eq!(engine.auth_state(), AuthState::Authenticated);

    let report = engine.poll_once().await.unwrap();
    assert_eq!(report.devices, 1);
    assert_eq!(engine.current_devices(DeviceSort::Upstream)[0].name, "new");
    assert_eq!(engine.history().len(), 2);
    assert!(engine.poll_status().last_error.is_none());
}

#[tokio::test]
async fn test_auth_failure_refreshes_and_retries_within_one_cycle() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(envelope(json!({ "user_token": "tok-2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-2"))
        .respond_with(envelope(three_devices()))
        .expect(1)
        .mount(&server)
        .await;

    let report = engine.poll_once().await.unwrap();
    assert_eq!(report.devices, 3);
    assert_eq!(
        engine.credentials().peek_token().unwrap().expose_secret(),
        "tok-2"
    );
}

#[tokio::test]
async fn test_rejected_fresh_token_escalates_after_one_refresh() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(envelope(json!({ "user_token": "tok-x" })))
        .expect(1)
        .mount(&server)
        .await;

    for _ in 0..3 {
        assert_eq!(
            engine.poll_once().await.unwrap_err(),
            CoreError::ReauthorizationRequired
        );
    }
    let status = engine.auth_status();
    assert_eq!(status.state, AuthState::Expired);
    assert!(status.reauthorization_required);
    server.verify().await;
}

#[tokio::test]
async fn test_expired_credential_gets_one_attempt_with_refreshed_token() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(envelope(json!({ "user_token": "tok-x" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .and(header("X-User-Token", "tok-x"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    engine.credentials().mark_expired();
    assert_eq!(
        engine.poll_once().await.unwrap_err(),
        CoreError::ReauthorizationRequired
    );
    assert!(engine.auth_status().reauthorization_required);
    server.verify().await;
}

#[tokio::test]
async fn test_rate_limit_skips_until_backoff_elapses() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let err = engine.poll_once().await.unwrap_err();
    assert_eq!(
        err,
        CoreError::RateLimited {
            retry_after: Duration::from_secs(120)
        }
    );
    assert!(engine.poll_status().backoff_until.is_some());

    // Second attempt is refused locally without touching the upstream.
    let err = engine.poll_once().await.unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { .. }));
}

#[tokio::test]
async fn test_malformed_payload_skips_cycle() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = engine.poll_once().await.unwrap_err();
    assert!(matches!(err, CoreError::Malformed { .. }), "got {err:?}");
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn test_unauthenticated_engine_does_not_call_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .respond_with(envelope(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let engine = Engine::with_store(config(&server), Arc::new(MemoryStore::new())).unwrap();
    assert_eq!(
        engine.poll_once().await.unwrap_err(),
        CoreError::NotAuthenticated
    );
}

#[tokio::test]
async fn test_network_id_update_redirects_polls() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path("/2.2/networks/net-2/devices"))
        .respond_with(envelope(json!([{ "mac": "aa:bb:cc:00:00:05" }])))
        .expect(1)
        .mount(&server)
        .await;

    assert!(engine.set_network_id("  ").is_err());
    engine.set_network_id("net-2").unwrap();
    assert_eq!(engine.network_id(), "net-2");
    engine.poll_once().await.unwrap();
    assert_eq!(
        engine.current_devices(DeviceSort::Upstream)[0].name,
        "Device-000005"
    );
}

#[tokio::test]
async fn test_background_loop_polls_and_shuts_down() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("GET"))
        .and(path(DEVICES_PATH))
        .respond_with(envelope(three_devices()))
        .mount(&server)
        .await;

    engine.start().await;
    for _ in 0..100 {
        if engine.last_updated().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(engine.last_updated().is_some());
    engine.shutdown().await;
}

// ── Credential lifecycle ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let (server, engine) = setup("tok-old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("X-User-Token", "tok-old"))
        .respond_with(
            envelope(json!({ "user_token": "tok-new" })).set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    engine.credentials().mark_expired();
    assert_eq!(engine.auth_state(), AuthState::Expired);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let credentials = engine.credentials().clone();
            tokio::spawn(async move { credentials.current_token().await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "tok-new");
    }
    assert_eq!(engine.auth_state(), AuthState::Authenticated);
    server.verify().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failure() {
    let (server, engine) = setup("tok-old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    engine.credentials().mark_expired();

    let results = futures::future::join_all(
        (0..8).map(|_| {
            let credentials = engine.credentials().clone();
            async move { credentials.current_token().await }
        }),
    )
    .await;

    let first = results[0].as_ref().unwrap_err().clone();
    assert!(matches!(first, CoreError::UpstreamUnavailable { .. }));
    assert!(results.iter().all(|r| r.as_ref().unwrap_err() == &first));
    // A transient failure leaves the credential expired, not locked out.
    assert_eq!(engine.auth_state(), AuthState::Expired);
    assert!(!engine.auth_status().reauthorization_required);
    server.verify().await;
}

#[tokio::test]
async fn test_two_step_authentication_persists_credential() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path_on_disk = dir.path().join("credential.json");

    Mock::given(method("POST"))
        .and(path("/2.2/pro/login"))
        .respond_with(envelope(json!({ "user_token": "unverified-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.2/login/verify"))
        .and(header("X-User-Token", "unverified-1"))
        .respond_with(envelope(json!({ "email": { "verified": true } })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.credential_path = Some(path_on_disk.clone());
    let engine = Engine::new(cfg.clone()).unwrap();
    assert_eq!(engine.auth_state(), AuthState::Unauthenticated);

    engine.begin_authentication("ops@example.com").await.unwrap();
    assert_eq!(engine.auth_state(), AuthState::PendingVerification);
    assert_eq!(
        engine.poll_once().await.unwrap_err(),
        CoreError::NotAuthenticated
    );

    engine.complete_authentication("123456").await.unwrap();
    assert_eq!(engine.auth_state(), AuthState::Authenticated);

    let stored = FileStore::new(&path_on_disk).load().unwrap().unwrap();
    assert_eq!(
        stored.credential.unwrap().token.expose_secret(),
        "unverified-1"
    );
    assert_eq!(stored.identity.as_deref(), Some("ops@example.com"));

    // A restart picks the credential back up.
    let restarted = Engine::new(cfg).unwrap();
    assert_eq!(restarted.auth_state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_rejected_verification_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2.2/pro/login"))
        .respond_with(envelope(json!({ "user_token": "unverified-1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.2/login/verify"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let engine = Engine::with_store(config(&server), Arc::new(MemoryStore::new())).unwrap();
    engine.begin_authentication("ops@example.com").await.unwrap();
    let err = engine.complete_authentication("000000").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidVerificationCode { .. }));
    assert_eq!(engine.auth_state(), AuthState::PendingVerification);
}

#[tokio::test]
async fn test_polls_continue_while_verification_pending() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path("/2.2/pro/login"))
        .respond_with(envelope(json!({ "user_token": "unverified-2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("X-User-Token", "tok-1"))
        .respond_with(envelope(json!({ "user_token": "tok-2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2.2/login/verify"))
        .and(header("X-User-Token", "unverified-2"))
        .respond_with(envelope(json!({ "email": { "verified": true } })))
        .expect(1)
        .mount(&server)
        .await;
    for token in ["tok-1", "tok-2", "unverified-2"] {
        Mock::given(method("GET"))
            .and(path(DEVICES_PATH))
            .and(header("X-User-Token", token))
            .respond_with(envelope(three_devices()))
            .expect(1)
            .mount(&server)
            .await;
    }

    engine.begin_authentication("ops@example.com").await.unwrap();
    let status = engine.auth_status();
    assert_eq!(status.state, AuthState::Authenticated);
    assert!(status.verification_pending);

    // The stored credential keeps serving while the code is outstanding.
    engine.poll_once().await.unwrap();
    engine.reauthorize().await.unwrap();
    assert!(engine.auth_status().verification_pending);
    engine.poll_once().await.unwrap();

    engine.complete_authentication("123456").await.unwrap();
    let status = engine.auth_status();
    assert_eq!(status.state, AuthState::Authenticated);
    assert!(!status.verification_pending);
    engine.poll_once().await.unwrap();
    server.verify().await;
}

// ── Speed test ──────────────────────────────────────────────────────

async fn wait_for_terminal(engine: &Engine) -> SpeedTestState {
    for _ in 0..200 {
        let run = engine.poll_speedtest();
        if !run.is_running() {
            return run.state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.poll_speedtest().state
}

#[tokio::test]
async fn test_speedtest_already_running_leaves_run_untouched() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!(null)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .mount(&server)
        .await;

    let first = engine.start_speedtest().unwrap();
    assert_eq!(first.state, SpeedTestState::Running);

    let err = engine.start_speedtest().unwrap_err();
    assert_eq!(err, CoreError::AlreadyRunning);
    assert_eq!(engine.poll_speedtest(), first);
}

#[tokio::test]
async fn test_speedtest_completes_and_last_result_survives_next_run() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!(null)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!([{
            "status": "completed",
            "down_mbps": 512.4,
            "up_mbps": 48.9,
            "ping_ms": 11.0
        }])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "failed", "error": "no route" })))
        .mount(&server)
        .await;

    engine.start_speedtest().unwrap();
    assert_eq!(wait_for_terminal(&engine).await, SpeedTestState::Completed);

    let result = engine.last_speedtest_result().unwrap();
    assert_eq!(result.download_mbps, 512.4);
    assert_eq!(result.upload_mbps, 48.9);
    assert_eq!(result.ping_ms, 11.0);

    // Second run fails; the earlier figures stay visible.
    engine.start_speedtest().unwrap();
    assert_eq!(
        engine.last_speedtest_result().unwrap().download_mbps,
        512.4
    );
    assert_eq!(wait_for_terminal(&engine).await, SpeedTestState::Failed);
    let status = engine.speedtest_status();
    assert_eq!(status.run.error.as_deref(), Some("no route"));
    assert_eq!(status.last_result.unwrap().download_mbps, 512.4);
}

#[tokio::test]
async fn test_speedtest_reset_abandons_stuck_run() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!(null)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({
            "status": "completed",
            "down_mbps": 300.0,
            "up_mbps": 30.0,
            "ping_ms": 12.0
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .mount(&server)
        .await;

    engine.start_speedtest().unwrap();
    assert_eq!(wait_for_terminal(&engine).await, SpeedTestState::Completed);

    // The second run never finishes upstream.
    engine.start_speedtest().unwrap();
    assert_eq!(
        engine.start_speedtest().unwrap_err(),
        CoreError::AlreadyRunning
    );

    let run = engine.reset_speedtest();
    assert_eq!(run.state, SpeedTestState::Idle);
    assert_eq!(engine.poll_speedtest().state, SpeedTestState::Idle);
    assert_eq!(
        engine.last_speedtest_result().unwrap().download_mbps,
        300.0
    );

    let run = engine.start_speedtest().unwrap();
    assert_eq!(run.state, SpeedTestState::Running);
}

#[tokio::test]
async fn test_speedtest_ignores_leftover_result_from_previous_run() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!(null)))
        .mount(&server)
        .await;
    // The first status read still shows the previous, undated result.
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({
            "status": "completed",
            "down_mbps": 1.0,
            "up_mbps": 1.0,
            "ping_ms": 99.0
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({ "status": "running" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(envelope(json!({
            "status": "completed",
            "down_mbps": 640.0,
            "up_mbps": 52.0,
            "ping_ms": 8.0
        })))
        .mount(&server)
        .await;

    engine.start_speedtest().unwrap();
    assert_eq!(wait_for_terminal(&engine).await, SpeedTestState::Completed);
    assert_eq!(engine.last_speedtest_result().unwrap().download_mbps, 640.0);
}

#[tokio::test]
async fn test_speedtest_start_rejected_upstream_fails_run() {
    let (server, engine) = setup("tok-1").await;

    Mock::given(method("POST"))
        .and(path(SPEEDTEST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    engine.start_speedtest().unwrap();
    assert_eq!(wait_for_terminal(&engine).await, SpeedTestState::Failed);
    assert!(engine.last_speedtest_result().is_none());
}
