//! End-to-end runs against a mock Angple backend.

use std::sync::Arc;
use tokio::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use angple_loadtest::angple;
use angple_loadtest::client::ClientConfig;
use angple_loadtest::events::{FailRatioGuard, SlowRequestLogger, Verdict};
use angple_loadtest::runner::{RunConfig, Runner};
use angple_loadtest::stats::TOTAL_NAME;

fn run_config(server: &MockServer, users: usize) -> RunConfig {
    RunConfig {
        base_url: server.uri(),
        num_users: users,
        spawn_rate: 100.0,
        run_time: Some(Duration::from_millis(500)),
        stop_timeout: Duration::from_millis(200),
        print_stats_interval: None,
        csv_prefix: None,
        json_summary: None,
        client_config: ClientConfig::default(),
    }
}

fn guarded_runner(config: RunConfig) -> Runner {
    Runner::new(config, angple::profile().unwrap())
        .with_listener(Arc::new(SlowRequestLogger::default()))
        .with_listener(Arc::new(FailRatioGuard::default()))
}

#[tokio::test]
async fn healthy_backend_passes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let outcome = guarded_runner(run_config(&server, 4)).run_until(std::future::pending()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Pass);
    assert_eq!(outcome.snapshot.total.name, TOTAL_NAME);
    assert_eq!(outcome.snapshot.total.num_failures, 0);

    // Two AngpleUsers each run the startup health check, two
    // HealthCheckUsers each run their only task
    let health = outcome.snapshot.entry("GET", "/health").expect("health entry");
    assert!(health.num_requests >= 4, "health requests: {}", health.num_requests);

    // Every recorded name is a grouped name
    for entry in &outcome.snapshot.entries {
        assert!(!entry.name.contains("/free/"), "ungrouped name {}", entry.name);
    }
}

#[tokio::test]
async fn failing_backend_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let outcome = guarded_runner(run_config(&server, 2)).run_until(std::future::pending()).await.unwrap();

    assert!(outcome.snapshot.total.num_requests > 0);
    assert_eq!(
        outcome.snapshot.total.num_failures,
        outcome.snapshot.total.num_requests
    );
    assert_eq!(outcome.verdict, Verdict::Fail);
    assert!(outcome
        .snapshot
        .errors
        .iter()
        .any(|e| e.name == "/health" && e.error.contains("HTTP 500")));
}

#[tokio::test]
async fn failure_ratio_at_limit_passes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runner = Runner::new(run_config(&server, 2), angple::profile().unwrap())
        .with_listener(Arc::new(FailRatioGuard::new(1.0)));
    let outcome = runner.run_until(std::future::pending()).await.unwrap();

    assert!(outcome.snapshot.total.num_failures > 0);
    assert_eq!(outcome.verdict, Verdict::Pass);
}

#[tokio::test]
async fn reports_are_written() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("angple");
    let json_path = dir.path().join("summary.json");

    let mut config = run_config(&server, 2);
    config.csv_prefix = Some(prefix.display().to_string());
    config.json_summary = Some(json_path.clone());

    let outcome = guarded_runner(config).run_until(std::future::pending()).await.unwrap();

    let stats_csv = std::fs::read_to_string(dir.path().join("angple_stats.csv")).unwrap();
    let mut lines = stats_csv.lines();
    assert!(lines.next().unwrap().starts_with("Type,Name,Request Count,Failure Count"));
    assert!(stats_csv.contains(",Aggregated,"));
    assert!(stats_csv.contains("/health"));

    let failures_csv = std::fs::read_to_string(dir.path().join("angple_failures.csv")).unwrap();
    assert_eq!(failures_csv.trim(), "Method,Name,Error,Occurrences");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(
        json["total"]["num_requests"],
        outcome.snapshot.total.num_requests
    );
}

#[tokio::test]
async fn runner_stats_are_shared() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runner = guarded_runner(run_config(&server, 1));
    let stats = runner.stats();
    let outcome = runner.run_until(std::future::pending()).await.unwrap();

    assert_eq!(stats.num_requests(), outcome.snapshot.total.num_requests);
}
