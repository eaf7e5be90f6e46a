use std::sync::{Arc, Mutex};

use angple_loadtest::config::{Config, ConfigError, LogFormat};
use angple_loadtest::events::{FailRatioGuard, SlowRequestLogger, Verdict};
use angple_loadtest::metrics::{
    gather_metrics_string, register_metrics, start_metrics_server, PrometheusRecorder,
};
use angple_loadtest::runner::{RunConfig, Runner};
use tracing::info;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - Base URL of the Angple backend (must start with http:// or https://)"
    );
    eprintln!("                            May be omitted when LOADTEST_CONFIG sets config.baseUrl");
    eprintln!();
    eprintln!("Run configuration:");
    eprintln!("  LOADTEST_CONFIG         - Path to a YAML test plan (environment variables override it)");
    eprintln!("  NUM_USERS               - Number of simulated users (default: 1)");
    eprintln!("  SPAWN_RATE              - Users started per second (default: 1)");
    eprintln!("  TEST_DURATION           - Run time: 30s, 10m, 2h (default: until Ctrl-C)");
    eprintln!("  STOP_TIMEOUT            - Grace period for users after stopping (default: 0s)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 30s)");
    eprintln!();
    eprintln!("Thresholds:");
    eprintln!("  SLOW_REQUEST_THRESHOLD_MS - Warn about requests slower than this (default: 1000)");
    eprintln!("  MAX_FAIL_RATIO          - Fail the run above this failure ratio (default: 0.01)");
    eprintln!();
    eprintln!("Output:");
    eprintln!("  CSV_PREFIX              - Write <prefix>_stats.csv and <prefix>_failures.csv");
    eprintln!("  JSON_SUMMARY            - Write the final statistics as JSON to this path");
    eprintln!("  PRINT_STATS_INTERVAL    - Print the stats table periodically, e.g. 10s");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: angple_loadtest)");
    eprintln!("  LOG_FORMAT              - text or json (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: info,hyper=warn,reqwest=warn)");
    eprintln!();
    eprintln!("Advanced configuration:");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  RESOLVE_TARGET_ADDR     - DNS override: hostname:ip:port");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hyper=warn,reqwest=warn"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(LogFormat::from_env());

    // Load configuration from the YAML test plan and environment variables
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            if matches!(
                e,
                ConfigError::MissingTargetUrl | ConfigError::InvalidValue { .. }
            ) {
                print_config_help();
            }
            std::process::exit(1);
        }
    };

    config.print_summary();

    register_metrics()?;
    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if let Some(metrics_port) = config.metrics_port {
        let server_registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(metrics_port, server_registry).await;
        });
    }

    let runner = Runner::new(RunConfig::from(&config), config.user_classes.clone())
        .with_listener(Arc::new(PrometheusRecorder))
        .with_listener(Arc::new(SlowRequestLogger::new(config.slow_request_threshold)))
        .with_listener(Arc::new(FailRatioGuard::new(config.max_fail_ratio)));

    let outcome = runner.run().await?;

    if config.metrics_port.is_some() {
        let final_metrics_output = gather_metrics_string(&registry_arc);
        println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
        println!("--- END OF FINAL METRICS ---\n");
    }

    if outcome.verdict == Verdict::Fail {
        info!("Exiting with status 1");
        std::process::exit(1);
    }

    Ok(())
}
