use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Gauge, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::events::{EventListener, RequestEvent};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "angple_loadtest".to_string());

    pub static ref REQUEST_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["method", "name"]
        ).unwrap();

    pub static ref REQUEST_FAILURES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_failures_total", "Number of failed HTTP requests by category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["method", "name", "category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["name"]
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACTIVE_USERS: IntGaugeVec =
        IntGaugeVec::new(
            Opts::new("active_users", "Number of running simulated users by class")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["user_class"]
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    prometheus::default_registry().register(Box::new(REQUEST_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_FAILURES_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    prometheus::default_registry().register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    prometheus::default_registry().register(Box::new(ACTIVE_USERS.clone()))?;

    Ok(())
}

/// Feeds request events into the Prometheus metrics.
#[derive(Debug, Default, Clone)]
pub struct PrometheusRecorder;

impl EventListener for PrometheusRecorder {
    fn on_request(&self, event: &RequestEvent) {
        let method = event.request_type.as_str();
        REQUEST_TOTAL
            .with_label_values(&[method, event.name.as_str()])
            .inc();
        REQUEST_DURATION_SECONDS
            .with_label_values(&[event.name.as_str()])
            .observe(event.response_time.as_secs_f64());

        if let Some(error) = &event.error {
            REQUEST_FAILURES_TOTAL
                .with_label_values(&[method, event.name.as_str(), error.category.label()])
                .inc();
        }
    }
}

fn encode_metrics(registry: &Arc<Mutex<Registry>>) -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode_metrics(&registry) {
        Ok((buffer, content_type)) => Response::builder()
            .status(200)
            .header("Content-Type", content_type)
            .body(Body::from(buffer)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            Response::builder()
                .status(500)
                .body(Body::from("failed to encode metrics"))
        }
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    match encode_metrics(registry) {
        Ok((buffer, _)) => String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Error encoding metrics to UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CategorizedError;
    use reqwest::Method;
    use std::time::Duration;

    #[test]
    fn test_recorder_counts_requests_and_failures() {
        let name = "/metrics-test/[id]";
        let before_total = REQUEST_TOTAL.with_label_values(&["GET", name]).get();
        let before_failed = REQUEST_FAILURES_TOTAL
            .with_label_values(&["GET", name, "server_error"])
            .get();

        let mut event = RequestEvent {
            request_type: Method::GET,
            name: name.to_string(),
            response_time: Duration::from_millis(12),
            response_length: 10,
            status_code: Some(200),
            error: None,
        };
        PrometheusRecorder.on_request(&event);

        event.status_code = Some(502);
        event.error = CategorizedError::from_status(502);
        PrometheusRecorder.on_request(&event);

        assert_eq!(
            REQUEST_TOTAL.with_label_values(&["GET", name]).get(),
            before_total + 2
        );
        assert_eq!(
            REQUEST_FAILURES_TOTAL
                .with_label_values(&["GET", name, "server_error"])
                .get(),
            before_failed + 1
        );
        assert!(
            REQUEST_DURATION_SECONDS
                .with_label_values(&[name])
                .get_sample_count()
                >= 2
        );
    }

    #[test]
    fn test_gather_metrics_string() {
        let registry = Registry::new();
        registry.register(Box::new(ACTIVE_USERS.clone())).unwrap();
        ACTIVE_USERS.with_label_values(&["GatherTestUser"]).set(3);

        let output = gather_metrics_string(&Arc::new(Mutex::new(registry)));
        assert!(output.contains("active_users"), "output was: {}", output);
        assert!(output.contains("GatherTestUser"));
    }
}
