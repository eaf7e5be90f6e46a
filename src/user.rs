//! Simulated users.
//!
//! Each user owns its own HTTP client (and therefore its own cookie jar) and
//! loops over its class's weighted tasks until the stop signal fires.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error};

use crate::client::{build_client, ClientConfig};
use crate::errors::CategorizedError;
use crate::events::{EventHooks, RequestEvent};
use crate::metrics::{ACTIVE_USERS, CONCURRENT_REQUESTS};
use crate::task::{RequestSpec, StartupCheck, VariablePools};
use crate::user_class::UserClass;

/// HTTP session of one simulated user, bound to the target base URL.
pub struct UserSession {
    client: reqwest::Client,
    base_url: String,
}

impl UserSession {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an already rendered path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends one request and reads the whole body.
    ///
    /// The response time covers sending the request and reading the body.
    /// Statuses of 400 and above count as failures, as do transport errors
    /// and errors while reading the body.
    pub async fn execute(&self, spec: &RequestSpec, variables: &VariablePools) -> RequestEvent {
        let path = spec.path.render(variables, &mut rand::thread_rng());
        let url = self.url_for(&path);
        let name = spec.display_name();

        let mut request = self.client.request(spec.method.clone(), &url);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }

        CONCURRENT_REQUESTS.inc();
        let start = Instant::now();

        let mut response_length = 0u64;
        let mut status_code = None;
        let mut error = None;

        match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                status_code = Some(status);
                error = CategorizedError::from_status(status);

                loop {
                    match response.chunk().await {
                        Ok(Some(chunk)) => response_length += chunk.len() as u64,
                        Ok(None) => break,
                        Err(e) => {
                            if error.is_none() {
                                error = Some(CategorizedError::from_reqwest(&e));
                            }
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error = Some(CategorizedError::from_reqwest(&e));
            }
        }

        let response_time = start.elapsed();
        CONCURRENT_REQUESTS.dec();

        match &error {
            None => debug!(
                url = %url,
                name = %name,
                status_code = ?status_code,
                response_time_ms = response_time.as_millis() as u64,
                "Request completed"
            ),
            Some(e) => debug!(
                url = %url,
                name = %name,
                error = %e,
                "Request failed"
            ),
        }

        RequestEvent {
            request_type: spec.method.clone(),
            name,
            response_time,
            response_length,
            status_code,
            error,
        }
    }
}

/// Everything a simulated user needs to run.
pub struct UserContext {
    pub user_id: usize,
    pub class: Arc<UserClass>,
    pub base_url: String,
    pub client_config: ClientConfig,
    pub hooks: EventHooks,
    pub stop: watch::Receiver<bool>,
}

/// Keeps the active-users gauge in step with running users, including users
/// whose task gets aborted.
struct ActiveUserGuard {
    class_name: String,
}

impl ActiveUserGuard {
    fn new(class_name: &str) -> Self {
        ACTIVE_USERS.with_label_values(&[class_name]).inc();
        Self {
            class_name: class_name.to_string(),
        }
    }
}

impl Drop for ActiveUserGuard {
    fn drop(&mut self) {
        ACTIVE_USERS.with_label_values(&[&self.class_name]).dec();
    }
}

/// Runs the startup check. Returns whether the expected status was received.
pub async fn run_startup_check(
    session: &UserSession,
    check: &StartupCheck,
    variables: &VariablePools,
    hooks: &EventHooks,
) -> bool {
    let event = session.execute(&check.request, variables).await;
    hooks.fire_request(&event);

    if event.status_code == Some(check.expected_status) {
        return true;
    }

    error!(
        name = %event.name,
        expected_status = check.expected_status,
        status_code = ?event.status_code,
        error = ?event.error.as_ref().map(|e| e.to_string()),
        "API health check failed"
    );
    false
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Runs one simulated user until the stop signal is raised.
///
/// The wait between tasks is cut short as soon as the stop signal fires. A
/// request already in flight is allowed to finish.
pub async fn run_user(mut ctx: UserContext) {
    let class = ctx.class.clone();
    let _active = ActiveUserGuard::new(&class.name);

    let client = match build_client(&ctx.client_config) {
        Ok(client) => client,
        Err(e) => {
            error!(user_id = ctx.user_id, user_class = %class.name, error = %e, "User could not start");
            return;
        }
    };
    let session = UserSession::new(client, &ctx.base_url);

    let selector = match class.task_selector() {
        Ok(selector) => selector,
        Err(e) => {
            error!(user_id = ctx.user_id, user_class = %class.name, error = %e, "User could not start");
            return;
        }
    };

    debug!(user_id = ctx.user_id, user_class = %class.name, "User starting");

    if let Some(check) = &class.on_start {
        if stop_requested(&ctx.stop) {
            return;
        }
        run_startup_check(&session, check, &class.variables, &ctx.hooks).await;
    }

    while !stop_requested(&ctx.stop) {
        let task = selector.select();
        let task_start = Instant::now();

        let event = session.execute(&task.request, &class.variables).await;
        ctx.hooks.fire_request(&event);

        let delay: Duration = class.wait_time.next_delay(task_start.elapsed());
        if delay.is_zero() {
            // Yield so zero-wait users cannot starve the runtime.
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = time::sleep(delay) => {}
            changed = ctx.stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(user_id = ctx.user_id, user_class = %class.name, "User stopped");
}
