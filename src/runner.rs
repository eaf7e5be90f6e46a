//! Test run orchestration.
//!
//! The runner ramps users up at the configured spawn rate, stops them when the
//! run time elapses or the process is interrupted, then fires the quitting
//! hooks and writes the reports.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{build_client, ClientBuildError, ClientConfig};
use crate::config::Config;
use crate::dispatch::{distribute_users, spawn_order};
use crate::events::{EventHooks, EventListener, Verdict};
use crate::report::{
    format_failures_table, format_percentiles_table, format_stats_table, write_csv, write_json,
};
use crate::stats::{RequestStats, StatsSnapshot};
use crate::user::{run_user, UserContext};
use crate::user_class::UserClass;

const MIN_SPAWN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

/// Settings for one test run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub num_users: usize,
    pub spawn_rate: f64,
    pub run_time: Option<Duration>,
    pub stop_timeout: Duration,
    pub print_stats_interval: Option<Duration>,
    pub csv_prefix: Option<String>,
    pub json_summary: Option<PathBuf>,
    pub client_config: ClientConfig,
}

impl From<&Config> for RunConfig {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.target_url.clone(),
            num_users: config.num_users,
            spawn_rate: config.spawn_rate,
            run_time: config.run_time,
            stop_timeout: config.stop_timeout,
            print_stats_interval: config.print_stats_interval,
            csv_prefix: config.csv_prefix.clone(),
            json_summary: config.json_summary.clone(),
            client_config: config.to_client_config(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub snapshot: StatsSnapshot,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    RunTimeElapsed,
    Interrupted,
}

pub struct Runner {
    config: RunConfig,
    classes: Vec<Arc<UserClass>>,
    stats: Arc<RequestStats>,
    hooks: EventHooks,
}

impl Runner {
    /// Creates a runner whose statistics are the first request listener.
    pub fn new(config: RunConfig, classes: Vec<UserClass>) -> Self {
        let stats = Arc::new(RequestStats::new());
        let mut hooks = EventHooks::new();
        hooks.add_listener(stats.clone());

        Self {
            config,
            classes: classes.into_iter().map(Arc::new).collect(),
            stats,
            hooks,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.hooks.add_listener(listener);
        self
    }

    pub fn stats(&self) -> Arc<RequestStats> {
        self.stats.clone()
    }

    /// Runs until the run time elapses or Ctrl-C is pressed.
    pub async fn run(&self) -> Result<RunOutcome, RunnerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs until the run time elapses or `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunOutcome, RunnerError>
    where
        F: Future<Output = ()>,
    {
        // Surface client misconfiguration before any user starts
        build_client(&self.config.client_config)?;

        self.stats.reset();

        let class_defs: Vec<UserClass> = self.classes.iter().map(|c| (**c).clone()).collect();
        let counts = distribute_users(self.config.num_users, &class_defs);
        let order = spawn_order(&counts);

        info!(
            users = self.config.num_users,
            spawn_rate = self.config.spawn_rate,
            distribution = %self.describe_distribution(&counts),
            listeners = self.hooks.len(),
            "Ramping up users"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(order.len());

        let spawn_interval = if self.config.spawn_rate.is_finite() && self.config.spawn_rate > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.config.spawn_rate)
                .unwrap_or(MIN_SPAWN_INTERVAL)
                .max(MIN_SPAWN_INTERVAL)
        } else {
            MIN_SPAWN_INTERVAL
        };
        let mut spawn_ticker = time::interval(spawn_interval);
        spawn_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stats_period = self.config.print_stats_interval;
        let mut stats_ticker = time::interval_at(
            Instant::now() + stats_period.unwrap_or(Duration::from_secs(3600)),
            stats_period.unwrap_or(Duration::from_secs(3600)),
        );

        let run_time = self.config.run_time;
        let run_timer = async move {
            match run_time {
                Some(run_time) => time::sleep(run_time).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(run_timer);
        tokio::pin!(shutdown);

        let mut next_user = 0usize;
        let reason = loop {
            tokio::select! {
                _ = spawn_ticker.tick(), if next_user < order.len() => {
                    let class = self.classes[order[next_user]].clone();
                    debug!(user_id = next_user, user_class = %class.name, "Spawning user");
                    handles.push(tokio::spawn(run_user(UserContext {
                        user_id: next_user,
                        class,
                        base_url: self.config.base_url.clone(),
                        client_config: self.config.client_config.clone(),
                        hooks: self.hooks.clone(),
                        stop: stop_rx.clone(),
                    })));
                    next_user += 1;
                    if next_user == order.len() {
                        info!(users = next_user, "All users spawned");
                    }
                }
                _ = &mut run_timer => break StopReason::RunTimeElapsed,
                _ = &mut shutdown => break StopReason::Interrupted,
                _ = stats_ticker.tick(), if stats_period.is_some() => {
                    println!("{}", format_stats_table(&self.stats.snapshot()));
                }
            }
        };

        match reason {
            StopReason::RunTimeElapsed => info!("Run time limit reached, stopping users"),
            StopReason::Interrupted => info!("Interrupted, stopping users"),
        }

        let _ = stop_tx.send(true);
        self.stop_users(handles).await;

        let snapshot = self.stats.snapshot();
        let verdict = self.hooks.fire_quitting(&snapshot);

        println!("{}", format_stats_table(&snapshot));
        println!("{}", format_percentiles_table(&snapshot));
        println!("{}", format_failures_table(&snapshot));

        self.write_reports(&snapshot);

        info!(
            requests = snapshot.total.num_requests,
            failures = snapshot.total.num_failures,
            verdict = ?verdict,
            "Test finished"
        );

        Ok(RunOutcome { snapshot, verdict })
    }

    /// Waits up to the stop timeout for users to finish, then aborts the rest.
    async fn stop_users(&self, mut handles: Vec<JoinHandle<()>>) {
        let deadline = Instant::now() + self.config.stop_timeout;

        let mut finished = 0;
        for handle in handles.iter_mut() {
            if time::timeout_at(deadline, handle).await.is_err() {
                break;
            }
            finished += 1;
        }

        let remaining = handles.split_off(finished);
        if !remaining.is_empty() {
            warn!(
                users = remaining.len(),
                stop_timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "Aborting users still running after the stop timeout"
            );
        }
        for handle in &remaining {
            handle.abort();
        }
        for handle in remaining {
            // Cancelled tasks resolve to a JoinError; nothing to report
            let _ = handle.await;
        }
    }

    fn write_reports(&self, snapshot: &StatsSnapshot) {
        if let Some(prefix) = &self.config.csv_prefix {
            if let Err(e) = write_csv(prefix, snapshot) {
                error!(prefix = %prefix, error = %e, "Failed to write CSV reports");
            }
        }
        if let Some(path) = &self.config.json_summary {
            if let Err(e) = write_json(path, snapshot) {
                error!(path = %path.display(), error = %e, "Failed to write JSON summary");
            }
        }
    }

    fn describe_distribution(&self, counts: &[usize]) -> String {
        self.classes
            .iter()
            .zip(counts)
            .map(|(class, count)| format!("{}: {}", class.name, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
