use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::Duration;

use crate::angple;
use crate::client::{parse_custom_headers, parse_dns_override, ClientConfig};
use crate::events::{FailRatioGuard, SlowRequestLogger};
use crate::task::TemplateError;
use crate::user_class::{validate_classes, ProfileError, UserClass};
use crate::utils::parse_duration_string;
use crate::yaml_config::{YamlConfig, YamlConfigError};

/// Errors raised while assembling the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TARGET_URL must be set (or config.baseUrl in the LOADTEST_CONFIG file)")]
    MissingTargetUrl,

    #[error("Invalid {name} value '{value}': {message}")]
    InvalidValue {
        name: &'static str,
        value: String,
        message: String,
    },

    #[error("Failed to load {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: YamlConfigError,
    },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

fn invalid(name: &'static str, value: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        message: message.into(),
    }
}

/// Log output format, chosen with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(env::var("LOG_FORMAT").ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub num_users: usize,
    /// Users started per second
    pub spawn_rate: f64,
    /// `None` runs until Ctrl-C
    pub run_time: Option<Duration>,
    /// Grace period for users to finish after the stop signal
    pub stop_timeout: Duration,
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    pub slow_request_threshold: Duration,
    pub max_fail_ratio: f64,
    pub csv_prefix: Option<String>,
    pub json_summary: Option<PathBuf>,
    pub print_stats_interval: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub config_file: Option<PathBuf>,
    pub user_classes: Vec<UserClass>,
}

impl Config {
    /// Defaults for everything except the target URL.
    pub fn with_target(target_url: &str) -> Result<Self, ConfigError> {
        Ok(Config {
            target_url: target_url.to_string(),
            num_users: 1,
            spawn_rate: 1.0,
            run_time: None,
            stop_timeout: Duration::ZERO,
            request_timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            resolve_target_addr: None,
            custom_headers: None,
            slow_request_threshold: SlowRequestLogger::DEFAULT_THRESHOLD,
            max_fail_ratio: FailRatioGuard::DEFAULT_MAX_RATIO,
            csv_prefix: None,
            json_summary: None,
            print_stats_interval: None,
            metrics_port: None,
            config_file: None,
            user_classes: angple::profile()?,
        })
    }

    /// Loads configuration from the process environment.
    ///
    /// Precedence: defaults, then the YAML file named by `LOADTEST_CONFIG`,
    /// then individual environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`], with variables read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let yaml = match var("LOADTEST_CONFIG") {
            Some(path) => Some((
                PathBuf::from(&path),
                YamlConfig::from_file(&path).map_err(|source| ConfigError::Yaml {
                    path: path.clone(),
                    source,
                })?,
            )),
            None => None,
        };

        let target_url = match (var("TARGET_URL"), &yaml) {
            (Some(url), _) => url,
            (None, Some((_, yaml))) => yaml.config.base_url.clone(),
            (None, None) => return Err(ConfigError::MissingTargetUrl),
        };

        let mut config = Self::with_target(&target_url)?;

        if let Some((path, yaml)) = &yaml {
            config.apply_yaml(yaml).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;
            config.config_file = Some(path.clone());
        }

        config.apply_env(&var)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: &YamlConfig) -> Result<(), YamlConfigError> {
        let settings = &yaml.config;
        self.num_users = settings.users;
        self.spawn_rate = settings.spawn_rate;
        self.run_time = settings
            .duration
            .as_ref()
            .map(|d| d.to_std_duration())
            .transpose()?;
        self.request_timeout = settings.timeout.to_std_duration()?;
        if let Some(stop_timeout) = &settings.stop_timeout {
            self.stop_timeout = stop_timeout.to_std_duration()?;
        }
        self.skip_tls_verify = settings.skip_tls_verify;
        self.resolve_target_addr = settings.resolve_target_addr.clone();
        self.custom_headers = settings.custom_headers.clone();

        if let Some(slow_request) = &yaml.thresholds.slow_request {
            self.slow_request_threshold = slow_request.to_millis_duration()?;
        }
        if let Some(max_fail_ratio) = yaml.thresholds.max_fail_ratio {
            self.max_fail_ratio = max_fail_ratio;
        }

        self.csv_prefix = yaml.output.csv_prefix.clone();
        self.json_summary = yaml.output.json_summary.as_ref().map(PathBuf::from);
        self.print_stats_interval = yaml
            .output
            .print_stats_interval
            .as_ref()
            .map(|d| d.to_std_duration())
            .transpose()?;

        self.user_classes = yaml.to_user_classes()?;
        Ok(())
    }

    fn apply_env<F>(&mut self, var: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("NUM_USERS") {
            self.num_users = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("NUM_USERS", &value, e.to_string()))?;
        }

        if let Some(value) = var("SPAWN_RATE") {
            self.spawn_rate = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid("SPAWN_RATE", &value, e.to_string()))?;
        }

        if let Some(value) = var("TEST_DURATION") {
            self.run_time = Some(env_duration("TEST_DURATION", &value)?);
        }
        if let Some(value) = var("STOP_TIMEOUT") {
            self.stop_timeout = env_duration("STOP_TIMEOUT", &value)?;
        }
        if let Some(value) = var("REQUEST_TIMEOUT") {
            self.request_timeout = env_duration("REQUEST_TIMEOUT", &value)?;
        }
        if let Some(value) = var("PRINT_STATS_INTERVAL") {
            self.print_stats_interval = Some(env_duration("PRINT_STATS_INTERVAL", &value)?);
        }

        if let Some(value) = var("SKIP_TLS_VERIFY") {
            self.skip_tls_verify = value.trim().to_lowercase() == "true";
        }
        if let Some(value) = var("RESOLVE_TARGET_ADDR") {
            self.resolve_target_addr = Some(value);
        }
        if let Some(value) = var("CUSTOM_HEADERS") {
            self.custom_headers = Some(value);
        }

        if let Some(value) = var("SLOW_REQUEST_THRESHOLD_MS") {
            let millis: u64 = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    invalid("SLOW_REQUEST_THRESHOLD_MS", &value, e.to_string())
                })?;
            self.slow_request_threshold = Duration::from_millis(millis);
        }
        if let Some(value) = var("MAX_FAIL_RATIO") {
            self.max_fail_ratio = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| {
                    invalid("MAX_FAIL_RATIO", &value, e.to_string())
                })?;
        }

        if let Some(value) = var("CSV_PREFIX") {
            self.csv_prefix = Some(value);
        }
        if let Some(value) = var("JSON_SUMMARY") {
            self.json_summary = Some(PathBuf::from(value));
        }
        if let Some(value) = var("METRICS_PORT") {
            let port: u16 = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid("METRICS_PORT", &value, e.to_string()))?;
            self.metrics_port = Some(port);
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.target_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(invalid("TARGET_URL", url, "must start with http:// or https://"));
        }
        if url.contains(' ') {
            return Err(invalid("TARGET_URL", url, "cannot contain spaces"));
        }

        if self.num_users == 0 {
            return Err(invalid("NUM_USERS", "0", "must be at least 1"));
        }
        if !(self.spawn_rate.is_finite() && self.spawn_rate > 0.0) {
            return Err(invalid(
                "SPAWN_RATE",
                &self.spawn_rate.to_string(),
                "must be a positive number",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_fail_ratio) {
            return Err(invalid(
                "MAX_FAIL_RATIO",
                &self.max_fail_ratio.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if self.run_time == Some(Duration::ZERO) {
            return Err(invalid("TEST_DURATION", "0", "must be greater than zero"));
        }
        if self.print_stats_interval == Some(Duration::ZERO) {
            return Err(invalid("PRINT_STATS_INTERVAL", "0", "must be greater than zero"));
        }

        if let Some(resolve) = &self.resolve_target_addr {
            parse_dns_override(resolve)
                .map_err(|e| invalid("RESOLVE_TARGET_ADDR", resolve, e.to_string()))?;
        }
        if let Some(headers) = &self.custom_headers {
            parse_custom_headers(Some(headers))
                .map_err(|e| invalid("CUSTOM_HEADERS", headers, e.to_string()))?;
        }

        validate_classes(&self.user_classes)?;
        Ok(())
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.request_timeout,
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            custom_headers: self.custom_headers.clone(),
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting load test:");
        println!("  Target URL: {}", self.target_url);
        if let Some(path) = &self.config_file {
            println!("  Config file: {}", path.display());
        }
        println!("  Users: {} (spawn rate {}/s)", self.num_users, self.spawn_rate);
        match self.run_time {
            Some(run_time) => println!("  Run time: {:?}", run_time),
            None => println!("  Run time: until interrupted (Ctrl-C)"),
        }
        println!("  Request timeout: {:?}", self.request_timeout);
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
        println!(
            "  Slow request threshold: {}ms",
            self.slow_request_threshold.as_millis()
        );
        println!("  Max fail ratio: {:.2}%", self.max_fail_ratio * 100.0);
        for class in &self.user_classes {
            println!(
                "  User class {}: weight {}, {} tasks",
                class.name,
                class.weight,
                class.tasks.len()
            );
        }

        match &self.custom_headers {
            Some(headers_str) => match parse_custom_headers(Some(headers_str)) {
                Ok(parsed) if !parsed.is_empty() => {
                    println!("  Custom Headers Enabled: Yes");
                    for (name, value) in parsed.iter() {
                        println!(
                            "    {}: {}",
                            name,
                            value.to_str().unwrap_or("<non-ASCII or sensitive value>")
                        );
                    }
                }
                _ => println!("  Custom Headers Enabled: No (CUSTOM_HEADERS was empty after parsing)"),
            },
            None => println!("  Custom Headers Enabled: No (CUSTOM_HEADERS not set)"),
        }
    }
}

fn env_duration(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration_string(value.trim()).map_err(|e| invalid(name, value, e))
}
