//! YAML test plans.
//!
//! A test plan holds the run settings (target, users, spawn rate, duration),
//! the thresholds used by the request and shutdown hooks, and optionally the
//! user classes to simulate. Without `userClasses` the built-in Angple
//! profile is used.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::angple;
use crate::task::{RequestSpec, StartupCheck, TaskDef, TemplateError};
use crate::user_class::{validate_classes, ProfileError, UserClass};
use crate::wait_time::WaitTime;

/// Errors that can occur when loading or parsing YAML configuration.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Invalid request path: {0}")]
    Template(#[from] TemplateError),

    #[error("Invalid user class: {0}")]
    Profile(#[from] ProfileError),
}

/// Only this plan format version is understood.
pub const SUPPORTED_VERSION: &str = "1.0";

const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Duration in YAML: a unit string (`"30s"`, `"500ms"`) or a bare number.
///
/// What a bare number means depends on the field: seconds for run settings,
/// milliseconds for the slow-request threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Number(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Number(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => parse_duration(s),
        }
    }

    pub fn to_millis_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Number(ms) => Ok(StdDuration::from_millis(*ms)),
            YamlDuration::String(s) => parse_duration(s),
        }
    }
}

fn parse_duration(s: &str) -> Result<StdDuration, YamlConfigError> {
    crate::utils::parse_duration_string(s)
        .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e)))
}

/// Metadata about the test plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlGlobalConfig {
    pub base_url: String,

    #[serde(default = "default_users")]
    pub users: usize,

    /// Users started per second
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,

    /// Run until interrupted when absent
    pub duration: Option<YamlDuration>,

    #[serde(default = "default_timeout")]
    pub timeout: YamlDuration,

    pub stop_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub skip_tls_verify: bool,

    pub resolve_target_addr: Option<String>,

    pub custom_headers: Option<String>,
}

fn default_users() -> usize {
    1
}

fn default_spawn_rate() -> f64 {
    1.0
}

fn default_timeout() -> YamlDuration {
    YamlDuration::Number(30)
}

/// Limits checked per request and at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlThresholds {
    pub slow_request: Option<YamlDuration>,
    pub max_fail_ratio: Option<f64>,
}

/// Report outputs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlOutput {
    pub csv_prefix: Option<String>,
    pub json_summary: Option<String>,
    pub print_stats_interval: Option<YamlDuration>,
}

/// Wait between tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlWaitTime {
    /// Uniformly random between `min` and `max`
    Between { min: YamlDuration, max: YamlDuration },

    /// Start a task at most every `pacing`
    Pacing { pacing: YamlDuration },

    /// Fixed wait (e.g., "2s")
    Constant(YamlDuration),
}

impl YamlWaitTime {
    pub fn to_wait_time(&self) -> Result<WaitTime, YamlConfigError> {
        match self {
            YamlWaitTime::Between { min, max } => {
                let min = min.to_std_duration()?;
                let max = max.to_std_duration()?;
                if min > max {
                    return Err(YamlConfigError::Validation(format!(
                        "waitTime min ({:?}) must not exceed max ({:?})",
                        min, max
                    )));
                }
                Ok(WaitTime::between(min, max))
            }
            YamlWaitTime::Pacing { pacing } => {
                Ok(WaitTime::ConstantPacing(pacing.to_std_duration()?))
            }
            YamlWaitTime::Constant(duration) => Ok(WaitTime::constant(duration.to_std_duration()?)),
        }
    }
}

impl Default for YamlWaitTime {
    fn default() -> Self {
        YamlWaitTime::Constant(YamlDuration::Number(1))
    }
}

/// Request issued by a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlRequest {
    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    /// Ordered `[key, value]` pairs
    #[serde(default)]
    pub query_params: Vec<(String, serde_yaml::Value)>,

    /// Statistics name; defaults to the path with `${var}` shown as `[var]`
    pub name: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl YamlRequest {
    pub fn to_request_spec(&self) -> Result<RequestSpec, YamlConfigError> {
        let method = parse_method(&self.method)?;
        let mut spec = RequestSpec::new(method, &self.path)?;

        for (key, value) in &self.query_params {
            let value = scalar_to_string(value).ok_or_else(|| {
                YamlConfigError::Validation(format!(
                    "Query parameter '{}' on '{}' must be a string, number or boolean",
                    key, self.path
                ))
            })?;
            spec = spec.with_query(key, &value);
        }

        if let Some(name) = &self.name {
            spec = spec.named(name);
        }
        Ok(spec)
    }
}

fn parse_method(method: &str) -> Result<Method, YamlConfigError> {
    let upper = method.to_uppercase();
    if !HTTP_METHODS.contains(&upper.as_str()) {
        return Err(YamlConfigError::Validation(format!(
            "Unsupported HTTP method '{}'. Expected one of: {}",
            method,
            HTTP_METHODS.join(", ")
        )));
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|e| YamlConfigError::Validation(format!("Invalid HTTP method '{}': {}", method, e)))
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Task definition in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlTask {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    pub request: YamlRequest,
}

fn default_weight() -> u32 {
    1
}

/// Request sent once when a user starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlStartupCheck {
    #[serde(flatten)]
    pub request: YamlRequest,

    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
}

fn default_expect_status() -> u16 {
    200
}

/// User class definition in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlUserClass {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    pub fixed_count: Option<usize>,

    #[serde(default)]
    pub wait_time: YamlWaitTime,

    #[serde(default)]
    pub variables: BTreeMap<String, Vec<String>>,

    pub on_start: Option<YamlStartupCheck>,

    pub tasks: Vec<YamlTask>,
}

impl YamlUserClass {
    pub fn to_user_class(&self) -> Result<UserClass, YamlConfigError> {
        let tasks = self
            .tasks
            .iter()
            .map(|task| {
                Ok(TaskDef::new(
                    &task.name,
                    task.weight,
                    task.request.to_request_spec()?,
                ))
            })
            .collect::<Result<Vec<_>, YamlConfigError>>()?;

        let on_start = match &self.on_start {
            Some(check) => Some(StartupCheck {
                request: check.request.to_request_spec()?,
                expected_status: check.expect_status,
            }),
            None => None,
        };

        Ok(UserClass {
            name: self.name.clone(),
            weight: self.weight,
            fixed_count: self.fixed_count,
            wait_time: self.wait_time.to_wait_time()?,
            on_start,
            variables: self.variables.clone(),
            tasks,
        })
    }
}

/// Collects validation errors with the path of the offending field.
#[derive(Default)]
struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<String>,
}

impl ValidationContext {
    fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    fn exit(&mut self) {
        self.field_path.pop();
    }

    fn field_error(&mut self, message: impl Into<String>) {
        self.errors
            .push(format!("{}: {}", self.field_path.join("."), message.into()));
    }

    fn into_result(self) -> Result<(), YamlConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(YamlConfigError::Validation(self.errors.join("; ")))
        }
    }
}

/// Root YAML configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlConfig {
    pub version: String,

    #[serde(default)]
    pub metadata: YamlMetadata,

    pub config: YamlGlobalConfig,

    #[serde(default)]
    pub thresholds: YamlThresholds,

    #[serde(default)]
    pub output: YamlOutput,

    #[serde(default)]
    pub user_classes: Vec<YamlUserClass>,
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut ctx = ValidationContext::default();

        ctx.enter("version");
        if self.version != SUPPORTED_VERSION {
            ctx.field_error(format!(
                "Unsupported version '{}'. Supported: {}",
                self.version, SUPPORTED_VERSION
            ));
        }
        ctx.exit();

        ctx.enter("config");

        ctx.enter("baseUrl");
        let base_url = &self.config.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            ctx.field_error(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            ));
        } else if base_url.contains(' ') {
            ctx.field_error("URL cannot contain spaces");
        }
        ctx.exit();

        ctx.enter("users");
        if self.config.users == 0 {
            ctx.field_error("Must be at least 1");
        }
        ctx.exit();

        ctx.enter("spawnRate");
        if !(self.config.spawn_rate.is_finite() && self.config.spawn_rate > 0.0) {
            ctx.field_error(format!(
                "Must be a positive number, got: {}",
                self.config.spawn_rate
            ));
        }
        ctx.exit();

        for (field, duration) in [
            ("duration", self.config.duration.as_ref()),
            ("timeout", Some(&self.config.timeout)),
            ("stopTimeout", self.config.stop_timeout.as_ref()),
        ] {
            if let Some(Err(e)) = duration.map(YamlDuration::to_std_duration) {
                ctx.enter(field);
                ctx.field_error(e.to_string());
                ctx.exit();
            }
        }

        ctx.exit(); // config

        ctx.enter("thresholds");
        if let Some(Err(e)) = self
            .thresholds
            .slow_request
            .as_ref()
            .map(YamlDuration::to_millis_duration)
        {
            ctx.enter("slowRequest");
            ctx.field_error(e.to_string());
            ctx.exit();
        }
        if let Some(ratio) = self.thresholds.max_fail_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                ctx.enter("maxFailRatio");
                ctx.field_error(format!("Must be between 0.0 and 1.0, got: {}", ratio));
                ctx.exit();
            }
        }
        ctx.exit();

        ctx.enter("userClasses");
        for (idx, class) in self.user_classes.iter().enumerate() {
            ctx.enter(&format!("[{}]", idx));
            match class.to_user_class() {
                Ok(user_class) => {
                    if let Err(e) = user_class.validate() {
                        ctx.field_error(e.to_string());
                    }
                }
                Err(e) => ctx.field_error(e.to_string()),
            }
            ctx.exit();
        }
        let mut seen = std::collections::HashSet::new();
        for class in &self.user_classes {
            if !seen.insert(class.name.as_str()) {
                ctx.field_error(format!("Duplicate user class '{}'", class.name));
            }
        }
        ctx.exit();

        ctx.into_result()
    }

    /// User classes to simulate; the built-in Angple profile when none are
    /// defined.
    pub fn to_user_classes(&self) -> Result<Vec<UserClass>, YamlConfigError> {
        let classes = if self.user_classes.is_empty() {
            angple::profile()?
        } else {
            self.user_classes
                .iter()
                .map(YamlUserClass::to_user_class)
                .collect::<Result<Vec<_>, _>>()?
        };
        validate_classes(&classes)?;
        Ok(classes)
    }
}
