//! Task and request definitions.
//!
//! A task is one weighted action a simulated user can take. Each task issues
//! a single HTTP request whose path may contain `${var}` placeholders. The
//! placeholders are filled from the user class's variable pools at execution
//! time, while statistics are reported under the grouped name where every
//! placeholder is shown as `[var]`.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Method;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Values a path placeholder can take, keyed by variable name.
pub type VariablePools = BTreeMap<String, Vec<String>>;

/// Errors raised while parsing a path template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unterminated placeholder in path '{0}'")]
    Unterminated(String),

    #[error("Empty placeholder name in path '{0}'")]
    EmptyName(String),

    #[error("Path '{0}' must start with '/'")]
    NotAbsolute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A request path with optional `${var}` placeholders.
///
/// # Example
/// ```
/// use angple_loadtest::task::PathTemplate;
///
/// let template = PathTemplate::parse("/api/v2/boards/${board_id}/posts").unwrap();
/// assert_eq!(template.grouped_name(), "/api/v2/boards/[board_id]/posts");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        if !raw.starts_with('/') {
            return Err(TemplateError::NotAbsolute(raw.to_string()));
        }

        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(TemplateError::EmptyName(raw.to_string()));
            }
            segments.push(Segment::Var(name.to_string()));
            rest = &after[end + 1..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template text as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of every placeholder, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Name used to aggregate statistics across placeholder values.
    pub fn grouped_name(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Var(name) => format!("[{}]", name),
            })
            .collect()
    }

    /// Fill every placeholder with a random value from its pool.
    ///
    /// Placeholders without a pool are left as written.
    pub fn render<R: Rng + ?Sized>(&self, pools: &VariablePools, rng: &mut R) -> String {
        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Var(name) => {
                    match pools.get(name).and_then(|values| values.choose(rng)) {
                        Some(value) => path.push_str(value),
                        None => {
                            path.push_str("${");
                            path.push_str(name);
                            path.push('}');
                        }
                    }
                }
            }
        }
        path
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// HTTP request issued by a task.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: PathTemplate,
    /// Query parameters, sent in order
    pub query: Vec<(String, String)>,
    /// Explicit statistics name; defaults to the path's grouped name
    pub name: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method, path: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            method,
            path: PathTemplate::parse(path)?,
            query: Vec::new(),
            name: None,
        })
    }

    pub fn get(path: &str) -> Result<Self, TemplateError> {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Name under which this request is reported.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.path.grouped_name(),
        }
    }
}

/// A weighted action performed by a simulated user.
#[derive(Debug, Clone)]
pub struct TaskDef {
    pub name: String,
    pub weight: u32,
    pub request: RequestSpec,
}

impl TaskDef {
    pub fn new(name: &str, weight: u32, request: RequestSpec) -> Self {
        Self {
            name: name.to_string(),
            weight,
            request,
        }
    }
}

/// Request run once when a user starts, before its first task.
///
/// A response other than `expected_status` is logged as an error. The user
/// keeps running either way.
#[derive(Debug, Clone)]
pub struct StartupCheck {
    pub request: RequestSpec,
    pub expected_status: u16,
}
