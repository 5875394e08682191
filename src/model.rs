//! Case declarations and execution results.

use crate::error::{Error, TransportError};
use crate::stream::StreamEvent;
use crate::timing::HttpStat;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Variables visible while rendering a case, in insertion order.
pub type Scope = IndexMap<String, Value>;

/// Read-only environment passed to hooks.
pub type Environment = IndexMap<String, String>;

/// One declared test unit: a config plus ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub name: String,
    pub config: CaseConfig,
    pub steps: Vec<Step>,
    /// Parameter row this instance was expanded from, if data-driven.
    #[serde(default)]
    pub parameters: Scope,
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl Case {
    pub fn tags(&self) -> &[String] {
        &self.config.tags
    }
}

/// Case-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaseConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Case variables, rendered in order on top of the globals.
    #[serde(default)]
    pub variables: Scope,
    /// Default headers for every step; step headers win.
    #[serde(default)]
    pub headers: IndexMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Data-driven rows. Each row yields its own case instance.
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    /// Per-step dispatch timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// Source of data-driven rows: inline mappings or a CSV file with a
/// header line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameters {
    Rows(Vec<Scope>),
    Csv { csv: String },
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters::Rows(Vec::new())
    }
}

impl Parameters {
    pub fn is_empty(&self) -> bool {
        matches!(self, Parameters::Rows(rows) if rows.is_empty())
    }
}

/// What happens to the remaining steps once a step does not pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Remaining steps are recorded as skipped.
    #[default]
    FailFast,
    /// Remaining steps still execute.
    CollectAll,
}

/// A single request/response cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Step variables, rendered before the request and merged forward.
    #[serde(default)]
    pub variables: Scope,
    pub request: StepRequest,
    #[serde(default)]
    pub setup_hooks: Vec<String>,
    #[serde(default)]
    pub teardown_hooks: Vec<String>,
    /// Variable name to check path, e.g. `user_id: body.data.id`.
    #[serde(default)]
    pub extract: IndexMap<String, String>,
    #[serde(default)]
    pub validate: Vec<Validator>,
}

/// Request declaration. Every field may contain templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path", alias = "url")]
    pub path: Value,
    #[serde(default)]
    pub params: IndexMap<String, Value>,
    #[serde(default)]
    pub headers: IndexMap<String, Value>,
    #[serde(default, alias = "json")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> Value {
    Value::String(String::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(Error::InvalidRequest(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

/// Comparison applied by a [`Validator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    NotContains,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "endswith")]
    EndsWith,
    Regex,
    LenEq,
    LenGt,
    LenLt,
    In,
    NotIn,
    TypeMatch,
}

impl Comparator {
    pub fn from_name(name: &str) -> Option<Self> {
        let comparator = match name.trim().to_ascii_lowercase().as_str() {
            "eq" | "equals" | "equal" | "==" => Comparator::Eq,
            "ne" | "not_equal" | "!=" => Comparator::Ne,
            "gt" | "greater_than" | ">" => Comparator::Gt,
            "ge" | "greater_or_equals" | ">=" => Comparator::Ge,
            "lt" | "less_than" | "<" => Comparator::Lt,
            "le" | "less_or_equals" | "<=" => Comparator::Le,
            "contains" => Comparator::Contains,
            "not_contains" => Comparator::NotContains,
            "startswith" | "starts_with" => Comparator::StartsWith,
            "endswith" | "ends_with" => Comparator::EndsWith,
            "regex" | "regex_match" => Comparator::Regex,
            "len_eq" | "length_equal" => Comparator::LenEq,
            "len_gt" | "length_greater_than" => Comparator::LenGt,
            "len_lt" | "length_less_than" => Comparator::LenLt,
            "in" | "contained_by" => Comparator::In,
            "not_in" => Comparator::NotIn,
            "type_match" => Comparator::TypeMatch,
            _ => return None,
        };
        Some(comparator)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
            Comparator::Contains => "contains",
            Comparator::NotContains => "not_contains",
            Comparator::StartsWith => "startswith",
            Comparator::EndsWith => "endswith",
            Comparator::Regex => "regex",
            Comparator::LenEq => "len_eq",
            Comparator::LenGt => "len_gt",
            Comparator::LenLt => "len_lt",
            Comparator::In => "in",
            Comparator::NotIn => "not_in",
            Comparator::TypeMatch => "type_match",
        }
    }
}

/// An assertion rule, written in YAML as `- eq: [status_code, 200]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "IndexMap<String, Vec<Value>>",
    into = "IndexMap<String, Vec<Value>>"
)]
pub struct Validator {
    pub comparator: Comparator,
    pub check: String,
    pub expect: Value,
}

impl TryFrom<IndexMap<String, Vec<Value>>> for Validator {
    type Error = String;

    fn try_from(raw: IndexMap<String, Vec<Value>>) -> Result<Self, Self::Error> {
        if raw.len() != 1 {
            return Err(format!(
                "a validator needs exactly one comparator, found {}",
                raw.len()
            ));
        }
        let Some((name, mut operands)) = raw.into_iter().next() else {
            return Err("empty validator".to_string());
        };
        let comparator = Comparator::from_name(&name)
            .ok_or_else(|| format!("unknown comparator '{name}'"))?;
        if operands.len() != 2 {
            return Err(format!(
                "comparator '{name}' expects [check, expect], got {} operand(s)",
                operands.len()
            ));
        }
        let expect = operands.pop().unwrap_or(Value::Null);
        let check = match operands.pop() {
            Some(Value::String(check)) => check,
            Some(other) => other.to_string(),
            None => return Err("missing check".to_string()),
        };
        Ok(Self {
            comparator,
            check,
            expect,
        })
    }
}

impl From<Validator> for IndexMap<String, Vec<Value>> {
    fn from(validator: Validator) -> Self {
        let mut map = IndexMap::new();
        map.insert(
            validator.comparator.as_str().to_string(),
            vec![Value::String(validator.check), validator.expect],
        );
        map
    }
}

/// A request after template rendering, as handed to hooks and the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub params: IndexMap<String, String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Response captured from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status_code: u16,
    /// Header names are lowercase.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Parsed JSON when possible, otherwise the text, `null` when empty.
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub elapsed_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_events: Option<Vec<StreamEvent>>,
}

impl ResponseRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnresolvedVariable,
    UnknownFunction,
    HookExecution,
    Configuration,
    Transport,
    Timeout,
    Assertion,
    TemplateSyntax,
    InvalidRequest,
    Skipped,
}

/// Structured reason attached to a step that did not pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::UnresolvedVariable(_) => ErrorKind::UnresolvedVariable,
            Error::UnknownFunction(_) => ErrorKind::UnknownFunction,
            Error::HookExecution { .. } => ErrorKind::HookExecution,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Transport(TransportError::Timeout(_)) => ErrorKind::Timeout,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Assertion(_) => ErrorKind::Assertion,
            Error::TemplateSyntax { .. } => ErrorKind::TemplateSyntax,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result of evaluating one [`Validator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub check: String,
    pub comparator: Comparator,
    pub expect: Value,
    #[serde(default)]
    pub actual: Option<Value>,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub request: Option<RenderedRequest>,
    #[serde(default)]
    pub response: Option<ResponseRecord>,
    #[serde(default)]
    pub timing: Option<HttpStat>,
    /// Variables this step contributed to the scope.
    #[serde(default)]
    pub extracted: Scope,
    #[serde(default)]
    pub assertions: Vec<AssertionOutcome>,
    #[serde(default)]
    pub error: Option<StepError>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            request: None,
            response: None,
            timing: None,
            extracted: Scope::new(),
            assertions: Vec::new(),
            error: Some(StepError::new(ErrorKind::Skipped, reason)),
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub status: CaseStatus,
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CaseResult {
    /// Build a result whose status is derived from its steps.
    pub fn from_steps(case: &Case, steps: Vec<StepResult>, duration_ms: u64) -> Self {
        let status = if steps.iter().all(StepResult::passed) {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        };
        Self {
            name: case.name.clone(),
            status,
            steps,
            tags: case.config.tags.clone(),
            source: case.source.clone(),
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}
