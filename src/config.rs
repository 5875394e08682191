//! Run configuration and the hook environment.

use crate::model::{Environment, FailurePolicy, Scope};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Settings shared by every case in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Cases executing at once.
    pub concurrency: usize,
    /// Used when a case does not choose its own policy.
    pub failure_policy: FailurePolicy,
    /// Seconds allowed per dispatch.
    pub step_timeout: f64,
    /// Seconds allowed for a whole case.
    pub case_timeout: Option<f64>,
    /// Overrides every case's `base_url`.
    pub base_url: Option<String>,
    /// Tag expression selecting cases.
    pub tags: Option<String>,
    /// Reject a malformed tag expression instead of selecting nothing.
    pub strict_tags: bool,
    /// Attach a timing record to each step.
    pub http_stat: bool,
    /// Global variables seeding every case scope.
    pub variables: Scope,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            failure_policy: FailurePolicy::FailFast,
            step_timeout: 30.0,
            case_timeout: None,
            base_url: None,
            tags: None,
            strict_tags: false,
            http_stat: false,
            variables: Scope::new(),
        }
    }
}

impl RunConfig {
    pub fn step_timeout(&self) -> Duration {
        seconds(self.step_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn case_timeout(&self) -> Option<Duration> {
        self.case_timeout.and_then(seconds)
    }
}

/// Positive, finite seconds as a [`Duration`]. Values too large for a
/// `Duration` saturate to [`Duration::MAX`].
pub fn seconds(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.0)
        .then(|| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Build the hook environment from an optional `.env` file and the process
/// environment. Real process variables always win over file entries.
///
/// Without an explicit file, `./.env` is read when present.
pub fn load_environment(env_file: Option<&Path>) -> Result<Environment> {
    let default_file = Path::new(".env");
    let file = match env_file {
        Some(path) => Some(path),
        None if default_file.is_file() => Some(default_file),
        None => None,
    };

    let mut file_entries = Vec::new();
    if let Some(path) = file {
        debug!("Reading environment file {}", path.display());
        let iter = dotenv::from_path_iter(path)
            .with_context(|| format!("Failed to read env file: {}", path.display()))?;
        for item in iter {
            let entry =
                item.with_context(|| format!("Failed to parse env file: {}", path.display()))?;
            file_entries.push(entry);
        }
    }

    let mut process: Vec<(String, String)> = std::env::vars().collect();
    process.sort();
    Ok(merge_environment(file_entries, process))
}

/// Merge file entries with process variables. Names are deduplicated
/// case-insensitively, keeping the first occurrence.
pub fn merge_environment(
    file_entries: Vec<(String, String)>,
    process: Vec<(String, String)>,
) -> Environment {
    let mut env = Environment::new();
    for (key, value) in unique_env_items(file_entries) {
        let value = process
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(value);
        env.insert(key, value);
    }
    for (key, value) in unique_env_items(process) {
        if !env.keys().any(|k| k.eq_ignore_ascii_case(&key)) {
            env.insert(key, value);
        }
    }
    env
}

fn unique_env_items(items: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut seen: Vec<String> = Vec::new();
    items
        .into_iter()
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            if seen.contains(&lower) {
                false
            } else {
                seen.push(lower);
                true
            }
        })
        .collect()
}

/// Name shown in reports: `SYSTEM_NAME`, then `PROJECT_NAME`, then `Drun`.
pub fn system_name(env: &Environment) -> String {
    ["SYSTEM_NAME", "PROJECT_NAME"]
        .iter()
        .filter_map(|key| env.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .unwrap_or("Drun")
        .to_string()
}

/// Parse a `name=value` assignment. The value is read as YAML so `42`
/// stays an integer and `true` a boolean.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("missing variable name in '{raw}'"));
    }
    let trimmed = value.trim();
    let parsed = match serde_yaml::from_str::<Value>(trimmed) {
        Ok(scalar @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => scalar,
        _ if trimmed.starts_with(['[', '{']) => {
            serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(value.to_string()))
        }
        _ => Value::String(value.to_string()),
    };
    Ok((name.to_string(), parsed))
}
