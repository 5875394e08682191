//! Run reports.

use crate::config::system_name;
use crate::model::{CaseResult, Environment, StepStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Yaml,
    Text,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
            ReportFormat::Text => "txt",
        }
    }
}

/// Counters over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub system_name: String,
    #[serde(default)]
    pub environment: Option<String>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub steps_total: usize,
    pub steps_passed: usize,
    pub steps_failed: usize,
    pub steps_error: usize,
    pub steps_skipped: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    fn tally(cases: &[CaseResult]) -> Self {
        let mut summary = Self {
            total: cases.len(),
            ..Self::default()
        };
        for case in cases {
            if case.passed() {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            for step in &case.steps {
                summary.steps_total += 1;
                match step.status {
                    StepStatus::Passed => summary.steps_passed += 1,
                    StepStatus::Failed => summary.steps_failed += 1,
                    StepStatus::Error => summary.steps_error += 1,
                    StepStatus::Skipped => summary.steps_skipped += 1,
                }
            }
        }
        summary
    }
}

/// Everything a run produced. Serialized, this is what downstream
/// consumers read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub cases: Vec<CaseResult>,
    /// RFC 3339.
    pub timestamp: String,
}

impl RunReport {
    pub fn new(cases: Vec<CaseResult>, duration: Duration, env: &Environment) -> Self {
        let mut summary = RunSummary::tally(&cases);
        summary.system_name = system_name(env);
        summary.environment = env.get("ENV").cloned();
        summary.duration_ms = duration.as_millis() as u64;
        Self {
            summary,
            cases,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn passed(&self) -> bool {
        self.summary.failed == 0
    }

    /// Write the report into `report_dir` as
    /// `<system>-<YYYYmmdd-HHMMSS>.<ext>` and return the path.
    pub fn save(&self, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
        fs::create_dir_all(report_dir).with_context(|| {
            format!("Failed to create report directory: {}", report_dir.display())
        })?;

        let content = match format {
            ReportFormat::Json => serde_json::to_string_pretty(self)?,
            ReportFormat::Yaml => serde_yaml::to_string(self)?,
            ReportFormat::Text => self.render_text(),
        };

        let system = self.summary.system_name.replace([' ', '/'], "_");
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = report_dir.join(format!("{system}-{stamp}.{}", format.extension()));
        fs::write(&path, content)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }

    pub fn render_text(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "{} test report ({})", s.system_name, self.timestamp);
        if let Some(env) = &s.environment {
            let _ = writeln!(out, "Environment: {env}");
        }
        let _ = writeln!(
            out,
            "Cases: {} total, {} passed, {} failed",
            s.total, s.passed, s.failed
        );
        let _ = writeln!(
            out,
            "Steps: {} total, {} passed, {} failed, {} error, {} skipped",
            s.steps_total, s.steps_passed, s.steps_failed, s.steps_error, s.steps_skipped
        );
        let _ = writeln!(out, "Duration: {} ms", s.duration_ms);

        for case in &self.cases {
            let _ = writeln!(
                out,
                "\n[{}] {} ({} ms)",
                if case.passed() { "PASS" } else { "FAIL" },
                case.name,
                case.duration_ms
            );
            for (i, step) in case.steps.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {} ({:?}, {} ms)",
                    i + 1,
                    step.name,
                    step.status,
                    step.duration_ms
                );
                if let Some(error) = &step.error {
                    let _ = writeln!(out, "     Error: {}", error.message);
                }
                for assertion in step.assertions.iter().filter(|a| !a.passed) {
                    if let Some(message) = &assertion.message {
                        let _ = writeln!(out, "     Assertion: {message}");
                    }
                }
                if let Some(timing) = &step.timing {
                    let _ = writeln!(out, "     Timing: {timing}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AssertionOutcome, CaseStatus, Comparator, ErrorKind, HttpMethod, RenderedRequest,
        ResponseRecord, Scope, StepError, StepResult,
    };
    use indexmap::IndexMap;
    use serde_json::json;

    fn step(name: &str, status: StepStatus) -> StepResult {
        let mut extracted = Scope::new();
        extracted.insert(format!("{name}_id"), json!(1));
        extracted.insert("token".into(), json!("t"));
        StepResult {
            name: name.into(),
            status,
            request: Some(RenderedRequest {
                method: HttpMethod::Post,
                url: "http://localhost/x".into(),
                params: IndexMap::new(),
                headers: IndexMap::new(),
                body: Some(json!({"a": 1})),
            }),
            response: Some(ResponseRecord {
                status_code: 200,
                headers: IndexMap::new(),
                body: json!({"ok": true}),
                elapsed_ms: 3.5,
                stream_events: None,
            }),
            timing: None,
            extracted,
            assertions: vec![AssertionOutcome {
                check: "status_code".into(),
                comparator: Comparator::Eq,
                expect: json!(201),
                actual: Some(json!(200)),
                passed: status == StepStatus::Passed,
                message: Some("status_code eq: expected 201, actual 200".into()),
            }],
            error: (status != StepStatus::Passed)
                .then(|| StepError::new(ErrorKind::Assertion, "1 of 1 assertion(s) failed")),
            duration_ms: 4,
        }
    }

    fn case(name: &str, steps: Vec<StepResult>) -> CaseResult {
        let status = if steps.iter().all(StepResult::passed) {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        };
        CaseResult {
            name: name.into(),
            status,
            steps,
            tags: vec!["smoke".into()],
            source: None,
            duration_ms: 10,
        }
    }

    fn report() -> RunReport {
        let mut env = Environment::new();
        env.insert("SYSTEM_NAME".into(), "shop api".into());
        env.insert("ENV".into(), "staging".into());
        RunReport::new(
            vec![
                case("a", vec![step("one", StepStatus::Passed), step("two", StepStatus::Passed)]),
                case(
                    "b",
                    vec![
                        step("one", StepStatus::Failed),
                        StepResult::skipped("two", "an earlier step did not pass"),
                    ],
                ),
            ],
            Duration::from_millis(25),
            &env,
        )
    }

    #[test]
    fn test_summary_counts() {
        let report = report();
        let s = &report.summary;
        assert_eq!((s.total, s.passed, s.failed), (2, 1, 1));
        assert_eq!(s.steps_total, 4);
        assert_eq!((s.steps_passed, s.steps_failed, s.steps_skipped), (2, 1, 1));
        assert_eq!(s.system_name, "shop api");
        assert_eq!(s.environment.as_deref(), Some("staging"));
        assert_eq!(s.duration_ms, 25);
        assert!(!report.passed());
    }

    #[test]
    fn test_json_round_trip_keeps_order_and_statuses() {
        let report = report();
        let text = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&text).unwrap();

        assert_eq!(back, report);
        let steps = &back.cases[1].steps;
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[1].status, StepStatus::Skipped);
        let keys: Vec<&str> = steps[0].extracted.keys().map(String::as_str).collect();
        assert_eq!(keys, ["one_id", "token"]);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["cases"][1]["status"], json!("failed"));
        assert_eq!(value["cases"][1]["steps"][1]["error"]["kind"], json!("skipped"));
    }

    #[test]
    fn test_save_in_each_format() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();
        for format in [ReportFormat::Json, ReportFormat::Yaml, ReportFormat::Text] {
            let path = report.save(&dir.path().join("reports"), format).unwrap();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            assert!(name.starts_with("shop_api-"));
            assert!(name.ends_with(format.extension()));
            assert!(!fs::read_to_string(&path).unwrap().is_empty());
        }
    }

    #[test]
    fn test_text_report_lists_failures() {
        let text = report().render_text();
        assert!(text.contains("Cases: 2 total, 1 passed, 1 failed"));
        assert!(text.contains("[FAIL] b"));
        assert!(text.contains("Assertion: status_code eq: expected 201, actual 200"));
    }
}
