//! drun CLI - run YAML API cases.

use anyhow::{anyhow, Result};
use clap::Parser;
use drun::config::parse_assignment;
use drun::{
    builtins, discover, load_all, load_environment, select_cases, validate_cases, CaseResult,
    CaseRunner, FailurePolicy, HttpTransport, NoTiming, RatioEstimator, ReportFormat, RunConfig,
    RunReport, StepStatus, TimingEstimator,
};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Data-driven YAML API test runner.
#[derive(Parser, Debug)]
#[command(name = "drun", version, about)]
struct Cli {
    /// Case files or directories. Defaults to the current directory.
    paths: Vec<PathBuf>,

    /// Tag expression, e.g. "smoke and not slow".
    #[arg(short = 'k', long = "tags", env = "DRUN_TAGS")]
    tags: Option<String>,

    /// Abort on a malformed tag expression instead of selecting nothing.
    #[arg(long = "strict-tags")]
    strict_tags: bool,

    /// Cases to run at once.
    #[arg(short = 'c', long = "concurrency", env = "DRUN_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Keep running the remaining steps of a case after one fails.
    #[arg(long = "collect-all")]
    collect_all: bool,

    /// Timeout in seconds per step.
    #[arg(short = 't', long = "timeout", env = "DRUN_TIMEOUT")]
    timeout: Option<f64>,

    /// Timeout in seconds per case.
    #[arg(long = "case-timeout")]
    case_timeout: Option<f64>,

    /// Base URL override for all cases.
    #[arg(short = 'b', long = "base-url")]
    base_url: Option<String>,

    /// Environment file. `./.env` is used when present.
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,

    /// Global variable, repeatable.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Attach a timing breakdown to every step.
    #[arg(long = "http-stat")]
    http_stat: bool,

    /// Directory to save the run report in.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<PathBuf>,

    /// Report output format.
    #[arg(long = "report-format", value_enum, default_value = "json")]
    report_format: ReportFormat,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig {
            concurrency: self.concurrency.max(1),
            case_timeout: self.case_timeout,
            base_url: self.base_url.clone(),
            tags: self.tags.clone(),
            strict_tags: self.strict_tags,
            http_stat: self.http_stat,
            ..RunConfig::default()
        };
        if self.collect_all {
            config.failure_policy = FailurePolicy::CollectAll;
        }
        if let Some(timeout) = self.timeout {
            config.step_timeout = timeout;
        }
        for raw in &self.vars {
            let (name, value) = parse_assignment(raw)?;
            config.variables.insert(name, value);
        }
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...(truncated)")
    } else {
        text.to_string()
    }
}

fn print_case_result(result: &CaseResult, verbose: bool) {
    let status = if result.passed() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!("{} case: {} ({} ms)", status, result.name, result.duration_ms);

    for (i, step) in result.steps.iter().enumerate() {
        let marker = match step.status {
            StepStatus::Passed => "\x1b[32m✓\x1b[0m",
            StepStatus::Skipped => "\x1b[33m-\x1b[0m",
            StepStatus::Failed | StepStatus::Error => "\x1b[31m✗\x1b[0m",
        };
        info!("  {}. {} {} ({} ms)", i + 1, marker, step.name, step.duration_ms);

        if step.status != StepStatus::Skipped {
            if let Some(error) = &step.error {
                error!("     \x1b[31m{:?}: {}\x1b[0m", error.kind, error.message);
            }
        }
        for assertion in step.assertions.iter().filter(|a| !a.passed) {
            if let Some(message) = &assertion.message {
                error!("     \x1b[31mAssertion: {}\x1b[0m", message);
            }
        }
        if let Some(timing) = &step.timing {
            info!("     {}", timing);
        }

        if verbose {
            if let Some(request) = &step.request {
                debug!("     Request: {} {}", request.method, request.url);
                if let Some(body) = &request.body {
                    debug!("     Request body: {}", truncate(&body.to_string(), 500));
                }
            }
            if let Some(response) = &step.response {
                debug!("     Response: Status {}", response.status_code);
                debug!(
                    "     Response body: {}",
                    truncate(&response.body.to_string(), 500)
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);
    debug!("drun {}", drun::VERSION);

    let config = args.run_config()?;
    let env = load_environment(args.env_file.as_deref())?;

    let paths = if args.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.paths.clone()
    };
    let files = discover(paths.as_slice())?;
    if files.is_empty() {
        return Err(anyhow!("No case files found"));
    }

    let cases = select_cases(load_all(&files)?, config.tags.as_deref(), config.strict_tags)?;
    if cases.is_empty() {
        return Err(anyhow!("No cases matching the tag expression were found"));
    }

    let functions = builtins::registry(&env);
    debug!("Registered functions and hooks: {}", functions.names().join(", "));
    validate_cases(&cases, &functions)?;

    let estimator: Arc<dyn TimingEstimator> = if config.http_stat {
        Arc::new(RatioEstimator::default())
    } else {
        Arc::new(NoTiming)
    };
    let transport = HttpTransport::new()?.with_estimator(estimator);
    let runner = CaseRunner::new(
        Arc::new(transport),
        Arc::new(functions),
        Arc::new(env.clone()),
        config.clone(),
    );

    let started = Instant::now();
    let results = runner.run_cases(&cases, &config.variables).await;
    for result in &results {
        print_case_result(result, args.verbose);
    }

    let report = RunReport::new(results, started.elapsed(), &env);
    let summary = &report.summary;
    info!(
        "Summary ({}):\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Steps: {} passed, {} failed, {} error, {} skipped\n  Duration: {} ms",
        summary.system_name,
        summary.total,
        summary.passed,
        summary.failed,
        summary.steps_passed,
        summary.steps_failed,
        summary.steps_error,
        summary.steps_skipped,
        summary.duration_ms
    );

    if let Some(dir) = &args.report_dir {
        match report.save(dir, args.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {:#}", e),
        }
    }

    if !report.passed() {
        exit(1);
    }

    Ok(())
}
