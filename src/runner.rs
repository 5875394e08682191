//! Case execution.
//!
//! Each case runs its steps strictly in order against a private scope:
//! render, setup hooks, dispatch, teardown hooks, extraction, validation.
//! Every failure is captured on the step result; nothing escapes a case.

use crate::config::{seconds, RunConfig};
use crate::error::{Error, HookError, TransportError};
use crate::functions::{Callable, FunctionRegistry};
use crate::model::{
    Case, CaseResult, Environment, FailurePolicy, HttpMethod, RenderedRequest, Scope, Step,
    StepError, StepResult, StepStatus,
};
use crate::tags::{self, TagExpr};
use crate::template::{self, stringify};
use crate::transport::{self, Exchange, Transport};
use crate::validator;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Runs a single case to completion.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Never fails: every problem is recorded on the returned result.
    async fn run_case(&self, case: &Case, globals: &Scope) -> CaseResult;
}

/// Default runner wiring a transport, the function registry and the hook
/// environment together.
pub struct CaseRunner {
    transport: Arc<dyn Transport>,
    functions: Arc<FunctionRegistry>,
    env: Arc<Environment>,
    config: RunConfig,
}

impl CaseRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        functions: Arc<FunctionRegistry>,
        env: Arc<Environment>,
        config: RunConfig,
    ) -> Self {
        Self {
            transport,
            functions,
            env,
            config,
        }
    }

    /// Run `cases` with up to `concurrency` in flight. Results come back in
    /// input order.
    pub async fn run_cases(&self, cases: &[Case], globals: &Scope) -> Vec<CaseResult> {
        let limit = self.config.concurrency.max(1);
        info!("Running {} case(s), concurrency {}", cases.len(), limit);

        let mut results: Vec<(usize, CaseResult)> = stream::iter(cases.iter().enumerate())
            .map(|(index, case)| async move { (index, self.run_case(case, globals).await) })
            .buffer_unordered(limit)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Globals, then case variables in order, then the parameter row.
    fn seed_scope(&self, case: &Case, globals: &Scope) -> crate::Result<Scope> {
        let mut scope = globals.clone();
        template::render_into(&case.config.variables, &mut scope, &self.functions)?;
        for (name, value) in &case.parameters {
            scope.insert(name.clone(), value.clone());
        }
        Ok(scope)
    }

    fn base_url(&self, case: &Case, scope: &Scope) -> crate::Result<Option<String>> {
        if let Some(base_url) = &self.config.base_url {
            return Ok(Some(base_url.clone()));
        }
        if let Some(base_url) = &case.config.base_url {
            return template::render_to_string(base_url, scope, &self.functions).map(Some);
        }
        Ok(self.env.get("BASE_URL").cloned())
    }

    fn render_request(
        &self,
        case: &Case,
        step: &Step,
        scope: &Scope,
    ) -> crate::Result<RenderedRequest> {
        let functions = self.functions.as_ref();
        let request = &step.request;

        let method: HttpMethod =
            template::render_to_string(&request.method, scope, functions)?.parse()?;
        let path = stringify(&template::render(&request.path, scope, functions)?);
        let url = transport::join_url(self.base_url(case, scope)?.as_deref(), &path)?;

        let mut params = IndexMap::new();
        for (name, value) in &request.params {
            let value = template::render(value, scope, functions)?;
            params.insert(name.clone(), stringify(&value));
        }

        let mut headers: IndexMap<String, String> = IndexMap::new();
        for (name, value) in case.config.headers.iter().chain(&request.headers) {
            let value = stringify(&template::render(value, scope, functions)?);
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value);
        }

        let body = request
            .body
            .as_ref()
            .map(|body| template::render(body, scope, functions))
            .transpose()?;

        Ok(RenderedRequest {
            method,
            url,
            params,
            headers,
            body,
        })
    }

    async fn run_step(
        &self,
        case: &Case,
        step: &Step,
        scope: &mut Scope,
        step_timeout: Duration,
        deadline: Option<Instant>,
    ) -> StepResult {
        let mut result = StepRun::new(step);

        if let Err(err) = template::render_into(&step.variables, scope, &self.functions) {
            return result.error(&err);
        }
        let mut request = match self.render_request(case, step, scope) {
            Ok(request) => request,
            Err(err) => return result.error(&err),
        };

        for name in &step.setup_hooks {
            let Some(hook) = self.functions.setup_hook(name) else {
                result.inner.request = Some(request);
                return result.error(&Error::Configuration(format!(
                    "setup hook '{name}' is not registered"
                )));
            };
            match hook(&mut request, scope, &self.env) {
                Ok(Some(vars)) => result.merge(scope, vars),
                Ok(None) => {}
                Err(err) => {
                    result.inner.request = Some(request);
                    return result.error(&hook_error(name, err));
                }
            }
        }
        result.inner.request = Some(request.clone());

        let limit = match deadline {
            Some(deadline) => step_timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => step_timeout,
        };
        let Exchange { mut response, timing } =
            match tokio::time::timeout(limit, self.transport.dispatch(&request)).await {
                Ok(Ok(exchange)) => exchange,
                Ok(Err(err)) => return result.error(&Error::Transport(err)),
                Err(_) => return result.error(&Error::Transport(TransportError::Timeout(limit))),
            };
        result.inner.timing = timing;

        let mut failure: Option<String> = None;
        for name in &step.teardown_hooks {
            let Some(hook) = self.functions.teardown_hook(name) else {
                result.inner.response = Some(response);
                return result.error(&Error::Configuration(format!(
                    "teardown hook '{name}' is not registered"
                )));
            };
            match hook(&mut response, scope, &self.env) {
                Ok(Some(vars)) => result.merge(scope, vars),
                Ok(None) => {}
                Err(HookError::Assertion(message)) => {
                    debug!("Teardown hook '{}' rejected the response: {}", name, message);
                    failure = Some(message);
                    break;
                }
                Err(HookError::Failed(source)) => {
                    result.inner.response = Some(response);
                    return result.error(&Error::hook(name, source));
                }
            }
        }

        if failure.is_none() {
            for (var, check) in &step.extract {
                match validator::resolve(check, &response, scope, &self.functions) {
                    Ok(value) => {
                        let mut vars = Scope::new();
                        vars.insert(var.clone(), value);
                        result.merge(scope, vars);
                    }
                    Err(message) => {
                        failure.get_or_insert_with(|| format!("cannot extract '{var}': {message}"));
                    }
                }
            }
        }

        let assertions: Vec<_> = step
            .validate
            .iter()
            .map(|v| validator::evaluate(v, &response, scope, &self.functions))
            .collect();
        let failed = assertions.iter().filter(|a| !a.passed).count();
        if failed > 0 && failure.is_none() {
            failure = Some(format!("{failed} of {} assertion(s) failed", assertions.len()));
        }
        result.inner.assertions = assertions;
        result.inner.response = Some(response);

        match failure {
            Some(message) => result.failed(message),
            None => result.finish(),
        }
    }
}

#[async_trait]
impl TestRunner for CaseRunner {
    #[instrument(skip(self, case, globals), fields(case = %case.name))]
    async fn run_case(&self, case: &Case, globals: &Scope) -> CaseResult {
        let started = Instant::now();
        let deadline = self
            .config
            .case_timeout()
            .and_then(|limit| started.checked_add(limit));
        let policy = case
            .config
            .failure_policy
            .unwrap_or(self.config.failure_policy);
        let step_timeout = case
            .config
            .timeout
            .and_then(seconds)
            .unwrap_or_else(|| self.config.step_timeout());

        info!("Starting case: {}", case.name);
        let mut steps = Vec::with_capacity(case.steps.len());

        match self.seed_scope(case, globals) {
            Ok(mut scope) => {
                let mut halted = false;
                for (index, step) in case.steps.iter().enumerate() {
                    if halted {
                        steps.push(StepResult::skipped(&step.name, "an earlier step did not pass"));
                        continue;
                    }
                    debug!("Running step {}/{}: {}", index + 1, case.steps.len(), step.name);
                    let result = self
                        .run_step(case, step, &mut scope, step_timeout, deadline)
                        .await;
                    if !result.passed() {
                        warn!(
                            "Step '{}' {:?}: {}",
                            step.name,
                            result.status,
                            result.error.as_ref().map_or("", |e| e.message.as_str())
                        );
                        halted = policy == FailurePolicy::FailFast;
                    }
                    steps.push(result);
                }
            }
            Err(err) => {
                warn!("Case variables failed to render: {}", err);
                for (index, step) in case.steps.iter().enumerate() {
                    if index == 0 {
                        steps.push(StepRun::new(step).error(&err));
                    } else {
                        steps.push(StepResult::skipped(&step.name, "case variables failed to render"));
                    }
                }
            }
        }

        let result = CaseResult::from_steps(case, steps, started.elapsed().as_millis() as u64);
        info!(
            "Case finished: {} ({} ms) - {:?}",
            case.name, result.duration_ms, result.status
        );
        result
    }
}

/// Step result under construction.
struct StepRun {
    inner: StepResult,
    started: Instant,
}

impl StepRun {
    fn new(step: &Step) -> Self {
        Self {
            inner: StepResult {
                name: step.name.clone(),
                status: StepStatus::Passed,
                request: None,
                response: None,
                timing: None,
                extracted: Scope::new(),
                assertions: Vec::new(),
                error: None,
                duration_ms: 0,
            },
            started: Instant::now(),
        }
    }

    fn merge(&mut self, scope: &mut Scope, vars: Scope) {
        for (name, value) in vars {
            scope.insert(name.clone(), value.clone());
            self.inner.extracted.insert(name, value);
        }
    }

    fn error(mut self, err: &Error) -> StepResult {
        self.inner.status = StepStatus::Error;
        self.inner.error = Some(StepError::from(err));
        self.finish()
    }

    fn failed(mut self, message: String) -> StepResult {
        self.inner.status = StepStatus::Failed;
        self.inner.error = Some(StepError::from(&Error::Assertion(message)));
        self.finish()
    }

    fn finish(mut self) -> StepResult {
        self.inner.duration_ms = self.started.elapsed().as_millis() as u64;
        self.inner
    }
}

fn hook_error(name: &str, err: HookError) -> Error {
    match err {
        HookError::Assertion(message) => Error::hook(name, anyhow::anyhow!(message)),
        HookError::Failed(source) => Error::hook(name, source),
    }
}

/// Reject cases that cannot run: no steps, unnamed steps, and hooks that
/// are unknown or registered for the other phase.
pub fn validate_cases(cases: &[Case], functions: &FunctionRegistry) -> crate::Result<()> {
    for case in cases {
        if case.steps.is_empty() {
            return Err(Error::Configuration(format!(
                "case '{}' has no steps",
                case.name
            )));
        }
        for (index, step) in case.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "step {} of case '{}' has no name",
                    index + 1,
                    case.name
                )));
            }
            let hooks = step
                .setup_hooks
                .iter()
                .map(|name| (name, "setup hook"))
                .chain(step.teardown_hooks.iter().map(|name| (name, "teardown hook")));
            for (name, phase) in hooks {
                let kind = functions.get(name).map(Callable::kind);
                if kind != Some(phase) {
                    let found = match kind {
                        Some(kind) => format!("is a {kind}"),
                        None => "is not registered".to_string(),
                    };
                    return Err(Error::Configuration(format!(
                        "{phase} '{name}' in step '{}' of case '{}' {found}",
                        step.name, case.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Keep the cases whose tags satisfy `expression`.
///
/// With `strict`, a malformed expression is a configuration error instead
/// of selecting nothing.
pub fn select_cases(
    cases: Vec<Case>,
    expression: Option<&str>,
    strict: bool,
) -> crate::Result<Vec<Case>> {
    if strict {
        if let Some(expression) = expression {
            TagExpr::parse(expression).map_err(|e| {
                Error::Configuration(format!("invalid tag expression '{expression}': {e}"))
            })?;
        }
    }
    let total = cases.len();
    let selected: Vec<Case> = cases
        .into_iter()
        .filter(|case| tags::matches(case.tags(), expression))
        .collect();
    if selected.len() != total {
        info!("Selected {} of {} case(s) by tags", selected.len(), total);
    }
    Ok(selected)
}
