//! drun: data-driven API testing.
//!
//! Cases are YAML documents describing a sequence of HTTP steps. Values
//! in a case may reference variables (`$user_id`) and call registered
//! functions (`${sign($app_key, ${ts()})}`); steps pass data forward
//! through extraction and lifecycle hooks, and every step ends in a
//! structured [`StepResult`].
//!
//! ```no_run
//! use drun::{builtins, CaseRunner, HttpTransport, RunConfig, Scope};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let env = drun::load_environment(None)?;
//! let cases = drun::load_all(&drun::discover(&["testcases"])?)?;
//! let functions = builtins::registry(&env);
//! drun::validate_cases(&cases, &functions)?;
//!
//! let runner = CaseRunner::new(
//!     Arc::new(HttpTransport::new()?),
//!     Arc::new(functions),
//!     Arc::new(env),
//!     RunConfig::default(),
//! );
//! let results = runner.run_cases(&cases, &Scope::new()).await;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod builtins;
pub mod config;
pub mod discovery;
pub mod error;
pub mod functions;
pub mod loader;
pub mod model;
pub mod report;
pub mod runner;
pub mod stream;
pub mod tags;
pub mod template;
pub mod timing;
pub mod transport;
pub mod validator;

pub use config::{load_environment, system_name, RunConfig};
pub use discovery::discover;
pub use error::{Error, HookError, Result, TransportError};
pub use functions::{Arity, Callable, FunctionRegistry, FunctionRegistryBuilder};
pub use loader::{load_all, load_cases};
pub use model::*;
pub use report::{ReportFormat, RunReport, RunSummary};
pub use runner::{select_cases, validate_cases, CaseRunner, TestRunner};
pub use template::render;
pub use timing::{ElapsedOnly, HttpStat, NoTiming, RatioEstimator, TimingEstimator};
pub use transport::{Exchange, HttpTransport, Transport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
