//! YAML case files.
//!
//! A file holds one `config` block and a list of `steps`. Parameter rows
//! under `config.parameters` expand into one case each; the rows are
//! either inline or read from a CSV file (`parameters: { csv: data/users.csv }`).

use crate::model::{Case, CaseConfig, Parameters, Scope, Step};
use crate::template::stringify;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Files marking the project root that CSV parameter paths are relative to.
pub const PROJECT_MARKERS: &[&str] = &["drun_hooks.rs", ".env"];

#[derive(Debug, Deserialize)]
struct CaseFile {
    #[serde(default)]
    config: CaseConfig,
    #[serde(default)]
    steps: Vec<Step>,
}

/// Load every case declared in `path`.
pub fn load_cases<P: AsRef<Path>>(path: P) -> Result<Vec<Case>> {
    let path = path.as_ref();
    debug!("Loading cases from {}", path.display());

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read case file: {}", path.display()))?;
    let fallback = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    let mut cases = build_cases(&content, fallback, Some(path))
        .with_context(|| format!("Failed to load cases from {}", path.display()))?;
    for case in &mut cases {
        case.source = Some(path.to_path_buf());
    }
    Ok(cases)
}

/// Load cases from several files, keeping file order.
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<Case>> {
    let mut cases = Vec::new();
    for path in paths {
        cases.extend(load_cases(path)?);
    }
    info!("Loaded {} case(s) from {} file(s)", cases.len(), paths.len());
    Ok(cases)
}

/// Parse a case document. `fallback_name` names the case when the config
/// does not.
pub fn parse_cases(content: &str, fallback_name: &str) -> Result<Vec<Case>> {
    build_cases(content, fallback_name, None)
}

fn build_cases(content: &str, fallback_name: &str, origin: Option<&Path>) -> Result<Vec<Case>> {
    let file: CaseFile = serde_yaml::from_str(content).context("Failed to parse YAML")?;
    let CaseFile { mut config, steps } = file;

    if config.name.trim().is_empty() {
        config.name = fallback_name.to_string();
    }
    if config.name.trim().is_empty() {
        bail!("case has no name");
    }
    if steps.is_empty() {
        bail!("case '{}' declares no steps", config.name);
    }
    if let Some(index) = steps.iter().position(|s| s.name.trim().is_empty()) {
        bail!("step {} of case '{}' has no name", index + 1, config.name);
    }

    let rows = match std::mem::take(&mut config.parameters) {
        Parameters::Rows(rows) => rows,
        Parameters::Csv { csv } => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            read_csv_rows(&resolve_csv_path(&csv, origin, &cwd))?
        }
    };
    if rows.is_empty() {
        return Ok(vec![Case {
            name: config.name.clone(),
            config,
            steps,
            parameters: Scope::new(),
            source: None,
        }]);
    }

    Ok(rows
        .into_iter()
        .map(|row| Case {
            name: parameterized_name(&config.name, &row),
            config: config.clone(),
            steps: steps.clone(),
            parameters: row,
            source: None,
        })
        .collect())
}

/// Resolve a CSV parameter path. Relative paths are taken from the nearest
/// ancestor of the case file holding one of [`PROJECT_MARKERS`], else from
/// `cwd`. `..` segments are kept, so paths may point outside the project.
pub fn resolve_csv_path(raw: &str, case_file: Option<&Path>, cwd: &Path) -> PathBuf {
    let raw = Path::new(raw.trim());
    if raw.is_absolute() {
        return normalize(raw);
    }
    let root = case_file.and_then(project_root).unwrap_or(cwd);
    normalize(&root.join(raw))
}

fn project_root(case_file: &Path) -> Option<&Path> {
    case_file
        .parent()?
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().any(|marker| dir.join(marker).is_file()))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Rows of a CSV file keyed by its header line. Cells stay strings.
fn read_csv_rows(path: &Path) -> Result<Vec<Scope>> {
    debug!("Reading parameters from {}", path.display());
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open parameter file: {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.with_context(|| format!("Malformed row in {}", path.display()))?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
                .collect(),
        );
    }
    if rows.is_empty() {
        bail!("parameter file {} has no rows", path.display());
    }
    Ok(rows)
}

fn parameterized_name(name: &str, row: &Scope) -> String {
    let pairs: Vec<String> = row
        .iter()
        .map(|(key, value)| format!("{key}={}", stringify(value)))
        .collect();
    format!("{name} [{}]", pairs.join(", "))
}
