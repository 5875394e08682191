//! Locate case files on disk.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const CASE_DIRS: [&str; 2] = ["testcases", "testsuites"];
const CASE_PREFIXES: [&str; 2] = ["test_", "suite_"];

/// Collect case files under `paths`, sorted and de-duplicated.
///
/// Directories are walked recursively. An explicit file is kept only when
/// it follows the naming convention, same as a walked one.
pub fn discover<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            if is_case_file(path) {
                found.insert(path.to_path_buf());
            } else {
                debug!("Ignoring {}: not a case file", path.display());
            }
            continue;
        }
        if !path.is_dir() {
            bail!("Path does not exist: {}", path.display());
        }

        for entry in WalkDir::new(path).follow_links(true) {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", path.display()))?;
            if entry.file_type().is_file() && is_case_file(entry.path()) {
                found.insert(entry.into_path());
            }
        }
    }

    info!("Discovered {} case file(s)", found.len());
    Ok(found.into_iter().collect())
}

/// `true` for `.yaml`/`.yml` files inside a `testcases`/`testsuites`
/// directory (any case) or named `test_*`/`suite_*`.
pub fn is_case_file(path: &Path) -> bool {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    if !is_yaml {
        return false;
    }

    let in_case_dir = path
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|c| c.as_os_str().to_str())
        .any(|c| CASE_DIRS.iter().any(|dir| c.eq_ignore_ascii_case(dir)));

    let has_prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| CASE_PREFIXES.iter().any(|p| name.starts_with(p)));

    in_case_dir || has_prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "steps: []\n").unwrap();
        path
    }

    #[test]
    fn test_is_case_file() {
        assert!(is_case_file(Path::new("project/testcases/login.yaml")));
        assert!(is_case_file(Path::new("project/testsuites/nested/all.yml")));
        assert!(is_case_file(Path::new("anywhere/test_login.yaml")));
        assert!(is_case_file(Path::new("suite_users.yml")));
        assert!(is_case_file(Path::new("proj/TestCases/login.yaml")));
        assert!(is_case_file(Path::new("proj/TESTSUITES/all.YML")));
        assert!(!is_case_file(Path::new("project/testcases/readme.md")));
        assert!(!is_case_file(Path::new("project/config/settings.yaml")));
        assert!(!is_case_file(Path::new("project/my_test_login.yaml")));
    }

    #[test]
    fn test_discover_walks_and_sorts() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let b = touch(root, "testcases/b.yaml");
        let a = touch(root, "testcases/deep/a.yml");
        let prefixed = touch(root, "misc/test_c.yaml");
        touch(root, "misc/other.yaml");
        touch(root, "testcases/notes.txt");

        let found = discover(&[root]).unwrap();
        let mut expected = vec![a, b, prefixed];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_discover_deduplicates_overlapping_paths() {
        let dir = tempdir().unwrap();
        let file = touch(dir.path(), "testcases/one.yaml");
        let found = discover(&[dir.path().to_path_buf(), file.clone()]).unwrap();
        assert_eq!(found, vec![file]);
    }

    #[test]
    fn test_discover_explicit_non_case_file_is_ignored() {
        let dir = tempdir().unwrap();
        let file = touch(dir.path(), "settings.yaml");
        assert!(discover(&[file]).unwrap().is_empty());
    }

    #[test]
    fn test_discover_missing_path_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(discover(&[missing]).is_err());
    }
}
