//! Input discovery
//!
//! Expands the command-line inputs into the list of files to ingest.
//! Directories are searched recursively; files named explicitly are always
//! kept, directory contents are filtered by extension. Exclude patterns
//! apply to both.

use crate::error::ConfigError;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Filters applied while discovering input files
#[derive(Debug, Clone, Default)]
pub struct InputFilter {
    /// Accepted extensions (lowercase, no dot)
    pub extensions: Vec<String>,

    /// Paths matching any of these are skipped
    pub exclude: Vec<Regex>,
}

impl InputFilter {
    pub fn new(extensions: Vec<String>, exclude: Vec<Regex>) -> Self {
        Self {
            extensions,
            exclude,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.exclude.iter().any(|re| re.is_match(&text))
    }

    fn has_extension(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) => self.extensions.iter().any(|e| *e == ext),
            None => false,
        }
    }
}

/// Resolve inputs to a sorted, de-duplicated list of absolute file paths
pub fn discover_inputs(inputs: &[PathBuf], filter: &InputFilter) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = BTreeSet::new();

    for input in inputs {
        let meta = fs::metadata(input).map_err(|_| ConfigError::MissingInput(input.clone()))?;

        if meta.is_file() {
            if !filter.is_excluded(input) {
                files.insert(absolute(input));
            }
            continue;
        }

        for entry in WalkDir::new(input).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path during discovery");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if filter.has_extension(path) && !filter.is_excluded(path) {
                files.insert(absolute(path));
            }
        }
    }

    if files.is_empty() {
        return Err(ConfigError::NoInputs);
    }

    debug!(count = files.len(), "Input files discovered");
    Ok(files.into_iter().collect())
}

/// Canonical path when available, so ledger keys are stable across runs
fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn filter() -> InputFilter {
        InputFilter::new(vec!["csv".into(), "parquet".into()], Vec::new())
    }

    #[test]
    fn test_recursive_discovery_sorted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("z.csv"), "").unwrap();
        fs::write(nested.join("a.CSV"), "").unwrap();
        fs::write(dir.path().join("b").join("x.parquet"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();

        let files = discover_inputs(&[dir.path().to_path_buf()], &filter()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(files.len(), 3);
        assert!(names.contains(&"a.CSV".to_string()));
        assert!(!names.contains(&"README.md".to_string()));
        assert!(files.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_explicit_file_kept_and_deduplicated() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("catalog.dat");
        fs::write(&file, "").unwrap();

        let files = discover_inputs(&[file.clone(), file.clone()], &filter()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.csv"), "").unwrap();
        fs::write(dir.path().join("skip.tmp.csv"), "").unwrap();

        let filter = InputFilter::new(
            vec!["csv".into()],
            vec![Regex::new(r"\.tmp\.csv$").unwrap()],
        );
        let files = discover_inputs(&[dir.path().to_path_buf()], &filter).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.csv"));
    }

    #[test]
    fn test_empty_and_missing() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            discover_inputs(&[dir.path().to_path_buf()], &filter()),
            Err(ConfigError::NoInputs)
        ));
        assert!(matches!(
            discover_inputs(&[dir.path().join("missing")], &filter()),
            Err(ConfigError::MissingInput(_))
        ));
    }
}
