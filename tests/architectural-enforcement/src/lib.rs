//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleeping in production code (wait on timers, channels or I/O instead)
//! - No blocking `std::sync::Mutex` in async code paths
//!
//! Test code is exempt: scanning of a file stops at its first `#[cfg(test)]`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["conductor/core/src", "conductor/host/src"];

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// The workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every `.rs` file under the production roots
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Lines of `content` that precede its test module, with comments stripped
pub fn production_lines(content: &str) -> impl Iterator<Item = (usize, &str, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (idx + 1, line, code)
        })
}

/// Scan production code for lines whose code part satisfies `is_violation`
pub fn scan<F>(is_violation: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    let mut violations = Vec::new();
    for path in production_sources() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, raw, code) in production_lines(&content) {
            if is_violation(code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: raw.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// sleep(1)\n#[cfg(test)]\nmod tests { fn b() { sleep(1) } }\n";
        let lines: Vec<_> = production_lines(source).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].2, "");
    }

    #[test]
    fn test_sources_are_found() {
        assert!(production_sources()
            .iter()
            .any(|p| p.ends_with("conductor/core/src/dispatcher.rs")));
    }
}
