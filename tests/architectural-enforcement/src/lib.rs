//! Architectural Enforcement Integration Tests
//!
//! This package contains tests that enforce architectural principles of the
//! relay's production sources:
//! - No blocking sleeps anywhere in production code
//! - No blocking I/O or blocking locks inside async functions
//! - No `unwrap()`/`expect()` outside test modules
//! - No `std::sync::Mutex` (async code uses `parking_lot` or tokio primitives)
//!
//! These tests are designed to catch violations early in the development cycle.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A rule violation at a source location
#[derive(Debug)]
pub struct Violation {
    pub file: PathBuf,
    pub line: usize,
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.text.trim())
    }
}

/// Production source root of the relay core crate
pub fn relay_core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("relay")
        .join("core")
        .join("src")
}

/// Every `.rs` file under `root`
pub fn rust_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "rs"))
        .collect()
}

/// Lines of a file up to its `#[cfg(test)]` module, with comments blanked
pub fn production_lines(source: &str) -> Vec<(usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(i, line)| {
            let code = match line.find("//") {
                Some(idx) => &line[..idx],
                None => line,
            };
            (i + 1, code)
        })
        .collect()
}

/// Lines matching any of `patterns` in production code
pub fn find_pattern(root: &Path, patterns: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in rust_files(root) {
        let Ok(source) = fs::read_to_string(&file) else {
            continue;
        };
        for (line, code) in production_lines(&source) {
            if patterns.iter().any(|p| code.contains(p)) {
                violations.push(Violation {
                    file: file.clone(),
                    line,
                    text: code.to_string(),
                });
            }
        }
    }
    violations
}

/// Lines matching any of `patterns` inside the body of an `async fn`
///
/// Bodies are tracked by brace depth, so string literals containing braces
/// can confuse it; production code here does not rely on that.
pub fn find_in_async_bodies(root: &Path, patterns: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in rust_files(root) {
        let Ok(source) = fs::read_to_string(&file) else {
            continue;
        };

        let mut depth: i64 = 0;
        let mut async_start: Option<i64> = None;
        let mut pending_async = false;
        for (line, code) in production_lines(&source) {
            if code.contains("async fn ") {
                pending_async = true;
            }
            for ch in code.chars() {
                match ch {
                    '{' => {
                        if pending_async && async_start.is_none() {
                            async_start = Some(depth);
                            pending_async = false;
                        }
                        depth += 1;
                    }
                    '}' => {
                        depth -= 1;
                        if async_start == Some(depth) {
                            async_start = None;
                        }
                    }
                    ';' if pending_async && async_start.is_none() => {
                        // Trait method declaration without a body
                        pending_async = false;
                    }
                    _ => {}
                }
            }
            if async_start.is_some() && patterns.iter().any(|p| code.contains(p)) {
                violations.push(Violation {
                    file: file.clone(),
                    line,
                    text: code.to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_clean(violations: &[Violation], rule: &str) {
        assert!(
            violations.is_empty(),
            "{rule}:\n{}",
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    #[test]
    fn sources_are_found() {
        let files = rust_files(&relay_core_src());
        assert!(
            files.iter().any(|f| f.ends_with("lib.rs")),
            "relay core sources not found under {}",
            relay_core_src().display()
        );
    }

    #[test]
    fn no_blocking_sleep_in_production_code() {
        let violations = find_pattern(&relay_core_src(), &["thread::sleep("]);
        assert_clean(&violations, "blocking sleep in production code");
    }

    #[test]
    fn no_blocking_calls_in_async_functions() {
        let violations = find_in_async_bodies(
            &relay_core_src(),
            &["std::fs::", "blocking_lock(", "blocking_read(", "blocking_write(", "block_on("],
        );
        assert_clean(&violations, "blocking call inside async fn");
    }

    #[test]
    fn no_unwrap_outside_tests() {
        let violations = find_pattern(&relay_core_src(), &[".unwrap()", ".expect("]);
        assert_clean(&violations, "unwrap/expect in production code");
    }

    #[test]
    fn no_std_mutex() {
        let violations = find_pattern(&relay_core_src(), &["std::sync::Mutex", "std::sync::RwLock"]);
        assert_clean(&violations, "std::sync lock in production code");
    }

    #[test]
    fn async_body_tracking() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("sample.rs"),
            "fn sync_read() {\n    std::fs::read(\"a\");\n}\n\nasync fn bad() {\n    if true {\n        std::fs::read(\"b\");\n    }\n}\n",
        )
        .unwrap();

        let violations = find_in_async_bodies(dir.path(), &["std::fs::"]);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 7);
    }
}
