//! Host prerequisite checks.
//!
//! Run by `devbox preflight` before verifying images or installing tools, so
//! a missing runtime or an offline host shows up as one readable report
//! instead of a failure halfway through.
//!
//! # Checks Performed
//!
//! - **Host tools**: container runtime, curl, tar, unzip, ssh-keygen
//! - **Network**: the public key endpoint is reachable
//!
//! # Usage
//!
//! ```rust,ignore
//! use devbox::preflight::PreflightChecker;
//!
//! let report = PreflightChecker::new("docker", keys_url).run_all().await;
//! report.print_summary();
//! if !report.is_ok() {
//!     std::process::exit(1);
//! }
//! ```

mod host_tools;
mod network;

pub use host_tools::check_host_tools;
pub use network::check_network;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Collected preflight results.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Get all failing checks.
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let status = if check.passed { "[OK]" } else { "[FAIL]" };
            println!("{} {}: {}", status, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        if self.is_ok() {
            println!("All preflight checks passed ({}/{})", self.passed_count(), self.total_count());
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// Runs every host check.
pub struct PreflightChecker {
    runtime: String,
    keys_url: String,
}

impl PreflightChecker {
    pub fn new(runtime: impl Into<String>, keys_url: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            keys_url: keys_url.into(),
        }
    }

    pub async fn run_all(&self) -> PreflightReport {
        let mut report = PreflightReport::default();
        report.checks.extend(check_host_tools(&self.runtime));
        report.checks.push(check_network(&self.keys_url).await);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_pass() {
        let result = CheckResult::pass("test", "passed");
        assert!(result.passed);
        assert!(result.suggestion.is_none());
    }

    #[test]
    fn test_check_result_fail() {
        let result = CheckResult::fail("test", "failed", "fix it");
        assert!(!result.passed);
        assert!(result.suggestion.is_some());
    }

    #[test]
    fn test_preflight_report_is_ok() {
        let mut report = PreflightReport::default();
        assert!(report.is_ok());

        report.checks.push(CheckResult::pass("test1", "ok"));
        assert!(report.is_ok());

        report.checks.push(CheckResult::fail("test2", "bad", "fix"));
        assert!(!report.is_ok());
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.passed_count(), 1);
    }

    #[tokio::test]
    async fn test_run_all_reports_missing_runtime() {
        let checker = PreflightChecker::new("definitely_not_a_runtime_12345", "http://127.0.0.1:9/x.keys");
        let report = checker.run_all().await;
        assert!(!report.is_ok());
        assert!(report
            .errors()
            .iter()
            .any(|c| c.name == "definitely_not_a_runtime_12345 tool"));
    }
}
