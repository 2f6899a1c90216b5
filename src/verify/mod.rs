//! Image verification harness.
//!
//! Verifies a built image by starting fresh, throwaway instances of it:
//!
//! 1. **Init check**: the entrypoint with `--init-only` must exit 0.
//! 2. **Base tools**: every required tool must be on `PATH`.
//! 3. **Soft checks**: package manager profile and config files, reported
//!    only, since config is often mounted at run time.
//! 4. **Full variant**: cluster and infrastructure CLIs plus language tooling,
//!    only for the `full` image.
//!
//! Required checks are fail-fast: the first missing required tool ends the
//! probe inside the instance and the harness launches nothing further.

pub mod checks;
pub mod runtime;

use std::fmt;

use tracing::debug;

use crate::error::Result;
use checks::{parse_markers, CheckStatus, Probe, ToolCheckResult};
use runtime::{ContainerRuntime, Launch};

/// Image variant being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Base,
    Full,
}

impl Variant {
    /// `--full`, or an image whose name or tag mentions `full`.
    pub fn detect(image: &str, full_flag: bool) -> Self {
        let last_segment = image.rsplit('/').next().unwrap_or(image);
        if full_flag || last_segment.contains("full") {
            Variant::Full
        } else {
            Variant::Base
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Base => f.write_str("base"),
            Variant::Full => f.write_str("full"),
        }
    }
}

/// Result of one step (one fresh instance).
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub passed: bool,
    pub results: Vec<ToolCheckResult>,
    /// Captured stderr or other context when the step failed.
    pub diagnostic: Option<String>,
}

/// Result of a whole verification pass.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub image: String,
    pub variant: Variant,
    pub steps: Vec<StepReport>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Every check result across all steps, in order.
    pub fn results(&self) -> impl Iterator<Item = &ToolCheckResult> {
        self.steps.iter().flat_map(|s| s.results.iter())
    }

    /// Soft checks that came back missing.
    pub fn warnings(&self) -> Vec<&ToolCheckResult> {
        self.results()
            .filter(|r| r.status == CheckStatus::Missing && !r.check.is_required())
            .collect()
    }
}

/// Runs verification steps against images through a container runtime.
pub struct Harness<'a, R: ContainerRuntime> {
    runtime: &'a R,
    home: String,
}

impl<'a, R: ContainerRuntime> Harness<'a, R> {
    pub fn new(runtime: &'a R, home: impl Into<String>) -> Self {
        Self {
            runtime,
            home: home.into(),
        }
    }

    /// Verify `image` as `variant`. Prints progress and diagnostics as it goes.
    ///
    /// Returns `Err` only when the runtime itself can't be started; failed
    /// checks are part of the report.
    pub fn verify(&self, image: &str, variant: Variant) -> Result<VerifyReport> {
        println!("=== Verifying {} ({} variant) ===\n", image, variant);

        let mut report = VerifyReport {
            image: image.to_string(),
            variant,
            steps: Vec::new(),
        };

        let init = self.init_check(image)?;
        let init_ok = init.passed;
        report.steps.push(init);
        if !init_ok {
            print_summary(&report);
            return Ok(report);
        }

        let mut probes = vec![Probe::base(&self.home)];
        if variant == Variant::Full {
            probes.push(Probe::full(&self.home));
        }

        for probe in probes {
            let step = self.run_probe(image, &probe)?;
            let ok = step.passed;
            report.steps.push(step);
            if !ok {
                break;
            }
        }

        print_summary(&report);
        Ok(report)
    }

    fn init_check(&self, image: &str) -> Result<StepReport> {
        println!("Init check...");
        let output = self.runtime.run(image, &Launch::InitOnly)?;

        if output.success() {
            println!("[OK] entrypoint --init-only\n");
            return Ok(StepReport {
                name: "init".into(),
                passed: true,
                results: Vec::new(),
                diagnostic: None,
            });
        }

        let diagnostic = non_empty(&output.stderr)
            .unwrap_or_else(|| format!("exited with {:?} and no output", output.code));
        println!("[FAIL] entrypoint --init-only (exit {:?})", output.code);
        eprintln!("{}", diagnostic);
        Ok(StepReport {
            name: "init".into(),
            passed: false,
            results: Vec::new(),
            diagnostic: Some(diagnostic),
        })
    }

    fn run_probe(&self, image: &str, probe: &Probe) -> Result<StepReport> {
        println!("Checking {}...", probe.name);
        let output = self.runtime.run(image, &Launch::Probe(probe.script()))?;
        debug!(probe = probe.name, code = ?output.code, "probe finished");

        let markers = parse_markers(&output.stdout);
        let stderr = non_empty(&output.stderr);
        let mut step = StepReport {
            name: probe.name.to_string(),
            passed: true,
            results: Vec::new(),
            diagnostic: None,
        };

        for (index, check) in probe.checks.iter().enumerate() {
            let Some(&status) = markers.get(&index) else {
                break;
            };
            let result = ToolCheckResult {
                check: check.clone(),
                status,
                diagnostic: match status {
                    CheckStatus::Present => None,
                    CheckStatus::Missing => stderr_line_for(&output.stderr, &check.target),
                },
            };
            print_result(&result);
            let failed = result.is_failure();
            step.results.push(result);
            if failed {
                step.passed = false;
                step.diagnostic = stderr.clone();
                break;
            }
        }

        // the probe died before reporting every check
        if step.passed && (step.results.len() < probe.checks.len() || !output.success()) {
            step.passed = false;
            let diagnostic = stderr.unwrap_or_else(|| {
                format!(
                    "probe exited with {:?} after {} of {} checks",
                    output.code,
                    step.results.len(),
                    probe.checks.len()
                )
            });
            println!("[FAIL] {} did not complete", probe.name);
            eprintln!("{}", diagnostic);
            step.diagnostic = Some(diagnostic);
        }

        println!();
        Ok(step)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// The probe writes `<target>: <reason>` to stderr for each miss.
fn stderr_line_for(stderr: &str, target: &str) -> Option<String> {
    let prefix = format!("{}:", target);
    stderr
        .lines()
        .find(|l| l.starts_with(&prefix))
        .map(str::to_string)
}

fn print_result(result: &ToolCheckResult) {
    match (result.status, result.check.is_required()) {
        (CheckStatus::Present, _) => println!("[OK] {}", result.check),
        (CheckStatus::Missing, true) => {
            println!("[FAIL] {}: missing", result.check);
            if let Some(diag) = &result.diagnostic {
                eprintln!("     {}", diag);
            }
        }
        (CheckStatus::Missing, false) => println!("[WARN] {}: missing (not required)", result.check),
    }
}

fn print_summary(report: &VerifyReport) {
    let checked = report.results().count();
    let warnings = report.warnings().len();
    if report.passed() {
        println!(
            "Verification passed: {} checks, {} warnings",
            checked, warnings
        );
    } else {
        println!("Verification FAILED for {}", report.image);
    }
}
