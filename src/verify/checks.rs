//! Check definitions and the probe script that runs them inside an image.
//!
//! A probe is a list of checks rendered into one `/bin/sh` script. Every
//! check prints a marker line:
//!
//! ```text
//! __DEVBOX_CHECK__ <index> present
//! __DEVBOX_CHECK__ <index> missing
//! ```
//!
//! A missing required check makes the script exit 1 right after its marker,
//! so nothing after the first required failure is attempted.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::{
    BASE_CONFIG_FILES, BASE_REQUIRED_TOOLS, FULL_LANGUAGE_CONFIG, FULL_LANGUAGE_SERVER,
    FULL_REQUIRED_TOOLS, FULL_SOFT_TOOLS, PACKAGE_MANAGER_PROFILE,
};

pub const MARKER: &str = "__DEVBOX_CHECK__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Executable on `PATH`.
    Tool,
    /// Path exists.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Absence fails the run.
    Required,
    /// Absence is reported only.
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub kind: CheckKind,
    pub target: String,
    pub severity: Severity,
}

impl Check {
    pub fn required_tool(name: &str) -> Self {
        Self::new(CheckKind::Tool, name, Severity::Required)
    }

    pub fn soft_tool(name: &str) -> Self {
        Self::new(CheckKind::Tool, name, Severity::Soft)
    }

    pub fn soft_file(path: impl Into<String>) -> Self {
        Self::new(CheckKind::File, path, Severity::Soft)
    }

    fn new(kind: CheckKind, target: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind,
            target: target.into(),
            severity,
        }
    }

    pub fn is_required(&self) -> bool {
        self.severity == Severity::Required
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CheckKind::Tool => write!(f, "tool {}", self.target),
            CheckKind::File => write!(f, "file {}", self.target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Present,
    Missing,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheckResult {
    pub check: Check,
    pub status: CheckStatus,
    pub diagnostic: Option<String>,
}

impl ToolCheckResult {
    /// A required check that came back missing.
    pub fn is_failure(&self) -> bool {
        self.status == CheckStatus::Missing && self.check.is_required()
    }
}

/// An ordered set of checks run in one fresh instance.
#[derive(Debug, Clone)]
pub struct Probe {
    pub name: &'static str,
    pub checks: Vec<Check>,
}

impl Probe {
    /// Base toolchain plus the informative package manager and config checks.
    pub fn base(home: &str) -> Self {
        let mut checks: Vec<Check> = BASE_REQUIRED_TOOLS
            .iter()
            .map(|t| Check::required_tool(t))
            .collect();
        checks.push(Check::soft_file(PACKAGE_MANAGER_PROFILE));
        checks.extend(
            BASE_CONFIG_FILES
                .iter()
                .map(|f| Check::soft_file(home_path(home, f))),
        );
        Self {
            name: "base tools",
            checks,
        }
    }

    /// Cluster, infrastructure and language tooling of the full image.
    pub fn full(home: &str) -> Self {
        let mut checks: Vec<Check> = FULL_REQUIRED_TOOLS
            .iter()
            .map(|t| Check::required_tool(t))
            .collect();
        checks.extend(FULL_SOFT_TOOLS.iter().map(|t| Check::soft_tool(t)));
        checks.push(Check::required_tool(FULL_LANGUAGE_SERVER));
        checks.push(Check::soft_file(home_path(home, FULL_LANGUAGE_CONFIG)));
        Self {
            name: "full-variant tools",
            checks,
        }
    }

    /// Render the `/bin/sh` script for this probe.
    pub fn script(&self) -> String {
        let mut script = String::from(
            "check_tool() {\n\
             \x20   if command -v \"$2\" >/dev/null 2>&1; then echo \"__DEVBOX_CHECK__ $1 present\"; \
             else echo \"__DEVBOX_CHECK__ $1 missing\"; echo \"$2: not found on PATH\" >&2; return 1; fi\n\
             }\n\
             check_file() {\n\
             \x20   if [ -e \"$2\" ]; then echo \"__DEVBOX_CHECK__ $1 present\"; \
             else echo \"__DEVBOX_CHECK__ $1 missing\"; echo \"$2: no such file\" >&2; return 1; fi\n\
             }\n",
        );

        for (index, check) in self.checks.iter().enumerate() {
            let func = match check.kind {
                CheckKind::Tool => "check_tool",
                CheckKind::File => "check_file",
            };
            let on_missing = match check.severity {
                Severity::Required => "exit 1",
                Severity::Soft => "true",
            };
            script.push_str(&format!(
                "{} {} {} || {}\n",
                func,
                index,
                shell_quote(&check.target),
                on_missing
            ));
        }
        script.push_str("exit 0\n");
        script
    }
}

fn home_path(home: &str, relative: &str) -> String {
    format!("{}/{}", home.trim_end_matches('/'), relative)
}

/// Single-quote a string for `/bin/sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Extract check statuses from probe stdout, keyed by check index.
pub fn parse_markers(stdout: &str) -> BTreeMap<usize, CheckStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? != MARKER {
                return None;
            }
            let index = parts.next()?.parse().ok()?;
            let status = match parts.next()? {
                "present" => CheckStatus::Present,
                "missing" => CheckStatus::Missing,
                _ => return None,
            };
            Some((index, status))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_probe_layout() {
        let probe = Probe::base("/home/dev");
        let required: Vec<&str> = probe
            .checks
            .iter()
            .filter(|c| c.is_required())
            .map(|c| c.target.as_str())
            .collect();
        assert_eq!(required, BASE_REQUIRED_TOOLS.to_vec());
        assert!(probe
            .checks
            .iter()
            .any(|c| c.target == "/home/dev/.config/starship.toml" && !c.is_required()));
        assert!(probe.checks.iter().all(|c| c.target != "kubectl"));
    }

    #[test]
    fn test_full_probe_order() {
        let probe = Probe::full("/home/dev/");
        let labels: Vec<String> = probe.checks.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "tool kubectl",
                "tool talosctl",
                "tool cilium",
                "tool kubectl-cnpg",
                "tool ruff",
                "tool gopls",
                "tool rust-analyzer",
                "file /home/dev/.config/helix/languages.toml",
            ]
        );
        assert!(!probe.checks[4].is_required());
        assert!(probe.checks[6].is_required());
    }

    #[test]
    fn test_script_lines() {
        let probe = Probe {
            name: "test",
            checks: vec![Check::required_tool("hx"), Check::soft_file("/tmp/it's")],
        };
        let script = probe.script();
        assert!(script.contains("check_tool 0 'hx' || exit 1\n"));
        assert!(script.contains("check_file 1 '/tmp/it'\\''s' || true\n"));
        assert!(script.ends_with("exit 0\n"));
    }

    #[test]
    fn test_parse_markers_ignores_noise() {
        let out = "welcome\n__DEVBOX_CHECK__ 0 present\n__DEVBOX_CHECK__ x present\n\
                   __DEVBOX_CHECK__ 1 missing\n__DEVBOX_CHECK__ 2 maybe\n";
        let markers = parse_markers(out);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[&0], CheckStatus::Present);
        assert_eq!(markers[&1], CheckStatus::Missing);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }
}
