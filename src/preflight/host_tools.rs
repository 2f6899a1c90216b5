//! Host tool validation.
//!
//! Checks that required external tools are installed and executable.

use super::CheckResult;
use crate::process::which;

/// Tools needed besides the container runtime, with install suggestions.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("curl", "Fetch keys and tool archives", "sudo apt install curl"),
    ("tar", "Extract tool archives", "sudo apt install tar"),
    ("unzip", "Extract zip tool archives", "sudo apt install unzip"),
    ("ssh-keygen", "Generate host keys", "sudo apt install openssh-client"),
];

/// Check the container runtime and every other required host tool.
pub fn check_host_tools(runtime: &str) -> Vec<CheckResult> {
    std::iter::once(check_tool(
        runtime,
        "Start image instances",
        "Install docker or podman, or set DEVBOX_RUNTIME",
    ))
    .chain(
        REQUIRED_TOOLS
            .iter()
            .map(|(tool, purpose, install)| check_tool(tool, purpose, install)),
    )
    .collect()
}

fn check_tool(tool: &str, purpose: &str, install_cmd: &str) -> CheckResult {
    match which(tool) {
        Some(path) => CheckResult::pass(
            format!("{} tool", tool),
            format!("Found at {} ({})", path.display(), purpose),
        ),
        None => CheckResult::fail(
            format!("{} tool", tool),
            format!("Not found (needed for: {})", purpose),
            install_cmd,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_existing() {
        // sh exists on any Unix system
        assert!(check_tool("sh", "testing", "n/a").passed);
    }

    #[test]
    fn test_check_tool_nonexistent() {
        let result = check_tool("definitely_not_a_real_command_12345", "testing", "n/a");
        assert!(!result.passed);
        assert_eq!(result.suggestion.as_deref(), Some("n/a"));
    }

    #[test]
    fn test_check_host_tools_returns_results() {
        let results = check_host_tools("docker");
        assert_eq!(results.len(), REQUIRED_TOOLS.len() + 1);
        assert_eq!(results[0].name, "docker tool");
    }
}
