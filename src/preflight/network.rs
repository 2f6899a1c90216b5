//! Network connectivity check.
//!
//! Verifies that the public key endpoint answers before an entrypoint
//! relies on it.

use super::CheckResult;

/// Check that `url` answers a HEAD request within ten seconds.
pub async fn check_network(url: &str) -> CheckResult {
    let result = tokio::process::Command::new("curl")
        .args([
            "--head",
            "--silent",
            "--fail",
            "--location",
            "--max-time", "10",
            "--output", "/dev/null",
            url,
        ])
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            CheckResult::pass("Network", format!("Key endpoint reachable ({})", host_of(url)))
        }
        Ok(_) => CheckResult::fail(
            "Network",
            format!("Key endpoint unreachable ({})", host_of(url)),
            "Check your internet connection; mounted authorized keys still work offline",
        ),
        Err(e) => CheckResult::fail(
            "Network",
            format!("Failed to check network: {}", e),
            "Ensure curl is installed and you have network access",
        ),
    }
}

/// Host part of a URL, for display.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}
