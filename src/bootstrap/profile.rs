//! User environment loading.
//!
//! The startup profile is a shell script, so it is sourced by `/bin/sh` and
//! the resulting environment is captured and handed to the terminal process.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::process::Cmd;

/// Variables that describe the capturing shell, not the user environment.
const SHELL_INTERNAL_VARS: &[&str] = &["_", "SHLVL", "PWD", "OLDPWD"];

/// Environment captured from the startup profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEnv {
    pub vars: BTreeMap<String, String>,
}

impl UserEnv {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Parse the NUL-separated output of `env -0`.
    pub fn parse(raw: &str) -> Self {
        let vars = raw
            .split('\0')
            .filter_map(|entry| entry.split_once('='))
            .filter(|(key, _)| !key.is_empty() && !SHELL_INTERNAL_VARS.contains(key))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { vars }
    }
}

/// Source `profile` if it exists and capture the environment it produces.
///
/// A missing profile is not an error. A profile that fails to source is
/// logged and ignored; the terminal process still starts.
pub fn load_user_env(profile: &Path) -> UserEnv {
    if !profile.is_file() {
        debug!(profile = %profile.display(), "no startup profile");
        return UserEnv::default();
    }

    let result = Cmd::new("/bin/sh")
        .args(["-c", ". \"$1\" >/dev/null 2>&1 && env -0", "devbox-profile"])
        .arg_path(profile)
        .run();

    match result {
        Ok(output) => {
            let env = UserEnv::parse(&output.stdout);
            debug!(profile = %profile.display(), vars = env.vars.len(), "startup profile loaded");
            env
        }
        Err(e) => {
            warn!(profile = %profile.display(), "startup profile failed, skipping: {}", e);
            UserEnv::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_env0() {
        let env = UserEnv::parse("EDITOR=hx\0PATH=/usr/bin:/bin\0SHLVL=1\0EMPTY=\0MULTI=a=b\0");
        assert_eq!(env.vars.get("EDITOR").map(String::as_str), Some("hx"));
        assert_eq!(env.vars.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(env.vars.get("MULTI").map(String::as_str), Some("a=b"));
        assert!(!env.vars.contains_key("SHLVL"));
    }

    #[test]
    fn test_missing_profile_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_user_env(&tmp.path().join(".profile")).is_empty());
    }

    #[test]
    fn test_profile_exports_are_captured() {
        let tmp = TempDir::new().unwrap();
        let profile = tmp.path().join(".profile");
        fs::write(&profile, "export EDITOR=hx\nexport DEVBOX_GREETING='hello there'\n").unwrap();

        let env = load_user_env(&profile);
        assert_eq!(env.vars.get("EDITOR").map(String::as_str), Some("hx"));
        assert_eq!(
            env.vars.get("DEVBOX_GREETING").map(String::as_str),
            Some("hello there")
        );
    }

    #[test]
    fn test_failing_profile_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let profile = tmp.path().join(".profile");
        fs::write(&profile, "export EDITOR=hx\nfalse\n").unwrap();

        assert!(load_user_env(&profile).is_empty());
    }
}
