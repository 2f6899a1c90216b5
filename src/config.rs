//! devbox configuration.
//!
//! Fixed paths and check lists live here as constants; the handful of knobs
//! that differ between deployments are read from the process environment.
//!
//! # Example
//!
//! ```rust
//! use devbox::config::BootstrapConfig;
//!
//! let config = BootstrapConfig::from_lookup(|name| match name {
//!     "ENABLE_SSH" => Some("true".to_string()),
//!     _ => None,
//! });
//! assert!(config.remote_access);
//! assert_eq!(config.user, "dev");
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that enables remote access.
pub const ENABLE_SSH_ENV: &str = "ENABLE_SSH";
/// Environment variable overriding the primary user.
pub const USER_ENV: &str = "DEVBOX_USER";
/// Environment variable overriding the username used for the key endpoint.
pub const KEYS_USER_ENV: &str = "DEVBOX_KEYS_USER";
/// Environment variable overriding the persisted host key directory.
pub const HOST_KEY_DIR_ENV: &str = "DEVBOX_HOST_KEY_DIR";
/// Environment variable overriding the key fetch bound (seconds).
pub const FETCH_TIMEOUT_ENV: &str = "DEVBOX_FETCH_TIMEOUT";
/// Environment variable selecting the container runtime binary.
pub const RUNTIME_ENV: &str = "DEVBOX_RUNTIME";

pub const DEFAULT_USER: &str = "dev";
pub const DEFAULT_HOST_KEY_DIR: &str = "/etc/ssh/keys";
pub const SYSTEM_SSH_DIR: &str = "/etc/ssh";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RUNTIME: &str = "docker";
pub const PASSWD_FILE: &str = "/etc/passwd";

/// Public key listing endpoint, `{user}` is substituted.
pub const KEYS_URL_TEMPLATE: &str = "https://github.com/{user}.keys";

pub const SSHD_PATH: &str = "/usr/sbin/sshd";
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Image verified when none is given on the command line.
pub const DEFAULT_IMAGE: &str = "devbox:base";

/// Line printed by `entrypoint --init-only` once setup is done.
pub const INIT_COMPLETE_MESSAGE: &str = "init complete";

/// Required tools for every image variant, in check order.
pub const BASE_REQUIRED_TOOLS: &[&str] = &[
    "hx",          // editor
    "zellij",      // multiplexer
    "yazi",        // file manager
    "starship",    // prompt
    "rg",
    "fd",
    "uv",          // package manager
    "cloudflared", // secure tunnel client
    "direnv",      // environment loader
    "just",        // task runner
    "node",
    "npm",
];

/// Profile script installed by the system package manager.
pub const PACKAGE_MANAGER_PROFILE: &str = "/etc/profile.d/nix.sh";

/// Config files expected under the user's home. Often mounted at run time.
pub const BASE_CONFIG_FILES: &[&str] = &[
    ".config/starship.toml",
    ".config/zellij/config.kdl",
    ".config/helix/config.toml",
    ".config/yazi/yazi.toml",
];

/// Cluster and infrastructure CLIs required in the full image.
pub const FULL_REQUIRED_TOOLS: &[&str] = &["kubectl", "talosctl", "cilium", "kubectl-cnpg"];

/// Language tooling that may be installed lazily after first start.
pub const FULL_SOFT_TOOLS: &[&str] = &["ruff", "gopls"];

pub const FULL_LANGUAGE_SERVER: &str = "rust-analyzer";
pub const FULL_LANGUAGE_CONFIG: &str = ".config/helix/languages.toml";

/// Parse the remote-access flag. Absence or any unrecognised value disables it.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

/// Settings for `devbox entrypoint`.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Whether the SSH daemon and key provisioning are enabled.
    pub remote_access: bool,
    /// Primary user of the container.
    pub user: String,
    /// Home directory of the primary user.
    pub home: PathBuf,
    /// Persisted host key directory.
    pub host_key_dir: PathBuf,
    /// System SSH configuration directory the daemon reads keys from.
    pub system_ssh_dir: PathBuf,
    /// Endpoint listing the user's public keys.
    pub keys_url: String,
    /// Upper bound for the key fetch.
    pub fetch_timeout: Duration,
    /// Login shell for interactive mode.
    pub shell: String,
    /// passwd database used to resolve the primary user's uid and gid.
    pub passwd_file: PathBuf,
}

impl BootstrapConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let user = lookup(USER_ENV)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let keys_user = lookup(KEYS_USER_ENV)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| user.clone());
        let fetch_timeout = lookup(FETCH_TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);

        Self {
            remote_access: is_truthy(lookup(ENABLE_SSH_ENV).as_deref()),
            home: PathBuf::from("/home").join(&user),
            host_key_dir: lookup(HOST_KEY_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_KEY_DIR)),
            system_ssh_dir: PathBuf::from(SYSTEM_SSH_DIR),
            keys_url: KEYS_URL_TEMPLATE.replace("{user}", &keys_user),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            shell: lookup("SHELL")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            passwd_file: PathBuf::from(PASSWD_FILE),
            user,
        }
    }

    /// `~/.ssh/authorized_keys` of the primary user.
    pub fn authorized_keys_path(&self) -> PathBuf {
        self.home.join(".ssh").join("authorized_keys")
    }

    /// Startup profile sourced before a terminal mode starts.
    pub fn profile_path(&self) -> PathBuf {
        self.home.join(".profile")
    }
}

/// Settings for `devbox verify`.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Container runtime binary (`docker`, `podman`).
    pub runtime: String,
    /// Home directory of the primary user inside the image.
    pub home: String,
}

impl VerifyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let user = lookup(USER_ENV)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        Self {
            runtime: lookup(RUNTIME_ENV)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            home: format!("/home/{}", user),
        }
    }
}
