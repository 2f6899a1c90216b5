//! Container first-boot sequencing.
//!
//! The entrypoint moves through a fixed sequence of stages:
//!
//! ```text
//! Start ──▶ KeysEnsured ──▶ AccessConfigured ──▶ Dispatched
//!   │                                              ▲
//!   └──────────── remote access disabled ──────────┘
//! ```
//!
//! The terminal [`BootstrapMode`] is chosen before any stage runs and never
//! changes afterwards. `InitOnly` returns straight after setup; the other
//! modes hand the process over to a long-lived child, relay signals to it
//! and forward its exit status.
//!
//! # Usage
//!
//! ```rust,ignore
//! use devbox::bootstrap::{Bootstrap, host_keys::SshKeygen, authorized_keys::HttpKeySource, launch::ProcessLauncher};
//!
//! let config = BootstrapConfig::from_env();
//! let keygen = SshKeygen::new("root@devbox");
//! let source = HttpKeySource::new(&config.keys_url, config.fetch_timeout);
//! let code = Bootstrap::new(&config, &keygen, &source, &ProcessLauncher)
//!     .run(init_only)
//!     .await?;
//! std::process::exit(code);
//! ```

pub mod authorized_keys;
pub mod host_keys;
pub mod launch;
pub mod profile;

use std::fmt;

use tracing::info;

use crate::config::{BootstrapConfig, INIT_COMPLETE_MESSAGE};
use crate::error::Result;
use authorized_keys::{build_authorized_keys, lookup_owner, AuthorizedKeySet, KeySource};
use host_keys::{HostKeySet, KeyGenerator, KeyStore};
use launch::{Launcher, Program};
use profile::{load_user_env, UserEnv};

/// What the entrypoint does once setup is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Exit successfully after setup.
    InitOnly,
    /// Run the SSH daemon in the foreground.
    Daemon,
    /// Run an interactive login shell.
    InteractiveShell,
}

impl fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapMode::InitOnly => "init-only",
            BootstrapMode::Daemon => "daemon",
            BootstrapMode::InteractiveShell => "interactive shell",
        };
        f.write_str(name)
    }
}

/// `--init-only` wins over everything; otherwise remote access picks the daemon.
pub fn select_mode(init_only: bool, remote_access: bool) -> BootstrapMode {
    if init_only {
        BootstrapMode::InitOnly
    } else if remote_access {
        BootstrapMode::Daemon
    } else {
        BootstrapMode::InteractiveShell
    }
}

/// Progress through the first-boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    KeysEnsured,
    AccessConfigured,
    Dispatched,
}

/// Everything setup produced, ready for dispatch.
#[derive(Debug)]
pub struct Prepared {
    pub mode: BootstrapMode,
    pub stage: Stage,
    pub host_keys: Option<HostKeySet>,
    pub authorized_keys: Option<AuthorizedKeySet>,
    pub env: UserEnv,
}

/// First-boot sequencer for one container.
pub struct Bootstrap<'a, G: KeyGenerator, S: KeySource, L: Launcher> {
    config: &'a BootstrapConfig,
    keygen: &'a G,
    source: &'a S,
    launcher: &'a L,
}

impl<'a, G: KeyGenerator, S: KeySource, L: Launcher> Bootstrap<'a, G, S, L> {
    pub fn new(config: &'a BootstrapConfig, keygen: &'a G, source: &'a S, launcher: &'a L) -> Self {
        Self {
            config,
            keygen,
            source,
            launcher,
        }
    }

    /// Run setup, then the selected mode. Returns the process exit code.
    pub async fn run(&self, init_only: bool) -> Result<i32> {
        let prepared = self.prepare(init_only).await?;
        self.dispatch(prepared).await
    }

    /// Perform every setup stage without starting a terminal mode.
    pub async fn prepare(&self, init_only: bool) -> Result<Prepared> {
        let mode = select_mode(init_only, self.config.remote_access);
        let mut stage = Stage::Start;
        info!(%mode, remote_access = self.config.remote_access, "bootstrap starting");

        let mut host_keys = None;
        let mut authorized_keys = None;

        if self.config.remote_access {
            let store = KeyStore::new(
                &self.config.host_key_dir,
                &self.config.system_ssh_dir,
                self.keygen,
            );
            host_keys = Some(store.ensure_host_keys()?);
            stage = advance(stage, Stage::KeysEnsured);

            let target = self.config.authorized_keys_path();
            let owner = lookup_owner(&self.config.passwd_file, &self.config.user);
            authorized_keys =
                Some(build_authorized_keys(self.source, Some(&target), &target, owner).await?);
            stage = advance(stage, Stage::AccessConfigured);
        } else {
            info!("remote access disabled, skipping host and authorized keys");
        }

        let env = load_user_env(&self.config.profile_path());

        Ok(Prepared {
            mode,
            stage,
            host_keys,
            authorized_keys,
            env,
        })
    }

    /// Enter the terminal mode.
    pub async fn dispatch(&self, prepared: Prepared) -> Result<i32> {
        advance(prepared.stage, Stage::Dispatched);
        let program = match prepared.mode {
            BootstrapMode::InitOnly => {
                eprintln!("{}", INIT_COMPLETE_MESSAGE);
                return Ok(0);
            }
            BootstrapMode::Daemon => Program::daemon(),
            BootstrapMode::InteractiveShell => Program::login_shell(self.config),
        };
        self.launcher.launch(&program, &prepared.env).await
    }
}

fn advance(from: Stage, to: Stage) -> Stage {
    debug_assert!(to > from, "bootstrap stages only move forward");
    info!(?from, ?to, "bootstrap stage");
    to
}
