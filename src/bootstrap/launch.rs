//! Terminal mode processes.
//!
//! The daemon and the interactive shell run as child processes; the
//! entrypoint waits for them and exits with their status. The entrypoint is
//! usually PID 1, which the kernel shields from default signal actions, so
//! SIGTERM, SIGINT and SIGHUP are caught and relayed to the child.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use super::profile::UserEnv;
use crate::config::{BootstrapConfig, SSHD_PATH};
use crate::error::{Error, Result};

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub path: String,
    pub args: Vec<String>,
}

impl Program {
    /// sshd in the foreground, logging to stderr.
    pub fn daemon() -> Self {
        Self {
            path: SSHD_PATH.to_string(),
            args: vec!["-D".into(), "-e".into()],
        }
    }

    /// The user's shell as a login shell.
    pub fn login_shell(config: &BootstrapConfig) -> Self {
        Self {
            path: config.shell.clone(),
            args: vec!["-l".into()],
        }
    }
}

/// Starts a terminal mode program and reports its exit code.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    async fn launch(&self, program: &Program, env: &UserEnv) -> Result<i32>;
}

/// Runs the program as a child with inherited stdio, relaying signals.
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    async fn launch(&self, program: &Program, env: &UserEnv) -> Result<i32> {
        let launch_error = |source: std::io::Error| Error::Launch {
            program: program.path.clone(),
            source,
        };

        // handlers go in before the spawn so no signal slips past
        let mut signals = RelayedSignals::install().map_err(launch_error)?;

        info!(program = %program.path, "starting");
        let child = Command::new(&program.path)
            .args(&program.args)
            .envs(&env.vars)
            .spawn()
            .map_err(launch_error)?;

        let status = supervise(child, &mut signals).await.map_err(launch_error)?;
        Ok(exit_code(status))
    }
}

/// Signals to pass on to the running child.
#[allow(async_fn_in_trait)]
pub trait SignalSource {
    /// Next signal, or `None` once the source is closed.
    async fn recv(&mut self) -> Option<Signal>;
}

/// SIGTERM, SIGINT and SIGHUP delivered to this process.
pub struct RelayedSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

impl RelayedSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}

impl SignalSource for RelayedSignals {
    async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            Some(()) = self.terminate.recv() => Some(Signal::SIGTERM),
            Some(()) = self.interrupt.recv() => Some(Signal::SIGINT),
            Some(()) = self.hangup.recv() => Some(Signal::SIGHUP),
            else => None,
        }
    }
}

/// Wait for `child`, relaying every signal from `signals` to it.
pub async fn supervise<S: SignalSource>(mut child: Child, signals: &mut S) -> std::io::Result<ExitStatus> {
    let pid = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(Pid::from_raw);

    loop {
        tokio::select! {
            status = child.wait() => return status,
            Some(sig) = signals.recv() => {
                let Some(pid) = pid else { continue };
                debug!(signal = %sig, %pid, "relaying signal");
                if let Err(e) = kill(pid, sig) {
                    warn!(signal = %sig, "could not relay signal: {}", e);
                }
            }
        }
    }
}

/// Shell convention: a signal death is reported as 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    impl SignalSource for mpsc::Receiver<Signal> {
        async fn recv(&mut self) -> Option<Signal> {
            mpsc::Receiver::recv(self).await
        }
    }

    fn sh(script: &str) -> Program {
        Program {
            path: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    async fn wait_for(path: &Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[test]
    fn test_exit_code_passthrough() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        // wait status encodes the exit code in the high byte
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    }

    #[test]
    fn test_exit_code_signal() {
        // SIGTERM
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }

    #[tokio::test]
    async fn test_process_launcher_forwards_status() {
        let code = ProcessLauncher
            .launch(&sh("exit 7"), &UserEnv::default())
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn test_process_launcher_applies_env() {
        let mut env = UserEnv::default();
        env.vars.insert("DEVBOX_EXIT".into(), "5".into());
        let code = ProcessLauncher
            .launch(&sh("exit $DEVBOX_EXIT"), &env)
            .await
            .unwrap();
        assert_eq!(code, 5);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let program = Program {
            path: "/nonexistent/sshd".into(),
            args: vec![],
        };
        let err = ProcessLauncher
            .launch(&program, &UserEnv::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn test_sigterm_reaches_child_handler() {
        let tmp = TempDir::new().unwrap();
        let ready = tmp.path().join("ready");
        let script = format!(
            "trap 'exit 7' TERM; touch '{}'; while :; do sleep 0.05; done",
            ready.display()
        );
        let child = Command::new("/bin/sh").args(["-c", &script]).spawn().unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        let relay = async {
            wait_for(&ready).await;
            tx.send(Signal::SIGTERM).await.unwrap();
        };
        let (status, ()) = tokio::join!(supervise(child, &mut rx), relay);

        assert_eq!(exit_code(status.unwrap()), 7);
    }

    #[tokio::test]
    async fn test_untrapped_signal_terminates_child() {
        let tmp = TempDir::new().unwrap();
        let ready = tmp.path().join("ready");
        let script = format!("touch '{}'; exec sleep 30", ready.display());
        let child = Command::new("/bin/sh").args(["-c", &script]).spawn().unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        let relay = async {
            wait_for(&ready).await;
            tx.send(Signal::SIGHUP).await.unwrap();
        };
        let (status, ()) = tokio::join!(supervise(child, &mut rx), relay);

        assert_eq!(exit_code(status.unwrap()), 128 + 1);
    }

    #[tokio::test]
    async fn test_closed_source_still_waits_for_child() {
        let child = Command::new("/bin/sh").args(["-c", "exit 3"]).spawn().unwrap();
        let (tx, mut rx) = mpsc::channel::<Signal>(1);
        drop(tx);

        let status = supervise(child, &mut rx).await.unwrap();
        assert_eq!(exit_code(status), 3);
    }
}
