//! Container runtime access for the verification harness.

use crate::error::Result;
use crate::process::{Cmd, CommandResult};

/// What a fresh instance should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// The image entrypoint with `--init-only`.
    ///
    /// The image's `ENTRYPOINT` must be `devbox entrypoint`; the runtime
    /// appends `--init-only` to it as the container command.
    InitOnly,
    /// A probe script under `/bin/sh`, bypassing the entrypoint.
    Probe(String),
}

/// Starts a fresh, throwaway instance of an image and waits for it.
pub trait ContainerRuntime {
    fn run(&self, image: &str, launch: &Launch) -> Result<CommandResult>;
}

/// A docker-compatible CLI (`docker`, `podman`).
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments passed to the runtime binary.
    pub fn command_args(image: &str, launch: &Launch) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        match launch {
            Launch::InitOnly => {
                args.push(image.to_string());
                args.push("--init-only".to_string());
            }
            Launch::Probe(script) => {
                args.extend(["--entrypoint".to_string(), "/bin/sh".to_string()]);
                args.push(image.to_string());
                args.extend(["-c".to_string(), script.clone()]);
            }
        }
        args
    }
}

impl ContainerRuntime for CliRuntime {
    fn run(&self, image: &str, launch: &Launch) -> Result<CommandResult> {
        Cmd::new(&self.binary)
            .args(Self::command_args(image, launch))
            .allow_fail()
            .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_only_args() {
        assert_eq!(
            CliRuntime::command_args("devbox:base", &Launch::InitOnly),
            vec!["run", "--rm", "devbox:base", "--init-only"]
        );
    }

    #[test]
    fn test_init_only_keeps_image_entrypoint() {
        let args = CliRuntime::command_args("devbox:base", &Launch::InitOnly);
        assert!(!args.iter().any(|a| a == "--entrypoint"));
        assert_eq!(args.last().map(String::as_str), Some("--init-only"));
    }

    #[test]
    fn test_probe_args() {
        let args = CliRuntime::command_args("devbox:full", &Launch::Probe("exit 0".into()));
        assert_eq!(
            args,
            vec!["run", "--rm", "--entrypoint", "/bin/sh", "devbox:full", "-c", "exit 0"]
        );
    }

    #[test]
    fn test_missing_runtime_binary_is_error() {
        let runtime = CliRuntime::new("definitely_not_a_real_command_12345");
        assert!(runtime.run("devbox:base", &Launch::InitOnly).is_err());
    }
}
