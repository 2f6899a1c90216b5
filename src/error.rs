//! Error type for the fatal paths of bootstrap and verification.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Anything recoverable (key fetch, profile sourcing) is
/// handled where it happens and never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem operation failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Host key generation failed.
    #[error("failed to generate {algorithm} host key at {}: {reason}", path.display())]
    KeyGeneration {
        algorithm: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// An external command could not be run or exited non-zero.
    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// A terminal mode process could not be started.
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Attach a path and action to an I/O error.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_display_includes_path() {
        let err = Error::io(
            "failed to create",
            "/etc/ssh/keys",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("failed to create /etc/ssh/keys"));
    }

    #[test]
    fn test_key_generation_display() {
        let err = Error::KeyGeneration {
            algorithm: "ed25519",
            path: PathBuf::from("/k/ssh_host_ed25519_key"),
            reason: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to generate ed25519 host key at /k/ssh_host_ed25519_key: disk full"
        );
    }
}
