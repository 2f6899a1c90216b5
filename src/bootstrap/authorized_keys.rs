//! Authorized key aggregation.
//!
//! The authorized keys file is rebuilt on every bootstrap with remote access
//! enabled: keys fetched from the public key endpoint are merged with whatever
//! the file already holds (typically a mount), sorted and deduplicated, and
//! the result replaces the file. The same inputs always produce the same
//! bytes, and a failed fetch only means fewer keys, never a failed boot.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Why the remote key list could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not run curl: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("request to {url} failed (curl exit {code:?}): {stderr}")]
    Request {
        url: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("request to {url} timed out after {}s", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },
}

/// Source of newline-delimited public keys.
#[allow(async_fn_in_trait)]
pub trait KeySource {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    async fn fetch(&self) -> std::result::Result<String, FetchError>;
}

/// Fetches keys over HTTPS with `curl`, bounded by a timeout.
pub struct HttpKeySource {
    url: String,
    timeout: Duration,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl KeySource for HttpKeySource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> std::result::Result<String, FetchError> {
        let max_time = self.timeout.as_secs().max(1).to_string();
        let output = tokio::process::Command::new("curl")
            .args([
                "--silent",
                "--show-error",
                "--fail",
                "--location",
                "--max-time",
                max_time.as_str(),
                self.url.as_str(),
            ])
            .kill_on_drop(true)
            .output();

        // curl enforces --max-time itself; this is the backstop for a hung spawn
        let output = match tokio::time::timeout(self.timeout + Duration::from_secs(5), output).await {
            Ok(result) => result.map_err(FetchError::Spawn)?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: self.url.clone(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(FetchError::Request {
                url: self.url.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The merged, canonical set of authorized keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedKeySet {
    /// Sorted, duplicate-free key lines.
    pub keys: Vec<String>,
    /// Lines contributed by the remote source.
    pub remote_count: usize,
    /// Lines present before the merge.
    pub existing_count: usize,
}

impl AuthorizedKeySet {
    /// Union of both inputs. Blank lines are dropped, lines are trimmed.
    pub fn merge(remote: &str, existing: &str) -> Self {
        let remote_lines: Vec<&str> = key_lines(remote).collect();
        let existing_lines: Vec<&str> = key_lines(existing).collect();

        let keys: BTreeSet<&str> = remote_lines
            .iter()
            .chain(existing_lines.iter())
            .copied()
            .collect();

        Self {
            keys: keys.into_iter().map(String::from).collect(),
            remote_count: remote_lines.len(),
            existing_count: existing_lines.len(),
        }
    }

    /// File contents: one key per line with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for key in &self.keys {
            out.push_str(key);
            out.push('\n');
        }
        out
    }
}

fn key_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Owner applied to the written file and its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Look up a user's uid and gid in a passwd-format file.
pub fn lookup_owner(passwd: &Path, user: &str) -> Option<Owner> {
    let content = fs::read_to_string(passwd).ok()?;
    content.lines().find_map(|line| {
        let mut fields = line.split(':');
        if fields.next()? != user {
            return None;
        }
        let _password = fields.next()?;
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        Some(Owner { uid, gid })
    })
}

/// Rebuild `target` from `source` and the optional `existing` file.
///
/// `existing` is usually `target` itself. A fetch failure is logged and
/// treated as an empty key list; filesystem failures are returned.
pub async fn build_authorized_keys<S: KeySource>(
    source: &S,
    existing: Option<&Path>,
    target: &Path,
    owner: Option<Owner>,
) -> Result<AuthorizedKeySet> {
    let remote = match source.fetch().await {
        Ok(body) => body,
        Err(e) => {
            warn!("could not fetch keys from {}: {}; using local keys only", source.describe(), e);
            String::new()
        }
    };

    let existing_content = match existing {
        Some(path) if path.exists() => {
            fs::read_to_string(path).map_err(|e| Error::io("failed to read", path, e))?
        }
        _ => String::new(),
    };

    let set = AuthorizedKeySet::merge(&remote, &existing_content);
    write_authorized_keys(target, &set.render(), owner)?;

    info!(
        path = %target.display(),
        keys = set.keys.len(),
        remote = set.remote_count,
        existing = set.existing_count,
        "authorized keys written"
    );
    Ok(set)
}

/// Replace `target` with `content` and apply the permissions sshd insists on.
fn write_authorized_keys(target: &Path, content: &str, owner: Option<Owner>) -> Result<()> {
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir).map_err(|e| Error::io("failed to create", &dir, e))?;
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| Error::io("failed to set permissions on", &dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| Error::io("failed to create temporary file in", &dir, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io("failed to write", tmp.path(), e))?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::io("failed to set permissions on", tmp.path(), e))?;
    if let Err(e) = tmp.persist(target) {
        if !is_mount_conflict(&e.error) {
            return Err(Error::io("failed to replace", target, e.error));
        }
        // a bind-mounted file can't be renamed over; rewrite it instead
        debug!(path = %target.display(), "target is a mount, writing in place");
        write_in_place(target, content)?;
    }

    if let Some(owner) = owner {
        for path in [dir.as_path(), target] {
            std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
                .map_err(|e| Error::io("failed to change owner of", path, e))?;
        }
        debug!(uid = owner.uid, gid = owner.gid, "authorized keys ownership set");
    }
    Ok(())
}

/// EBUSY (mount point) or EXDEV (other filesystem).
fn is_mount_conflict(err: &std::io::Error) -> bool {
    const EBUSY: i32 = 16;
    const EXDEV: i32 = 18;
    matches!(err.raw_os_error(), Some(EBUSY) | Some(EXDEV))
}

fn write_in_place(target: &Path, content: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(target)
        .map_err(|e| Error::io("failed to open", target, e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::io("failed to write", target, e))?;
    fs::set_permissions(target, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::io("failed to set permissions on", target, e))
}
