//! Download, verify and install pinned tools.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{find, Archive, Tool};
use crate::process::Cmd;

/// Upper bound for one release download.
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Where and how binaries are installed.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub dest: PathBuf,
    /// Copy with `sudo` for root-owned destinations.
    pub sudo: bool,
    /// Target of helix's `runtime/` tree.
    pub helix_runtime_dir: PathBuf,
}

impl InstallOptions {
    pub fn new(dest: impl Into<PathBuf>, sudo: bool) -> Self {
        let helix_runtime_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(".config/helix/runtime");
        Self {
            dest: dest.into(),
            sudo,
            helix_runtime_dir,
        }
    }
}

/// The install destination must be an existing directory.
pub fn ensure_destination(dest: &Path) -> Result<()> {
    if !dest.is_dir() {
        bail!("destination {} does not exist", dest.display());
    }
    Ok(())
}

/// Install the named tools. Returns true only if every tool installed.
///
/// Failures are reported and the remaining tools still get installed.
pub fn install_tools(names: &[String], options: &InstallOptions) -> bool {
    let mut success = true;

    for name in names {
        let Some(tool) = find(name) else {
            eprintln!("error: unknown tool '{}'", name);
            success = false;
            continue;
        };

        println!("installing {} v{}...", tool.name, tool.version);
        match install_one(tool, options) {
            Ok(installed) => {
                for bin in &installed {
                    println!("  installed {} -> {}", bin, options.dest.join(bin).display());
                }
                if let Some(msg) = tool.post_install_message {
                    println!("  note: {}", msg.replace("{version}", tool.version));
                }
                println!("  done\n");
            }
            Err(e) => {
                eprintln!("  error: {:#}\n", e);
                success = false;
            }
        }
    }

    success
}

pub(crate) fn install_one(tool: &Tool, options: &InstallOptions) -> Result<Vec<String>> {
    let download_dir = tempfile::tempdir().context("Failed to create download directory")?;
    let archive_path = download_dir.path().join("asset");

    println!("  downloading {} v{}...", tool.name, tool.version);
    download(&tool.url(), &archive_path)?;
    verify_sha256(&archive_path, tool.sha256)
        .with_context(|| format!("sha256 mismatch for {}", tool.name))?;
    println!(
        "  verified sha256: {}...",
        tool.sha256.get(..16).unwrap_or(tool.sha256)
    );

    // stage first so a half-extracted archive never reaches the destination
    let staging = tempfile::tempdir().context("Failed to create staging directory")?;
    let installed = extract(tool, &archive_path, staging.path(), &options.helix_runtime_dir)?;
    if installed.is_empty() {
        bail!("no binaries found in {} archive", tool.name);
    }

    for bin in &installed {
        let src = staging.path().join(bin);
        let dst = options.dest.join(bin);
        if options.sudo {
            Cmd::new("sudo").arg("cp").arg_path(&src).arg_path(&dst).run()?;
            Cmd::new("sudo").args(["chmod", "755"]).arg_path(&dst).run()?;
        } else {
            fs::copy(&src, &dst)
                .with_context(|| format!("Failed to copy {} to {}", bin, dst.display()))?;
            fs::set_permissions(&dst, fs::Permissions::from_mode(0o755))?;
        }
    }

    Ok(installed)
}

/// Download `url` to `dest` with curl.
pub fn download(url: &str, dest: &Path) -> Result<()> {
    Cmd::new("curl")
        .args(["--silent", "--show-error", "--fail", "--location", "--max-time"])
        .arg(DOWNLOAD_TIMEOUT_SECS.to_string())
        .arg("--output")
        .arg_path(dest)
        .arg(url)
        .run()
        .with_context(|| format!("failed to download {}", url))?;
    Ok(())
}

/// Check the SHA-256 of `path` against a hex digest.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let actual = hex::encode(Sha256::digest(&data));
    if !actual.eq_ignore_ascii_case(expected) {
        bail!("  expected: {}\n  actual:   {}", expected, actual);
    }
    Ok(())
}

/// Unpack a downloaded asset and copy the wanted binaries into `staging`.
///
/// Returns the installed binary names.
pub fn extract(
    tool: &Tool,
    archive_path: &Path,
    staging: &Path,
    helix_runtime_dir: &Path,
) -> Result<Vec<String>> {
    if let Archive::Binary(name) = tool.archive {
        let dst = staging.join(name);
        fs::copy(archive_path, &dst)
            .with_context(|| format!("Failed to copy {} into staging", name))?;
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o755))?;
        return Ok(vec![name.to_string()]);
    }

    let unpack = tempfile::tempdir().context("Failed to create unpack directory")?;
    match tool.archive {
        Archive::TarGz => unpack_tar(archive_path, unpack.path(), "-xzf")?,
        Archive::TarXz => unpack_tar(archive_path, unpack.path(), "-xJf")?,
        Archive::Zip => {
            Cmd::new("unzip")
                .args(["-q", "-o"])
                .arg_path(archive_path)
                .arg("-d")
                .arg_path(unpack.path())
                .error_msg("unzip failed. Install: sudo apt install unzip")
                .run()?;
        }
        Archive::Binary(_) => unreachable!("handled above"),
    }

    let mut files = Vec::new();
    collect_files(unpack.path(), Path::new(""), &mut files)?;
    files.sort();

    let mut installed = Vec::new();
    for rel in &files {
        if rel.components().count() <= tool.strip_components {
            continue;
        }
        let Some(name) = rel.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !tool.binaries.is_empty() && !tool.binaries.contains(&name) {
            continue;
        }
        let dst = staging.join(name);
        fs::copy(unpack.path().join(rel), &dst)
            .with_context(|| format!("Failed to stage {}", rel.display()))?;
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o755))?;
        installed.push(name.to_string());
    }

    if tool.helix_runtime {
        let count = install_runtime_tree(unpack.path(), &files, helix_runtime_dir)?;
        println!("  runtime: {} files -> {}", count, helix_runtime_dir.display());
    }

    Ok(installed)
}

fn unpack_tar(archive: &Path, dest: &Path, flags: &str) -> Result<()> {
    Cmd::new("tar")
        .arg(flags)
        .arg_path(archive)
        .arg("-C")
        .arg_path(dest)
        .error_msg("tar failed. Install: sudo apt install tar xz-utils")
        .run()?;
    Ok(())
}

/// Regular files below `root`, as paths relative to it.
fn collect_files(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let child = rel.join(entry.file_name());
        if file_type.is_dir() {
            collect_files(root, &child, out)?;
        } else if file_type.is_file() {
            out.push(child);
        }
    }
    Ok(())
}

/// Copy everything below a `runtime/` component into `runtime_dir`.
fn install_runtime_tree(root: &Path, files: &[PathBuf], runtime_dir: &Path) -> Result<usize> {
    let mut count = 0;
    for rel in files {
        let parts: Vec<_> = rel.components().collect();
        let Some(idx) = parts.iter().position(|c| c.as_os_str() == "runtime") else {
            continue;
        };
        let inner: PathBuf = parts[idx + 1..].iter().collect();
        if inner.as_os_str().is_empty() {
            continue;
        }
        let dst = runtime_dir.join(&inner);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(root.join(rel), &dst)
            .with_context(|| format!("Failed to install runtime file {}", inner.display()))?;
        count += 1;
    }
    Ok(count)
}
