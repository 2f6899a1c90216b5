//! SSH host key provisioning.
//!
//! Host keys live in a directory that callers are expected to mount from
//! outside the container, so a container keeps its identity across restarts.
//! The daemon configuration references the fixed `/etc/ssh/ssh_host_*_key`
//! paths; those are replaced by symlinks into the key directory.
//!
//! An algorithm counts as present when both its private and public key files
//! exist in the key directory. A private key is never regenerated or
//! overwritten once it exists; a missing public half is derived from it.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::process::Cmd;

/// Host key algorithms provisioned for the daemon.
pub const HOST_KEY_ALGORITHMS: &[&str] = &["rsa", "ecdsa", "ed25519"];

/// File name of the private key for an algorithm.
pub fn private_key_name(algorithm: &str) -> String {
    format!("ssh_host_{}_key", algorithm)
}

/// File name of the public key for an algorithm.
pub fn public_key_name(algorithm: &str) -> String {
    format!("ssh_host_{}_key.pub", algorithm)
}

/// Where a host key came from during this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvenance {
    /// Already present in the key directory.
    Persisted,
    /// Moved in from the system SSH directory.
    Adopted,
    /// Private key persisted, public key derived from it during this run.
    Restored,
    /// Generated during this run.
    Generated,
}

#[derive(Debug, Clone)]
pub struct HostKey {
    pub algorithm: &'static str,
    pub provenance: KeyProvenance,
    /// Path of the private key inside the key directory.
    pub path: PathBuf,
}

/// The active host keys, one per algorithm.
#[derive(Debug, Clone, Default)]
pub struct HostKeySet {
    pub keys: Vec<HostKey>,
}

impl HostKeySet {
    /// True when nothing had to be created.
    pub fn all_persisted(&self) -> bool {
        self.keys
            .iter()
            .all(|k| k.provenance == KeyProvenance::Persisted)
    }

    pub fn generated_count(&self) -> usize {
        self.keys
            .iter()
            .filter(|k| k.provenance == KeyProvenance::Generated)
            .count()
    }
}

/// Produces host key material.
pub trait KeyGenerator {
    /// Write a new key pair to `path` and `path.pub`.
    fn generate(&self, algorithm: &'static str, path: &Path) -> Result<()>;

    /// Public key line for the private key at `private`.
    fn derive_public(&self, algorithm: &'static str, private: &Path) -> Result<String>;
}

/// Generates keys with `ssh-keygen`.
pub struct SshKeygen {
    comment: String,
}

impl SshKeygen {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
        }
    }
}

impl KeyGenerator for SshKeygen {
    fn generate(&self, algorithm: &'static str, path: &Path) -> Result<()> {
        Cmd::new("ssh-keygen")
            .args(["-q", "-t", algorithm, "-N", "", "-C", self.comment.as_str(), "-f"])
            .arg_path(path)
            .run()
            .map_err(|e| Error::KeyGeneration {
                algorithm,
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn derive_public(&self, algorithm: &'static str, private: &Path) -> Result<String> {
        let output = Cmd::new("ssh-keygen")
            .args(["-y", "-f"])
            .arg_path(private)
            .run()
            .map_err(|e| Error::KeyGeneration {
                algorithm,
                path: private.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(output.stdout)
    }
}

/// Manages the persisted host key directory.
pub struct KeyStore<'a, G: KeyGenerator> {
    key_dir: PathBuf,
    system_dir: PathBuf,
    generator: &'a G,
}

impl<'a, G: KeyGenerator> KeyStore<'a, G> {
    pub fn new(key_dir: impl Into<PathBuf>, system_dir: impl Into<PathBuf>, generator: &'a G) -> Self {
        Self {
            key_dir: key_dir.into(),
            system_dir: system_dir.into(),
            generator,
        }
    }

    /// Make sure every algorithm has a key pair in the key directory and that
    /// the system paths point at them.
    pub fn ensure_host_keys(&self) -> Result<HostKeySet> {
        fs::create_dir_all(&self.key_dir)
            .map_err(|e| Error::io("failed to create key directory", &self.key_dir, e))?;

        let mut set = HostKeySet::default();
        for &algorithm in HOST_KEY_ALGORITHMS {
            let provenance = self.ensure_algorithm(algorithm)?;
            set.keys.push(HostKey {
                algorithm,
                provenance,
                path: self.key_dir.join(private_key_name(algorithm)),
            });
        }

        if set.all_persisted() {
            info!(dir = %self.key_dir.display(), "host keys already present, reusing");
        } else {
            info!(
                dir = %self.key_dir.display(),
                generated = set.generated_count(),
                "host keys provisioned"
            );
        }

        self.link_system_paths()?;
        Ok(set)
    }

    fn ensure_algorithm(&self, algorithm: &'static str) -> Result<KeyProvenance> {
        let private = self.key_dir.join(private_key_name(algorithm));
        let public = self.key_dir.join(public_key_name(algorithm));

        match (entry_exists(&private), entry_exists(&public)) {
            (true, _) if !private.is_file() => Err(Error::KeyGeneration {
                algorithm,
                path: private,
                reason: "existing private key is not a readable file".into(),
            }),
            (true, true) if public.is_file() => {
                debug!(algorithm, "host key present");
                Ok(KeyProvenance::Persisted)
            }
            (true, true) => Err(Error::KeyGeneration {
                algorithm,
                path: public,
                reason: "existing public key is not a readable file".into(),
            }),
            (true, false) => {
                info!(algorithm, "public host key missing, deriving it from the private key");
                let line = self.generator.derive_public(algorithm, &private)?;
                let line = line.trim();
                if line.is_empty() {
                    return Err(Error::KeyGeneration {
                        algorithm,
                        path: private,
                        reason: "no public key could be derived".into(),
                    });
                }
                fs::write(&public, format!("{}\n", line))
                    .map_err(|e| Error::io("failed to write", &public, e))?;
                set_mode(&public, 0o644)?;
                Ok(KeyProvenance::Restored)
            }
            (false, true) => Err(Error::KeyGeneration {
                algorithm,
                path: private,
                reason: "public key present without its private key; refusing to replace it".into(),
            }),
            (false, false) => {
                if self.adopt_system_key(algorithm)? {
                    info!(algorithm, "adopted host key from {}", self.system_dir.display());
                    return Ok(KeyProvenance::Adopted);
                }

                info!(algorithm, "generating host key");
                self.generator.generate(algorithm, &private)?;
                if !private.is_file() || !public.is_file() {
                    return Err(Error::KeyGeneration {
                        algorithm,
                        path: private,
                        reason: "key files missing after generation".into(),
                    });
                }
                set_mode(&private, 0o600)?;
                set_mode(&public, 0o644)?;
                Ok(KeyProvenance::Generated)
            }
        }
    }

    /// Move a key pair baked into the image into the key directory.
    fn adopt_system_key(&self, algorithm: &str) -> Result<bool> {
        if self.same_dirs() {
            return Ok(false);
        }
        let names = [private_key_name(algorithm), public_key_name(algorithm)];
        let regular = |p: &Path| {
            fs::symlink_metadata(p)
                .map(|m| m.file_type().is_file())
                .unwrap_or(false)
        };
        if !names.iter().all(|n| regular(&self.system_dir.join(n))) {
            return Ok(false);
        }

        for name in &names {
            let src = self.system_dir.join(name);
            let dst = self.key_dir.join(name);
            // rename fails across a mount boundary, copy instead
            fs::copy(&src, &dst).map_err(|e| Error::io("failed to copy host key to", &dst, e))?;
            fs::remove_file(&src).map_err(|e| Error::io("failed to remove", &src, e))?;
        }
        set_mode(&self.key_dir.join(&names[0]), 0o600)?;
        set_mode(&self.key_dir.join(&names[1]), 0o644)?;
        Ok(true)
    }

    fn link_system_paths(&self) -> Result<()> {
        if self.same_dirs() {
            return Ok(());
        }
        fs::create_dir_all(&self.system_dir)
            .map_err(|e| Error::io("failed to create", &self.system_dir, e))?;

        for &algorithm in HOST_KEY_ALGORITHMS {
            for name in [private_key_name(algorithm), public_key_name(algorithm)] {
                let target = self.key_dir.join(&name);
                let link = self.system_dir.join(&name);

                if fs::read_link(&link).ok().as_deref() == Some(target.as_path()) {
                    continue;
                }
                remove_if_present(&link)?;
                std::os::unix::fs::symlink(&target, &link)
                    .map_err(|e| Error::io("failed to link", &link, e))?;
                debug!(link = %link.display(), target = %target.display(), "linked host key");
            }
        }
        Ok(())
    }

    fn same_dirs(&self) -> bool {
        match (self.key_dir.canonicalize(), self.system_dir.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.key_dir == self.system_dir,
        }
    }
}

/// True for any directory entry, including a dangling symlink.
fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.is_symlink() || path.exists() {
        fs::remove_file(path).map_err(|e| Error::io("failed to remove", path, e))?;
    }
    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io("failed to set permissions on", path, e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Writes placeholder key files and records what it generated.
    #[derive(Default)]
    pub(crate) struct FakeKeygen {
        pub calls: RefCell<Vec<&'static str>>,
        pub fail: bool,
    }

    impl KeyGenerator for FakeKeygen {
        fn generate(&self, algorithm: &'static str, path: &Path) -> Result<()> {
            if self.fail {
                return Err(Error::KeyGeneration {
                    algorithm,
                    path: path.to_path_buf(),
                    reason: "No space left on device".into(),
                });
            }
            let n = self.calls.borrow().len();
            self.calls.borrow_mut().push(algorithm);
            fs::write(path, format!("PRIVATE {} #{}\n", algorithm, n)).unwrap();
            let mut public = path.as_os_str().to_owned();
            public.push(".pub");
            fs::write(PathBuf::from(public), format!("ssh-{} AAAA{}\n", algorithm, n)).unwrap();
            Ok(())
        }

        fn derive_public(&self, algorithm: &'static str, private: &Path) -> Result<String> {
            let body = fs::read_to_string(private).unwrap();
            Ok(format!("ssh-{} DERIVED {}\n", algorithm, body.trim()))
        }
    }

    fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .map(|e| {
                (
                    e.file_name().to_string_lossy().into_owned(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_generates_all_algorithms_into_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        let system_dir = tmp.path().join("etc-ssh");
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, &system_dir, &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(set.generated_count(), HOST_KEY_ALGORITHMS.len());
        assert_eq!(*keygen.calls.borrow(), HOST_KEY_ALGORITHMS.to_vec());
        for &alg in HOST_KEY_ALGORITHMS {
            let private = key_dir.join(private_key_name(alg));
            let mode = fs::metadata(&private).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);

            let link = system_dir.join(private_key_name(alg));
            assert_eq!(fs::read_link(&link).unwrap(), private);
            let link_pub = system_dir.join(public_key_name(alg));
            assert_eq!(fs::read_link(&link_pub).unwrap(), key_dir.join(public_key_name(alg)));
        }
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        let system_dir = tmp.path().join("etc-ssh");
        let keygen = FakeKeygen::default();
        let store = KeyStore::new(&key_dir, &system_dir, &keygen);

        store.ensure_host_keys().unwrap();
        let before = snapshot(&key_dir);

        let set = store.ensure_host_keys().unwrap();
        assert!(set.all_persisted());
        assert_eq!(keygen.calls.borrow().len(), HOST_KEY_ALGORITHMS.len());
        assert_eq!(snapshot(&key_dir), before);
    }

    #[test]
    fn test_unrelated_files_do_not_count_as_keys() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        fs::create_dir_all(&key_dir).unwrap();
        fs::write(key_dir.join("README"), "mount point").unwrap();
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(set.generated_count(), 3);
        assert_eq!(fs::read_to_string(key_dir.join("README")).unwrap(), "mount point");
    }

    #[test]
    fn test_only_missing_algorithm_is_generated() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        fs::create_dir_all(&key_dir).unwrap();
        for alg in ["rsa", "ecdsa"] {
            fs::write(key_dir.join(private_key_name(alg)), "existing").unwrap();
            fs::write(key_dir.join(public_key_name(alg)), "existing.pub").unwrap();
        }
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(*keygen.calls.borrow(), vec!["ed25519"]);
        assert_eq!(set.keys[0].provenance, KeyProvenance::Persisted);
        assert_eq!(set.keys[2].provenance, KeyProvenance::Generated);
        assert_eq!(
            fs::read_to_string(key_dir.join(private_key_name("rsa"))).unwrap(),
            "existing"
        );
    }

    #[test]
    fn test_private_key_without_public_is_kept() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        fs::create_dir_all(&key_dir).unwrap();
        let private = key_dir.join(private_key_name("ed25519"));
        fs::write(&private, "PERSISTED IDENTITY").unwrap();
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(set.keys[2].provenance, KeyProvenance::Restored);
        assert_eq!(*keygen.calls.borrow(), vec!["rsa", "ecdsa"]);
        assert_eq!(fs::read_to_string(&private).unwrap(), "PERSISTED IDENTITY");
        assert_eq!(
            fs::read_to_string(key_dir.join(public_key_name("ed25519"))).unwrap(),
            "ssh-ed25519 DERIVED PERSISTED IDENTITY\n"
        );
        let mode = fs::metadata(key_dir.join(public_key_name("ed25519")))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_public_key_without_private_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        fs::create_dir_all(&key_dir).unwrap();
        let public = key_dir.join(public_key_name("rsa"));
        fs::write(&public, "ssh-rsa ORPHAN").unwrap();
        let keygen = FakeKeygen::default();

        let err = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap_err();

        assert!(matches!(err, Error::KeyGeneration { algorithm: "rsa", .. }));
        assert!(keygen.calls.borrow().is_empty());
        assert_eq!(fs::read_to_string(&public).unwrap(), "ssh-rsa ORPHAN");
    }

    #[test]
    fn test_symlinked_pair_is_persisted() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        let secrets = tmp.path().join("secrets");
        fs::create_dir_all(&key_dir).unwrap();
        fs::create_dir_all(&secrets).unwrap();
        for name in [private_key_name("ecdsa"), public_key_name("ecdsa")] {
            fs::write(secrets.join(&name), "mounted secret").unwrap();
            std::os::unix::fs::symlink(secrets.join(&name), key_dir.join(&name)).unwrap();
        }
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(set.keys[1].provenance, KeyProvenance::Persisted);
        assert_eq!(*keygen.calls.borrow(), vec!["rsa", "ed25519"]);
        let private = key_dir.join(private_key_name("ecdsa"));
        assert!(private.is_symlink());
        assert_eq!(fs::read_to_string(&private).unwrap(), "mounted secret");
    }

    #[test]
    fn test_dangling_symlink_is_not_replaced() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        fs::create_dir_all(&key_dir).unwrap();
        let private = key_dir.join(private_key_name("rsa"));
        std::os::unix::fs::symlink(tmp.path().join("gone"), &private).unwrap();
        let keygen = FakeKeygen::default();

        let err = KeyStore::new(&key_dir, tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap_err();

        assert!(matches!(err, Error::KeyGeneration { algorithm: "rsa", .. }));
        assert!(private.is_symlink());
        assert!(keygen.calls.borrow().is_empty());
    }

    #[test]
    fn test_adopts_keys_baked_into_image() {
        let tmp = TempDir::new().unwrap();
        let key_dir = tmp.path().join("keys");
        let system_dir = tmp.path().join("etc-ssh");
        fs::create_dir_all(&system_dir).unwrap();
        fs::write(system_dir.join(private_key_name("ed25519")), "baked").unwrap();
        fs::write(system_dir.join(public_key_name("ed25519")), "baked.pub").unwrap();
        let keygen = FakeKeygen::default();

        let set = KeyStore::new(&key_dir, &system_dir, &keygen)
            .ensure_host_keys()
            .unwrap();

        assert_eq!(set.keys[2].provenance, KeyProvenance::Adopted);
        assert_eq!(*keygen.calls.borrow(), vec!["rsa", "ecdsa"]);
        assert_eq!(
            fs::read_to_string(key_dir.join(private_key_name("ed25519"))).unwrap(),
            "baked"
        );
        // the system path now resolves through the link
        assert_eq!(
            fs::read_to_string(system_dir.join(private_key_name("ed25519"))).unwrap(),
            "baked"
        );
        assert!(system_dir.join(private_key_name("ed25519")).is_symlink());
    }

    #[test]
    fn test_generation_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let keygen = FakeKeygen {
            fail: true,
            ..Default::default()
        };

        let err = KeyStore::new(tmp.path().join("keys"), tmp.path().join("etc-ssh"), &keygen)
            .ensure_host_keys()
            .unwrap_err();

        assert!(matches!(err, Error::KeyGeneration { algorithm: "rsa", .. }));
    }

    #[test]
    fn test_same_directory_skips_links() {
        let tmp = TempDir::new().unwrap();
        let keygen = FakeKeygen::default();

        KeyStore::new(tmp.path(), tmp.path(), &keygen)
            .ensure_host_keys()
            .unwrap();

        let private = tmp.path().join(private_key_name("rsa"));
        assert!(private.is_file());
        assert!(!private.is_symlink());
    }
}
