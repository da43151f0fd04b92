//! Access policy: who may fetch what, and with which credentials.
//!
//! Policy is read from a flat directory. Files ending in `.conf` each hold
//! one ACL; files ending in `.passwd` hold `username:sha256hex` records.
//! Everything else, subdirectories included, is ignored.

pub mod acl;
pub mod credentials;
pub mod parser;

pub use acl::{Acl, AclEntry, MethodMatch};
pub use credentials::{hash_password, CredentialStore, UserEntry, PASSWORD_HASH_LEN};

use crate::error::PolicyError;
use arc_swap::ArcSwap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Every ACL and user record loaded for the proxy.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    acls: Vec<Acl>,
    users: CredentialStore,
}

impl PolicyStore {
    pub fn new(acls: Vec<Acl>, users: Vec<UserEntry>) -> Self {
        Self {
            acls,
            users: CredentialStore::new(users),
        }
    }

    /// Build a fresh store from a policy directory.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let mut store = Self::default();
        store.load_directory(dir)?;
        Ok(store)
    }

    /// Append the ACLs and users found in `dir` to this store.
    ///
    /// Loading the same directory twice duplicates its contents. A failure
    /// in any file leaves the store exactly as it was.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<(), PolicyError> {
        let dir = dir.as_ref();
        let mut acls = Vec::new();
        let mut users = Vec::new();

        for path in policy_files(dir)? {
            match path.extension().and_then(|e| e.to_str()) {
                Some("conf") => {
                    let text = read_policy_file(&path)?;
                    let acl = parser::parse_acl(&text).map_err(|e| PolicyError::AclFile {
                        path: path.clone(),
                        source: Box::new(e),
                    })?;
                    debug!(path = %path.display(), entries = acl.entries.len(), "Loaded ACL");
                    acls.push(acl);
                }
                Some("passwd") => {
                    let text = read_policy_file(&path)?;
                    let records = parser::parse_passwd(&text);
                    debug!(path = %path.display(), users = records.len(), "Loaded passwd file");
                    users.extend(records);
                }
                _ => {}
            }
        }

        info!(
            dir = %dir.display(),
            acls = acls.len(),
            users = users.len(),
            "Loaded policy directory"
        );

        self.acls.extend(acls);
        self.users.extend(users);
        Ok(())
    }

    pub fn acls(&self) -> &[Acl] {
        &self.acls
    }

    pub fn users(&self) -> &CredentialStore {
        &self.users
    }

    /// True if any ACL lets `user` send `method` to `url`.
    pub fn permits(&self, user: &str, method: &str, url: &str) -> bool {
        self.acls.iter().any(|acl| acl.permits(user, method, url))
    }

    pub fn credentials_are_valid(&self, username: &str, password: &str) -> bool {
        self.users.credentials_are_valid(username, password)
    }

    /// True if any ACL for `user` lists `host` (as sent in CONNECT, usually
    /// `host:port`) as a pass-through target.
    pub fn bypass_mitm(&self, user: &str, host: &str) -> bool {
        self.acls.iter().any(|acl| acl.bypass_mitm(user, host))
    }
}

/// Regular files in `dir`, sorted by name so ACL order is stable.
fn policy_files(dir: &Path) -> Result<Vec<PathBuf>, PolicyError> {
    let io_err = |source: std::io::Error| PolicyError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn read_policy_file(path: &Path) -> Result<String, PolicyError> {
    fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A policy that can be replaced while requests are being evaluated.
///
/// Readers take a snapshot with [`SharedPolicy::load`]; a reload builds a
/// new [`PolicyStore`] off to the side and swaps it in only if every file
/// parsed.
pub struct SharedPolicy {
    current: ArcSwap<PolicyStore>,
}

impl SharedPolicy {
    pub fn new(store: PolicyStore) -> Self {
        Self {
            current: ArcSwap::from_pointee(store),
        }
    }

    pub fn load(&self) -> Arc<PolicyStore> {
        self.current.load_full()
    }

    /// Replace the published policy with the contents of `dir`. On error the
    /// previous policy stays in place.
    pub fn reload(&self, dir: impl AsRef<Path>) -> Result<Arc<PolicyStore>, PolicyError> {
        let store = Arc::new(PolicyStore::from_directory(dir)?);
        self.current.store(Arc::clone(&store));
        Ok(store)
    }

    pub fn permits(&self, user: &str, method: &str, url: &str) -> bool {
        self.current.load().permits(user, method, url)
    }

    pub fn credentials_are_valid(&self, username: &str, password: &str) -> bool {
        self.current.load().credentials_are_valid(username, password)
    }

    pub fn bypass_mitm(&self, user: &str, host: &str) -> bool {
        self.current.load().bypass_mitm(user, host)
    }
}
