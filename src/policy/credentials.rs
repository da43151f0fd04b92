//! Password verification against sha256 hashes from `.passwd` files.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of a hex-encoded sha256 digest.
pub const PASSWORD_HASH_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
    /// Lowercase hex sha256 of the password.
    pub password_hash: String,
}

/// Hex-encode the sha256 of `password`, in the form stored in passwd files.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Credential records, in load order. A username may appear more than once
/// so that old and new passwords are both accepted during rotation.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: Vec<UserEntry>,
}

impl CredentialStore {
    pub fn new(entries: Vec<UserEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[UserEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = UserEntry>) {
        self.entries.extend(entries);
    }

    pub fn credentials_are_valid(&self, username: &str, password: &str) -> bool {
        let digest = Sha256::digest(password.as_bytes());
        self.entries
            .iter()
            .filter(|entry| entry.username == username)
            .any(|entry| match hex::decode(&entry.password_hash) {
                Ok(stored) => bool::from(stored.as_slice().ct_eq(digest.as_slice())),
                Err(_) => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // $ echo -n "foo" | shasum -a 256
    const FOO_HASH: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    fn user(username: &str, hash: &str) -> UserEntry {
        UserEntry {
            username: username.to_string(),
            password_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_hash_password() {
        assert_eq!(hash_password("foo"), FOO_HASH);
        assert_eq!(hash_password("foo").len(), PASSWORD_HASH_LEN);
    }

    #[test]
    fn test_check_credentials() {
        let store = CredentialStore::new(vec![user("foo", FOO_HASH)]);
        assert!(store.credentials_are_valid("foo", "foo"));
        assert!(!store.credentials_are_valid("foo", "bar"));
        assert!(!store.credentials_are_valid("bar", "bar"));
        assert!(!store.credentials_are_valid("bar", "foo"));
        assert!(!store.credentials_are_valid("foo", ""));
    }

    #[test]
    fn test_rotated_credentials() {
        let store = CredentialStore::new(vec![
            user("foo", &hash_password("old-secret")),
            user("foo", &hash_password("new-secret")),
        ]);
        assert!(store.credentials_are_valid("foo", "old-secret"));
        assert!(store.credentials_are_valid("foo", "new-secret"));
        assert!(!store.credentials_are_valid("foo", "other"));
    }

    #[test]
    fn test_undecodable_hash_is_a_non_match() {
        let bad = "zz".repeat(32);
        let store = CredentialStore::new(vec![user("foo", &bad)]);
        assert!(!store.credentials_are_valid("foo", "foo"));

        // A broken record does not hide a valid one for the same user.
        let store = CredentialStore::new(vec![user("foo", &bad), user("foo", FOO_HASH)]);
        assert!(store.credentials_are_valid("foo", "foo"));
    }

    #[test]
    fn test_short_hash_never_matches() {
        let store = CredentialStore::new(vec![user("foo", &FOO_HASH[..62])]);
        assert!(!store.credentials_are_valid("foo", "foo"));
    }
}
