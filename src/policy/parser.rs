//! Line-oriented parsers for ACL (`.conf`) and passwd (`.passwd`) files.
//!
//! ACL syntax is strict: an unknown directive or a malformed `url` line
//! fails the whole file with the offending line number. Passwd records
//! are lenient: a malformed record is skipped and the rest still load.

use super::acl::{Acl, AclEntry, MethodMatch};
use super::credentials::{UserEntry, PASSWORD_HASH_LEN};
use crate::error::PolicyError;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Why a single `url` directive was rejected, before line context is
/// attached.
#[derive(Error, Debug)]
pub enum EntryError {
    #[error("wrong number of fields (expecting 2 or 3)")]
    FieldCount,

    #[error("expecting entry to start with 'url'")]
    NotUrl,

    #[error("empty method list")]
    NoMethods,

    #[error("invalid url pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl EntryError {
    fn at_line(self, line: usize) -> PolicyError {
        match self {
            EntryError::Pattern(source) => PolicyError::Pattern { line, source },
            other => PolicyError::Syntax {
                line,
                message: other.to_string(),
            },
        }
    }
}

impl AclEntry {
    /// Build an entry from the whitespace-split fields of a `url` line:
    /// `["url", pattern]` or `["url", "GET,POST", pattern]`.
    pub fn from_words(words: &[&str]) -> Result<Self, EntryError> {
        let (methods, pattern) = match words {
            [directive, ..] if *directive != "url" => return Err(EntryError::NotUrl),
            [_, pattern] => (MethodMatch::Any, *pattern),
            [_, methods, pattern] => {
                let methods: Vec<String> = methods
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                if methods.is_empty() {
                    return Err(EntryError::NoMethods);
                }
                (MethodMatch::Only(methods), *pattern)
            }
            _ => return Err(EntryError::FieldCount),
        };

        Ok(Self {
            methods,
            pattern: Regex::new(pattern)?,
        })
    }
}

/// Parse the contents of one `.conf` file into an [`Acl`].
pub fn parse_acl(text: &str) -> Result<Acl, PolicyError> {
    let mut acl = Acl::default();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match words[0] {
            "from" => acl.from.extend(words[1..].iter().map(|w| w.to_string())),
            "url" => {
                let entry = AclEntry::from_words(&words).map_err(|e| e.at_line(line_no))?;
                acl.entries.push(entry);
            }
            "bypass" => acl.bypass.extend(words[1..].iter().map(|w| w.to_string())),
            other => {
                return Err(PolicyError::Syntax {
                    line: line_no,
                    message: format!("unknown directive {other:?}"),
                })
            }
        }
    }

    Ok(acl)
}

/// Parse the contents of one `.passwd` file. Records without a colon, with
/// an empty username, or whose hash is not 64 hex characters are skipped.
pub fn parse_passwd(text: &str) -> Vec<UserEntry> {
    let mut users = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((username, hash)) = line.split_once(':') else {
            warn!(line = index + 1, "Skipping passwd record without ':'");
            continue;
        };
        if username.is_empty()
            || hash.len() != PASSWORD_HASH_LEN
            || !hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            warn!(line = index + 1, "Skipping malformed passwd record");
            continue;
        }

        users.push(UserEntry {
            username: username.to_string(),
            password_hash: hash.to_ascii_lowercase(),
        });
    }

    users
}
