//! Access control lists.
//!
//! An [`Acl`] grants a set of users access to the URLs matched by its
//! entries. Entries are tried in order; a request is permitted by an ACL
//! when the user is listed in `from` and at least one entry matches both
//! the method and the URL.

use regex::Regex;

/// Which request methods an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatch {
    /// `url <regex>`: every method.
    Any,
    /// `url GET,POST <regex>`: only the listed methods. Never empty.
    Only(Vec<String>),
}

impl MethodMatch {
    pub fn matches(&self, method: &str) -> bool {
        match self {
            MethodMatch::Any => true,
            MethodMatch::Only(methods) => methods.iter().any(|m| m == method),
        }
    }
}

/// A single `url` rule.
#[derive(Debug, Clone)]
pub struct AclEntry {
    pub methods: MethodMatch,
    /// Searched anywhere in the URL unless the pattern anchors itself.
    pub pattern: Regex,
}

impl AclEntry {
    pub fn all_methods(&self) -> bool {
        matches!(self.methods, MethodMatch::Any)
    }

    /// The explicit method list; empty when the entry covers all methods.
    pub fn methods(&self) -> &[String] {
        match &self.methods {
            MethodMatch::Any => &[],
            MethodMatch::Only(methods) => methods,
        }
    }

    pub fn matches(&self, method: &str, url: &str) -> bool {
        self.methods.matches(method) && self.pattern.is_match(url)
    }
}

/// Rules parsed from a single `.conf` file.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    /// Usernames this ACL applies to, compared exactly.
    pub from: Vec<String>,
    pub entries: Vec<AclEntry>,
    /// `host:port` targets whose CONNECT tunnels are passed through
    /// without interception.
    pub bypass: Vec<String>,
}

impl Acl {
    pub fn applies_to(&self, user: &str) -> bool {
        self.from.iter().any(|u| u == user)
    }

    pub fn permits(&self, user: &str, method: &str, url: &str) -> bool {
        if !self.applies_to(user) {
            return false;
        }
        self.entries.iter().any(|e| e.matches(method, url))
    }

    pub fn bypass_mitm(&self, user: &str, host: &str) -> bool {
        self.applies_to(user) && self.bypass.iter().any(|h| h == host)
    }
}
