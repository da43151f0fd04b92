use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors raised while loading ACL and passwd files.
///
/// Any of these aborts the whole directory load; nothing from the failing
/// call is published.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("config error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("config error at line {line}: invalid url pattern: {source}")]
    Pattern {
        line: usize,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error in acl file {}: {source}", path.display())]
    AclFile {
        path: PathBuf,
        #[source]
        source: Box<PolicyError>,
    },
}

impl PolicyError {
    /// The 1-indexed line that caused the failure, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            PolicyError::Syntax { line, .. } | PolicyError::Pattern { line, .. } => Some(*line),
            PolicyError::AclFile { source, .. } => source.line(),
            PolicyError::Io { .. } => None,
        }
    }
}

/// Errors constructing a certificate authority. These are fatal: an
/// authority that fails here is never handed out.
#[derive(Error, Debug)]
pub enum CaError {
    #[error("Invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid CA private key: {0}")]
    InvalidKey(String),

    #[error("Failed to generate CA: {0}")]
    Generation(String),

    #[error("CA file error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors issuing a leaf certificate. Scoped to the single call that hit
/// them; the cache is left untouched.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("No hostnames to sign")]
    NoHostnames,

    #[error("Invalid hostname {0:?}")]
    InvalidHostname(String),

    #[error("Failed to generate leaf key: {0}")]
    KeyGeneration(String),

    #[error("Failed to sign leaf certificate: {0}")]
    Signing(String),

    #[error("Failed to build TLS config: {0}")]
    TlsConfig(String),

    #[error("Signing task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
