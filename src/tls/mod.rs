//! Certificate issuance for TLS interception.
//!
//! A [`CertAuthority`] signs per-host leaf certificates with a CA the
//! proxy's clients trust, caching them in a [`CertCache`]. [`Actions`]
//! wraps the authority in the callbacks the proxy engine consumes when it
//! handles CONNECT.

pub mod actions;
pub mod authority;
pub mod cache;

pub use actions::{strip_port, Actions, ConnectAction, ConnectKind, TlsConfigCallback};
pub use authority::{CertAuthority, LeafKeyAlgorithm, SignerOptions, DEFAULT_ORGANIZATION};
pub use cache::{CacheKey, CacheMetricsSnapshot, CachedCertificate, CertCache, SIGNER_VERSION};
