//! In-memory cache of issued leaf certificates.
//!
//! Entries are keyed by a digest of the sorted hostname set and never
//! evicted. Each key holds a single-producer cell: when several
//! connections ask for the same cold key at once, one of them generates
//! the certificate and the rest wait for its result.

use crate::error::SigningError;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Folded into every cache key. Bump it whenever the shape of issued
/// certificates changes so stale entries stop matching.
pub const SIGNER_VERSION: &str = ":intercept1";

/// Order-independent digest of a hostname set plus a version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn for_hosts<S: AsRef<str>>(hosts: &[S]) -> Self {
        Self::with_version(hosts, SIGNER_VERSION)
    }

    pub fn with_version<S: AsRef<str>>(hosts: &[S], version: &str) -> Self {
        let mut sorted: Vec<&str> = hosts.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for host in sorted {
            hasher.update(host.as_bytes());
            hasher.update(b",");
        }
        hasher.update(version.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A signed leaf with its private key. The chain is `[leaf, ca]`.
pub struct CachedCertificate {
    chain: Vec<CertificateDer<'static>>,
    chain_pem: String,
    key: PrivatePkcs8KeyDer<'static>,
}

impl CachedCertificate {
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        chain_pem: String,
        key: PrivatePkcs8KeyDer<'static>,
    ) -> Self {
        Self {
            chain,
            chain_pem,
            key,
        }
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    /// The chain as concatenated PEM blocks, leaf first.
    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key.clone_key())
    }

    /// Build a server-side TLS config presenting this certificate.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, SigningError> {
        let config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| SigningError::TlsConfig(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(self.chain.clone(), self.private_key())
            .map_err(|e| SigningError::TlsConfig(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub issued: u64,
}

type Slot = Arc<OnceCell<Arc<CachedCertificate>>>;

#[derive(Default)]
pub struct CertCache {
    entries: DashMap<CacheKey, Slot>,
    hits: AtomicU64,
    misses: AtomicU64,
    issued: AtomicU64,
}

impl CertCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedCertificate>> {
        self.entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Return the certificate stored under `key`, running `issue` to create
    /// it if there is none. Concurrent callers for the same key share one
    /// run of `issue`. If `issue` fails nothing is stored.
    pub fn get_or_try_insert_with<F>(
        &self,
        key: CacheKey,
        issue: F,
    ) -> Result<Arc<CachedCertificate>, SigningError>
    where
        F: FnOnce() -> Result<CachedCertificate, SigningError>,
    {
        if let Some(cert) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cert);
        }

        // Clone the slot out so no shard lock is held while issuing.
        let slot: Slot = Arc::clone(&self.entries.entry(key).or_default());

        let mut produced = false;
        let result = slot.get_or_try_init(|| {
            produced = true;
            issue().map(Arc::new)
        });

        match result {
            Ok(cert) => {
                if produced {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.issued.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Arc::clone(cert))
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.entries
                    .remove_if(&key, |_, s| Arc::ptr_eq(s, &slot) && s.get().is_none());
                Err(e)
            }
        }
    }

    /// Store `cert` under `key`, replacing any existing entry.
    pub fn insert(&self, key: CacheKey, cert: CachedCertificate) -> Arc<CachedCertificate> {
        let cert = Arc::new(cert);
        self.entries
            .insert(key, Arc::new(OnceCell::with_value(Arc::clone(&cert))));
        cert
    }

    /// Number of issued certificates held.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            issued: self.issued.load(Ordering::Relaxed),
        }
    }
}
