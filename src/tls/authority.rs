//! Certificate authority for TLS interception.
//!
//! The authority loads (or generates) a long-lived CA and issues leaf
//! certificates for the hostnames clients CONNECT to. Issued leaves are
//! cached for the life of the process; see [`super::cache`].

use super::cache::{CacheKey, CachedCertificate, CertCache};
use crate::error::{CaError, SigningError};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Subject organization on issued leaves unless configured otherwise.
pub const DEFAULT_ORGANIZATION: &str = "Intercept Proxy MITM";

/// Bytes of randomness in a leaf serial number.
const SERIAL_LEN: usize = 20;

/// Validity of a CA created by [`CertAuthority::generate`].
const GENERATED_CA_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeafKeyAlgorithm {
    #[default]
    Rsa2048,
    EcdsaP256,
}

/// How leaf certificates are shaped.
#[derive(Debug, Clone)]
pub struct SignerOptions {
    pub organization: String,
    pub leaf_key: LeafKeyAlgorithm,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Default for SignerOptions {
    /// Leaves valid from the Unix epoch until the end of 2049. Only suitable
    /// for a CA that clients trust locally.
    fn default() -> Self {
        Self {
            organization: DEFAULT_ORGANIZATION.to_string(),
            leaf_key: LeafKeyAlgorithm::default(),
            not_before: OffsetDateTime::UNIX_EPOCH,
            not_after: rcgen::date_time_ymd(2049, 12, 31),
        }
    }
}

pub struct CertAuthority {
    /// The CA as rcgen needs it to act as issuer.
    issuer: Certificate,
    issuer_key: KeyPair,
    /// The CA exactly as loaded; this is what goes out in chains.
    ca_der: CertificateDer<'static>,
    ca_pem: String,
    options: SignerOptions,
    cache: Arc<CertCache>,
}

impl CertAuthority {
    /// Load a CA from PEM-encoded certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str, options: SignerOptions) -> Result<Self, CaError> {
        let ca_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::InvalidCertificate("no certificate found in PEM".into()))?
            .map_err(|e| CaError::InvalidCertificate(e.to_string()))?;

        let issuer_key =
            KeyPair::from_pem(key_pem).map_err(|e| CaError::InvalidKey(e.to_string()))?;

        // rcgen signs with an issuer Certificate; rebuild one from the parsed
        // CA so issuer name and key identifier match the original.
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CaError::InvalidCertificate(e.to_string()))?;
        let issuer = params
            .self_signed(&issuer_key)
            .map_err(|e| CaError::InvalidCertificate(e.to_string()))?;

        Ok(Self {
            issuer,
            issuer_key,
            ca_der,
            ca_pem: cert_pem.to_string(),
            options,
            cache: Arc::new(CertCache::new()),
        })
    }

    /// Load a CA from PEM files on disk.
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        options: SignerOptions,
    ) -> Result<Self, CaError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        info!("Loading CA certificate from {:?}", cert_path);

        let cert_pem = read_pem(cert_path)?;
        let key_pem = read_pem(key_path)?;
        Self::from_pem(&cert_pem, &key_pem, options)
    }

    /// Generate a new self-signed CA.
    pub fn generate(common_name: &str, options: SignerOptions) -> Result<Self, CaError> {
        info!(common_name, "Generating new CA certificate");

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, options.organization.as_str());
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(GENERATED_CA_VALIDITY_DAYS);

        let issuer_key = KeyPair::generate().map_err(|e| CaError::Generation(e.to_string()))?;
        let issuer = params
            .self_signed(&issuer_key)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        Ok(Self {
            ca_der: issuer.der().clone(),
            ca_pem: issuer.pem(),
            issuer,
            issuer_key,
            options,
            cache: Arc::new(CertCache::new()),
        })
    }

    /// Write the CA certificate and key as PEM. The key file is created
    /// with mode 0600 on unix.
    pub fn write_pem(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), CaError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        fs::write(cert_path, &self.ca_pem).map_err(|source| CaError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
        write_restricted_file(key_path, &self.issuer_key.serialize_pem())?;

        info!(
            ca_cert_path = ?cert_path,
            ca_key_path = ?key_path,
            "Saved CA certificate to disk"
        );
        Ok(())
    }

    /// Use `cache` instead of the authority's own, e.g. to share one cache
    /// between authorities built from the same CA.
    pub fn with_cache(mut self, cache: Arc<CertCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_pem
    }

    pub fn ca_cert_der(&self) -> &CertificateDer<'static> {
        &self.ca_der
    }

    pub fn options(&self) -> &SignerOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<CertCache> {
        &self.cache
    }

    /// Return a leaf certificate covering `hosts`, signed by this CA.
    ///
    /// Literal IP addresses become IP SANs and everything else a DNS SAN.
    /// The subject common name is the last DNS hostname in `hosts`. Results
    /// are cached by hostname set, regardless of order.
    pub fn sign_host<S: AsRef<str>>(
        &self,
        hosts: &[S],
    ) -> Result<Arc<CachedCertificate>, SigningError> {
        if hosts.is_empty() {
            return Err(SigningError::NoHostnames);
        }

        let key = CacheKey::for_hosts(hosts);
        let mut issued = false;
        let cert = self.cache.get_or_try_insert_with(key, || {
            issued = true;
            debug!(hosts = ?host_list(hosts), "Generating new leaf certificate");
            self.issue(hosts)
        })?;
        if !issued {
            debug!(hosts = ?host_list(hosts), "Using cached certificate");
        }
        Ok(cert)
    }

    fn issue<S: AsRef<str>>(&self, hosts: &[S]) -> Result<CachedCertificate, SigningError> {
        let mut params = CertificateParams::default();
        params.serial_number = Some(random_serial());
        params.not_before = self.options.not_before;
        params.not_after = self.options.not_after;

        let mut common_name = None;
        let mut seen = HashSet::new();
        for host in hosts.iter().map(AsRef::as_ref) {
            if !seen.insert(host) {
                continue;
            }
            if let Ok(ip) = host.parse::<IpAddr>() {
                params.subject_alt_names.push(SanType::IpAddress(ip));
            } else {
                if host.is_empty() {
                    return Err(SigningError::InvalidHostname(host.to_string()));
                }
                params.subject_alt_names.push(SanType::DnsName(
                    host.to_string()
                        .try_into()
                        .map_err(|_| SigningError::InvalidHostname(host.to_string()))?,
                ));
                common_name = Some(host);
            }
        }

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, self.options.organization.as_str());
        if let Some(cn) = common_name {
            dn.push(DnType::CommonName, cn);
        }
        params.distinguished_name = dn;

        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;

        let leaf_key = generate_leaf_key(self.options.leaf_key)?;
        let leaf = params
            .signed_by(&leaf_key, &self.issuer, &self.issuer_key)
            .map_err(|e| SigningError::Signing(e.to_string()))?;

        let mut chain_pem = leaf.pem();
        chain_pem.push_str(&self.ca_pem);
        if !chain_pem.ends_with('\n') {
            chain_pem.push('\n');
        }

        Ok(CachedCertificate::new(
            vec![leaf.der().clone(), self.ca_der.clone()],
            chain_pem,
            PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        ))
    }
}

fn generate_leaf_key(algorithm: LeafKeyAlgorithm) -> Result<KeyPair, SigningError> {
    let alg = match algorithm {
        LeafKeyAlgorithm::Rsa2048 => &rcgen::PKCS_RSA_SHA256,
        LeafKeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
    };
    KeyPair::generate_for(alg).map_err(|e| SigningError::KeyGeneration(e.to_string()))
}

/// A random positive 160-bit serial. Panics if the OS RNG is unavailable;
/// there is no safe way to keep issuing certificates without entropy.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    SerialNumber::from_slice(&bytes)
}

fn host_list<S: AsRef<str>>(hosts: &[S]) -> Vec<&str> {
    hosts.iter().map(AsRef::as_ref).collect()
}

fn read_pem(path: &Path) -> Result<String, CaError> {
    fs::read_to_string(path).map_err(|source| CaError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn write_restricted_file(path: &Path, content: &str) -> Result<(), CaError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let io_err = |source: std::io::Error| CaError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)
}

#[cfg(not(unix))]
fn write_restricted_file(path: &Path, content: &str) -> Result<(), CaError> {
    fs::write(path, content).map_err(|source| CaError::Io {
        path: path.to_path_buf(),
        source,
    })
}
