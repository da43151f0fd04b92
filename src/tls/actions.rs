//! Decisions handed to the proxy engine when a client sends CONNECT.

use super::authority::CertAuthority;
use crate::error::SigningError;
use crate::policy::PolicyStore;
use rustls::ServerConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with a CONNECT tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    /// Splice the tunnel through without looking inside.
    Accept,
    /// Terminate TLS and inspect the traffic inside.
    Mitm,
    /// Terminate TLS and proxy the plaintext as HTTP requests.
    HttpMitm,
    /// Refuse the tunnel.
    Reject,
}

/// Remove a trailing `:port`. Bracketed IPv6 literals lose their brackets;
/// bare IPv6 literals are returned unchanged.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => host,
        };
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// Produces the TLS server config presented to a client for a given
/// CONNECT target.
#[derive(Clone)]
pub struct TlsConfigCallback {
    authority: Arc<CertAuthority>,
}

impl TlsConfigCallback {
    pub fn new(authority: Arc<CertAuthority>) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &Arc<CertAuthority> {
        &self.authority
    }

    /// Sign (or fetch from cache) a certificate for `host` and wrap it in a
    /// server config. An error here should fail only this handshake.
    pub fn resolve(&self, host: &str) -> Result<Arc<ServerConfig>, SigningError> {
        let hostname = strip_port(host);
        debug!(host = hostname, "Signing for host");

        let cert = self.authority.sign_host(&[hostname]).map_err(|e| {
            warn!(host = hostname, error = %e, "Cannot sign host certificate with provided CA");
            e
        })?;
        cert.server_config()
    }

    /// [`resolve`](Self::resolve) on the blocking pool, for callers on an
    /// async runtime. Key generation can take tens of milliseconds.
    pub async fn resolve_async(&self, host: &str) -> Result<Arc<ServerConfig>, SigningError> {
        let callback = self.clone();
        let host = host.to_string();
        tokio::task::spawn_blocking(move || callback.resolve(&host))
            .await
            .map_err(|e| SigningError::Task(e.to_string()))?
    }
}

#[derive(Clone)]
pub struct ConnectAction {
    kind: ConnectKind,
    tls: TlsConfigCallback,
}

impl ConnectAction {
    pub fn kind(&self) -> ConnectKind {
        self.kind
    }

    pub fn tls_config(&self) -> &TlsConfigCallback {
        &self.tls
    }

    pub fn resolve(&self, host: &str) -> Result<Arc<ServerConfig>, SigningError> {
        self.tls.resolve(host)
    }
}

/// The four CONNECT decisions, all sharing one certificate callback.
#[derive(Clone)]
pub struct Actions {
    pub ok_connect: ConnectAction,
    pub mitm_connect: ConnectAction,
    pub http_mitm_connect: ConnectAction,
    pub reject_connect: ConnectAction,
}

impl Actions {
    pub fn new(authority: Arc<CertAuthority>) -> Self {
        let tls = TlsConfigCallback::new(authority);
        let action = |kind| ConnectAction {
            kind,
            tls: tls.clone(),
        };
        Self {
            ok_connect: action(ConnectKind::Accept),
            mitm_connect: action(ConnectKind::Mitm),
            http_mitm_connect: action(ConnectKind::HttpMitm),
            reject_connect: action(ConnectKind::Reject),
        }
    }

    /// Tunnels `user` has marked for bypass are accepted untouched; all
    /// others are intercepted.
    pub fn select(&self, policy: &PolicyStore, user: &str, host: &str) -> &ConnectAction {
        if policy.bypass_mitm(user, host) {
            &self.ok_connect
        } else {
            &self.mitm_connect
        }
    }
}
