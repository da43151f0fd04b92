use intercept_proxy::error::SigningError;
use intercept_proxy::tls::{
    Actions, CertAuthority, ConnectKind, LeafKeyAlgorithm, SignerOptions, DEFAULT_ORGANIZATION,
};
use std::net::IpAddr;
use std::sync::Arc;
use tempfile::TempDir;
use x509_parser::prelude::*;

fn ecdsa_options() -> SignerOptions {
    SignerOptions {
        leaf_key: LeafKeyAlgorithm::EcdsaP256,
        ..Default::default()
    }
}

fn test_authority() -> CertAuthority {
    CertAuthority::generate("Intercept Test Root", ecdsa_options()).unwrap()
}

fn parse(der: &[u8]) -> X509Certificate<'_> {
    let (rest, cert) = X509Certificate::from_der(der).unwrap();
    assert!(rest.is_empty());
    cert
}

fn san_sets(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<IpAddr>) {
    let san = cert
        .subject_alternative_name()
        .unwrap()
        .expect("leaf has no SAN extension");

    let mut dns = Vec::new();
    let mut ips = Vec::new();
    for name in &san.value.general_names {
        match name {
            GeneralName::DNSName(host) => dns.push(host.to_string()),
            GeneralName::IPAddress(bytes) => match bytes.len() {
                4 => ips.push(IpAddr::from(<[u8; 4]>::try_from(*bytes).unwrap())),
                16 => ips.push(IpAddr::from(<[u8; 16]>::try_from(*bytes).unwrap())),
                n => panic!("unexpected IP SAN length {n}"),
            },
            other => panic!("unexpected SAN {other:?}"),
        }
    }
    (dns, ips)
}

#[test]
fn test_repeat_sign_is_byte_identical() {
    let ca = test_authority();
    let first = ca.sign_host(&["example.com"]).unwrap();
    let second = ca.sign_host(&["example.com"]).unwrap();

    assert_eq!(first.chain(), second.chain());
    assert_eq!(
        first.private_key().secret_der(),
        second.private_key().secret_der()
    );
    assert_eq!(ca.cache().metrics().issued, 1);
    assert_eq!(ca.cache().metrics().hits, 1);
}

#[test]
fn test_host_order_does_not_matter() {
    let ca = test_authority();
    let ab = ca.sign_host(&["a.com", "b.com"]).unwrap();
    let ba = ca.sign_host(&["b.com", "a.com"]).unwrap();

    assert!(Arc::ptr_eq(&ab, &ba));
    assert_eq!(ca.cache().len(), 1);
}

#[test]
fn test_leaf_contents() {
    let ca = test_authority();
    let hosts = ["www.example.com", "10.1.2.3", "example.com", "::1"];
    let issued = ca.sign_host(&hosts).unwrap();

    assert_eq!(issued.chain().len(), 2);
    assert_eq!(&issued.chain()[1], ca.ca_cert_der());

    let leaf = parse(issued.leaf());
    let root = parse(ca.ca_cert_der());

    let (mut dns, mut ips) = san_sets(&leaf);
    dns.sort();
    ips.sort();
    assert_eq!(dns, vec!["example.com", "www.example.com"]);
    assert_eq!(
        ips,
        vec![
            "10.1.2.3".parse::<IpAddr>().unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        ]
    );

    // Common name is the last DNS name in request order.
    let cn = leaf.subject().iter_common_name().last().unwrap();
    assert_eq!(cn.as_str().unwrap(), "example.com");
    let org = leaf.subject().iter_organization().next().unwrap();
    assert_eq!(org.as_str().unwrap(), DEFAULT_ORGANIZATION);

    assert_eq!(leaf.issuer().as_raw(), root.subject().as_raw());
    leaf.verify_signature(Some(root.public_key())).unwrap();

    let defaults = SignerOptions::default();
    assert_eq!(leaf.validity().not_before.timestamp(), 0);
    assert_eq!(
        leaf.validity().not_after.timestamp(),
        defaults.not_after.unix_timestamp()
    );

    assert!(!leaf.is_ca());
    let eku = leaf.extended_key_usage().unwrap().unwrap();
    assert!(eku.value.server_auth);
    let ku = leaf.key_usage().unwrap().unwrap();
    assert!(ku.value.digital_signature());
    assert!(ku.value.key_encipherment());
}

#[test]
fn test_ip_only_leaf_has_no_common_name() {
    let ca = test_authority();
    let issued = ca.sign_host(&["192.0.2.10"]).unwrap();
    let leaf = parse(issued.leaf());

    assert!(leaf.subject().iter_common_name().next().is_none());
    let (dns, ips) = san_sets(&leaf);
    assert!(dns.is_empty());
    assert_eq!(ips, vec!["192.0.2.10".parse::<IpAddr>().unwrap()]);
}

#[test]
fn test_serials_are_unique() {
    let ca = test_authority();
    let a = ca.sign_host(&["a.example"]).unwrap();
    let b = ca.sign_host(&["b.example"]).unwrap();

    let a = parse(a.leaf());
    let b = parse(b.leaf());
    assert_ne!(a.raw_serial(), b.raw_serial());
    assert!(a.raw_serial().len() >= 16);
}

#[test]
fn test_default_leaf_key_is_rsa_2048() {
    let ca = CertAuthority::generate("Intercept Test Root", SignerOptions::default()).unwrap();
    let issued = ca.sign_host(&["rsa.example"]).unwrap();
    let leaf = parse(issued.leaf());

    match leaf.public_key().parsed().unwrap() {
        x509_parser::public_key::PublicKey::RSA(rsa) => assert_eq!(rsa.key_size(), 2048),
        other => panic!("expected RSA key, got {other:?}"),
    }
    issued.server_config().unwrap();
}

#[test]
fn test_custom_validity_window() {
    let options = SignerOptions {
        not_before: rcgen::date_time_ymd(2024, 1, 1),
        not_after: rcgen::date_time_ymd(2025, 1, 1),
        organization: "Example Corp Inspection".to_string(),
        ..ecdsa_options()
    };
    let ca = CertAuthority::generate("Intercept Test Root", options.clone()).unwrap();
    let leaf_der = ca.sign_host(&["example.com"]).unwrap();
    let leaf = parse(leaf_der.leaf());

    assert_eq!(
        leaf.validity().not_before.timestamp(),
        options.not_before.unix_timestamp()
    );
    assert_eq!(
        leaf.validity().not_after.timestamp(),
        options.not_after.unix_timestamp()
    );
    let org = leaf.subject().iter_organization().next().unwrap();
    assert_eq!(org.as_str().unwrap(), "Example Corp Inspection");
}

#[test]
fn test_reloaded_ca_signs_verifiable_leaves() {
    let temp_dir = TempDir::new().unwrap();
    let cert_path = temp_dir.path().join("ca.crt");
    let key_path = temp_dir.path().join("ca.key");
    test_authority().write_pem(&cert_path, &key_path).unwrap();

    let ca = CertAuthority::from_files(&cert_path, &key_path, ecdsa_options()).unwrap();
    let issued = ca.sign_host(&["reloaded.example"]).unwrap();

    let root = parse(ca.ca_cert_der());
    let leaf = parse(issued.leaf());
    assert_eq!(leaf.issuer().as_raw(), root.subject().as_raw());
    leaf.verify_signature(Some(root.public_key())).unwrap();
}

#[test]
fn test_signing_failure_leaves_cache_untouched() {
    let ca = test_authority();
    ca.sign_host(&["ok.example"]).unwrap();

    let result = ca.sign_host(&["ok.example", ""]);
    assert!(matches!(result, Err(SigningError::InvalidHostname(_))));
    assert_eq!(ca.cache().len(), 1);
}

#[test]
fn test_concurrent_cold_requests_share_one_leaf() {
    let ca = Arc::new(test_authority());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ca = Arc::clone(&ca);
            std::thread::spawn(move || ca.sign_host(&["burst.example"]).unwrap())
        })
        .collect();

    let certs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(certs.iter().all(|c| Arc::ptr_eq(c, &certs[0])));
    assert_eq!(ca.cache().metrics().issued, 1);
}

#[tokio::test]
async fn test_connect_callback_strips_port() {
    let ca = Arc::new(test_authority());
    let actions = Actions::new(Arc::clone(&ca));

    assert_eq!(actions.reject_connect.kind(), ConnectKind::Reject);
    actions
        .mitm_connect
        .tls_config()
        .resolve_async("secure.example:443")
        .await
        .unwrap();

    // The same host without a port is a cache hit.
    let cached = ca.sign_host(&["secure.example"]).unwrap();
    let leaf = parse(cached.leaf());
    let (dns, _) = san_sets(&leaf);
    assert_eq!(dns, vec!["secure.example"]);
    assert_eq!(ca.cache().metrics().issued, 1);
}
