//! Throwaway certificate for the listener's TLS port.

use anyhow::{Context, Result};
use rcgen::{CertificateParams, DnType, KeyPair};
use tracing::debug;

/// Generate a self-signed certificate covering `names`.
///
/// Returns `(cert_der, key_der)`, the key as PKCS#8, ready for
/// [`crate::transport::tls::build_server_config`].
pub fn generate_self_signed_cert(names: &[String]) -> Result<(Vec<u8>, Vec<u8>)> {
    let key_pair = KeyPair::generate().context("failed to generate listener key pair")?;

    let mut params =
        CertificateParams::new(names.to_vec()).context("failed to create certificate params")?;
    params
        .distinguished_name
        .push(DnType::CommonName, "wsregress reference listener");

    let cert = params
        .self_signed(&key_pair)
        .context("failed to self-sign certificate")?;

    let cert_der = cert.der().to_vec();
    debug!(cert_bytes = cert_der.len(), names = ?names, "self-signed certificate generated");

    Ok((cert_der, key_pair.serialize_der()))
}

/// Subject names for a listener bound to `host`.
pub fn subject_names(host: &str) -> Vec<String> {
    let mut names = vec!["localhost".to_string()];
    if host != "localhost" && !host.is_empty() {
        names.push(host.to_string());
    }
    names
}
