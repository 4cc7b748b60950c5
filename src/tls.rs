//! Rustls client configuration for the tunnel connection (C6 Dialing).
//! Grounded on the teacher's `tunnel/client.rs::build_tls_config`
//! (webpki-roots only); extended with the OS trust store and a custom CA
//! file since `--use-system-certs`/`--ca-file` are in scope here and were
//! not needed by the teacher's fixed single-backend deployment.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::config::TlsTrust;

pub fn build_client_config(trust: TlsTrust, ca_file: Option<&Path>) -> anyhow::Result<Arc<rustls::ClientConfig>> {
    if trust == TlsTrust::NoVerify {
        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
        return Ok(Arc::new(config));
    }

    let mut roots = rustls::RootCertStore::empty();

    if let Some(path) = ca_file {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?)?;
        }
    } else if trust == TlsTrust::SystemStore {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(error = %error, "failed to load a native certificate");
        }
        for cert in native.certs {
            roots.add(cert)?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Backs `--no-ssl-verify`. Accepts any certificate; never the default.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trust_builds_without_error() {
        assert!(build_client_config(TlsTrust::Default, None).is_ok());
    }

    #[test]
    fn no_verify_builds_without_error() {
        assert!(build_client_config(TlsTrust::NoVerify, None).is_ok());
    }
}
