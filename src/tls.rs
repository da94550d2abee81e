//! TLS wrapping for the raw TCP transport (spec §4.5/§4.6, §9).
//!
//! The node's security model does not lean on transport authentication at
//! all — every envelope is independently signed and encrypted (spec §4.3) —
//! so TLS here exists only to get confidentiality and framing integrity on
//! the wire cheaply. Certificates are self-signed and never verified against
//! a CA, matching the original's `ssl.CERT_NONE` sender context. This is
//! adapted from a QUIC+rustls+rcgen stack onto plain blocking TCP.

use std::sync::{Arc, Once};

use rcgen::generate_simple_self_signed;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};

static INSTALL_PROVIDER: Once = Once::new();

/// `rustls` 0.23 needs a process-level `CryptoProvider` installed before any
/// `ClientConfig`/`ServerConfig` builder runs. With only the `ring` feature
/// compiled in there's exactly one candidate, but rustls still won't pick it
/// silently — every entry point into this module goes through here first.
fn ensure_crypto_provider() {
    INSTALL_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A self-signed certificate/key pair generated fresh per process. Nodes
/// don't need a stable TLS identity across restarts, only the RSA identity
/// the [`crate::keystore::KeyStore`] provides.
pub struct SelfSignedCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivateKeyDer<'static>,
}

/// Generate a self-signed certificate for `subject_alt_names` (typically
/// `["localhost"]` or the node's bind address).
pub fn generate_self_signed(subject_alt_names: Vec<String>) -> Result<SelfSignedCert, String> {
    let generated =
        generate_simple_self_signed(subject_alt_names).map_err(|e| e.to_string())?;
    let cert_der = generated.cert.der().clone();
    let key_der = PrivateKeyDer::try_from(generated.key_pair.serialize_der())
        .map_err(|e| e.to_string())?;
    Ok(SelfSignedCert { cert_der, key_der })
}

/// Build a server-side TLS config for the Listener (spec §4.5).
pub fn server_config(cert: &SelfSignedCert) -> Result<Arc<ServerConfig>, String> {
    ensure_crypto_provider();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert_der.clone()], cert.key_der.clone_key())
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(config))
}

/// Build a client-side TLS config for the Sender (spec §4.6) that accepts
/// any server certificate without verification — equivalent to the
/// original's `ssl.CERT_NONE`. Safe only because the envelope itself carries
/// its own signature and the peer's RSA public key is out-of-band knowledge.
pub fn client_config() -> Arc<ClientConfig> {
    ensure_crypto_provider();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    Arc::new(config)
}

#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Unused by [`NoVerification`] but required so a `RootCertStore` type
/// exists in scope for anyone constructing a config by hand in tests.
#[allow(dead_code)]
fn empty_root_store() -> RootCertStore {
    RootCertStore::empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_usable_cert_and_configs() {
        let cert = generate_self_signed(vec!["localhost".to_string()]).unwrap();
        let server = server_config(&cert);
        assert!(server.is_ok());
        let _client = client_config();
    }
}
