//! KeyStore (spec §4.1): load-or-generate the node's long-lived RSA key
//! pair and derive the canonical node-id.
//!
//! Mirrors `original_source/keys.py`'s `KeysProvider`: PKCS#1 PEM for the
//! private key ("TraditionalOpenSSL" format), SubjectPublicKeyInfo PEM for
//! the public key. Files are written atomically (temp file + rename) so a
//! crash mid-write can't leave one file updated and the other stale.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::errors::KeyStoreError;

const KEY_BITS: usize = 2048;
const PUBLIC_EXPONENT: u64 = 65537;

/// Holds the node's RSA key pair. The private key never leaves this type;
/// other components only ever see `public_key`/`public_key_hex`.
pub struct KeyStore {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_hex: String,
}

impl KeyStore {
    /// Load `pub.pem`/`prv.pem` from `data_dir`, generating and persisting a
    /// fresh key pair if either is missing.
    pub fn open(data_dir: &Path) -> Result<KeyStore, KeyStoreError> {
        let pub_path = data_dir.join("pub.pem");
        let prv_path = data_dir.join("prv.pem");

        let (public_key, private_key) = match Self::load(&pub_path, &prv_path) {
            Ok(keys) => keys,
            Err(_) => {
                let keys = Self::generate()?;
                Self::store(&pub_path, &prv_path, &keys.0, &keys.1)?;
                keys
            }
        };

        let public_key_hex = Self::encode_public_key_hex(&public_key)?;

        Ok(KeyStore {
            private_key,
            public_key,
            public_key_hex,
        })
    }

    fn load(
        pub_path: &Path,
        prv_path: &Path,
    ) -> Result<(RsaPublicKey, RsaPrivateKey), KeyStoreError> {
        if !pub_path.exists() || !prv_path.exists() {
            return Err(KeyStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "key files absent",
            )));
        }
        let pub_pem = fs::read_to_string(pub_path)?;
        let prv_pem = fs::read_to_string(prv_path)?;

        let public_key = RsaPublicKey::from_public_key_pem(&pub_pem)
            .map_err(|e| KeyStoreError::InvalidPem(e.to_string()))?;
        let private_key = RsaPrivateKey::from_pkcs1_pem(&prv_pem)
            .map_err(|e| KeyStoreError::InvalidPem(e.to_string()))?;

        Ok((public_key, private_key))
    }

    fn generate() -> Result<(RsaPublicKey, RsaPrivateKey), KeyStoreError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new_with_exp(
            &mut rng,
            KEY_BITS,
            &rsa::BigUint::from(PUBLIC_EXPONENT),
        )
        .map_err(|e| KeyStoreError::Generate(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok((public_key, private_key))
    }

    fn store(
        pub_path: &Path,
        prv_path: &Path,
        public_key: &RsaPublicKey,
        private_key: &RsaPrivateKey,
    ) -> Result<(), KeyStoreError> {
        let pub_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Generate(e.to_string()))?;
        let prv_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Generate(e.to_string()))?;

        atomic_write(pub_path, pub_pem.as_bytes())?;
        atomic_write(prv_path, prv_pem.as_bytes())?;
        Ok(())
    }

    fn encode_public_key_hex(public_key: &RsaPublicKey) -> Result<String, KeyStoreError> {
        encode_public_key_hex(public_key).map_err(KeyStoreError::Generate)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// The canonical node-id: lowercase hex of the SubjectPublicKeyInfo PEM.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), KeyStoreError> {
    let tmp_path: PathBuf = path.with_extension("pem.tmp");
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Parse a node-id (hex-encoded SubjectPublicKeyInfo PEM) into an RSA
/// public key. Shared by [`crate::crypto`] for both directions.
pub fn decode_public_key_hex(hex_str: &str) -> Result<RsaPublicKey, String> {
    let pem_bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    let pem = String::from_utf8(pem_bytes).map_err(|e| e.to_string())?;
    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| e.to_string())
}

/// The inverse of [`decode_public_key_hex`]: a node's canonical id.
pub fn encode_public_key_hex(public_key: &RsaPublicKey) -> Result<String, String> {
    let pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| e.to_string())?;
    Ok(hex::encode(pem.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_on_first_open() {
        let dir = tempdir().unwrap();
        let ks = KeyStore::open(dir.path()).unwrap();
        assert!(dir.path().join("pub.pem").exists());
        assert!(dir.path().join("prv.pem").exists());
        assert!(!ks.public_key_hex().is_empty());
    }

    #[test]
    fn reloads_same_identity_on_second_open() {
        let dir = tempdir().unwrap();
        let first = KeyStore::open(dir.path()).unwrap();
        let second = KeyStore::open(dir.path()).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }

    #[test]
    fn node_id_round_trips_through_decode() {
        let dir = tempdir().unwrap();
        let ks = KeyStore::open(dir.path()).unwrap();
        let decoded = decode_public_key_hex(ks.public_key_hex()).unwrap();
        assert_eq!(decoded, *ks.public_key());
    }
}
