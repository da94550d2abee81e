//! Error taxonomy for the node (spec §7).
//!
//! Each subsystem gets its own enum so callers can match on *kind*, not on
//! string content — the Dispatcher in particular needs to tell "not for me"
//! (`DecryptionError`) apart from "forged" (`VerificationError`) apart from
//! "garbage" (`DecodingError`).

use thiserror::Error;

/// Errors from [`crate::keystore::KeyStore`].
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("i/o error accessing key files: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to generate RSA key pair: {0}")]
    Generate(String),

    #[error("stored key material is not valid PEM: {0}")]
    InvalidPem(String),
}

/// Errors from [`crate::crypto::MessageCrypto`] (spec §4.3, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Recipient key bytes could not be parsed as a PEM public key.
    #[error("invalid recipient key")]
    InvalidRecipient,

    /// Proof-of-work check failed.
    #[error("proof of work invalid")]
    PowError,

    /// Structural/parse failure on envelope fields (hex, JSON, PEM).
    #[error("malformed envelope: {0}")]
    DecodingError(String),

    /// Cipherkey could not be unwrapped, or symmetric decryption failed.
    /// This is the "not for me" signal — callers must not treat it as
    /// forgery.
    #[error("not addressed to this key")]
    DecryptionError,

    /// Signature did not verify over the ciphertext/cipherkey.
    #[error("signature verification failed")]
    VerificationError,
}

/// Errors from [`crate::store::Store`] (spec §4.4, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("node already exists")]
    NodeAlreadyExists,
    #[error("node not found")]
    NodeNotFound,
    #[error("message already exists")]
    MessageAlreadyExists,
    #[error("ciphergram already exists")]
    CiphergramAlreadyExists,
    #[error("peer address already exists")]
    IpAddressAlreadyExists,
    #[error("peer address not found")]
    IpAddressNotFound,
    #[error("sqlite error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

/// Startup-time failures for the Supervisor (spec §7: "Fatal conditions are
/// limited to Store schema creation failure at startup"). Everything past
/// startup is handled per-packet as drop/no-op, never propagated here.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("failed to open key store: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to set up tls: {0}")]
    Tls(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
