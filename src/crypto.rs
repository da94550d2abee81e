//! MessageCrypto (spec §4.3): the hybrid envelope scheme. Every message is
//! encrypted with a fresh, single-use Fernet key; that key is then wrapped
//! for the recipient with RSA-OAEP and the ciphertext+wrapped-key pair is
//! signed with RSA-PSS. Ported from `original_source/keys.py`'s
//! `MessageCrypto.get_ciphergram`/`get_plaintext`, which uses the same
//! OAEP(SHA-256, MGF1-SHA256) / PSS(SHA-256, MGF1-SHA256) parameters.
//!
//! Transport (spec §9) carries none of this trust: TLS is unauthenticated,
//! so every field here is what actually proves origin, confidentiality and
//! anti-flood cost. Notably the sender's identity is never a cleartext wire
//! field: it rides inside the encrypted payload, so only the intended
//! recipient — the one holding the matching private key — can ever learn
//! who sent a given envelope. A peer relaying a ciphergram it can't decrypt
//! never finds out who wrote it.

use fernet::Fernet;
use rand::rngs::OsRng;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::{Digest, Sha256};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::errors::CryptoError;
use crate::keystore;
use crate::pow;
use crate::wire::EncryptedEnvelope;

/// The inner payload carried inside the Fernet ciphertext (spec §4.3 step
/// 3): the sender's node-id alongside the plaintext, both hex-encoded so
/// this round-trips through JSON without escaping concerns.
#[derive(Serialize, Deserialize)]
struct InnerPayload {
    sender_pub_hex: String,
    plaintext_hex: String,
}

/// RSA-PSS salt length (spec §4.3 step 6: "maximum salt length"), matching
/// `original_source/securetalks/crypto.py`'s `padding.PSS.MAX_LENGTH`:
/// `key_size_bytes - hash_len - 2`.
fn max_pss_salt_len(key_size_bytes: usize) -> usize {
    key_size_bytes - Sha256::output_size() - 2
}

/// Encrypt `plaintext` for `recipient_public`, signing with `sender_private`,
/// and stamp the result with a valid proof of work. `sender_node_id` is
/// embedded in the *encrypted* inner payload, not the envelope itself, so a
/// recipient can only recover it once they've successfully decrypted.
/// `timestamp` is a caller supplied unix-seconds value so this function
/// stays free of wall-clock side effects and is trivial to test.
pub fn encrypt(
    sender_private: &RsaPrivateKey,
    sender_node_id: &str,
    recipient_public: &RsaPublicKey,
    plaintext: &str,
    timestamp: i64,
) -> Result<EncryptedEnvelope, CryptoError> {
    let mut rng = OsRng;

    let inner = InnerPayload {
        sender_pub_hex: sender_node_id.to_string(),
        plaintext_hex: hex::encode(plaintext.as_bytes()),
    };
    let inner_bytes = serde_json::to_vec(&inner)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let fernet_key = Fernet::generate_key();
    let fernet = Fernet::new(&fernet_key)
        .ok_or_else(|| CryptoError::DecodingError("generated fernet key was invalid".into()))?;
    let ciphertext_token = fernet.encrypt(&inner_bytes);

    let cipherkey_bytes = recipient_public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), fernet_key.as_bytes())
        .map_err(|_| CryptoError::InvalidRecipient)?;

    let mut to_sign = Vec::with_capacity(ciphertext_token.len() + cipherkey_bytes.len());
    to_sign.extend_from_slice(ciphertext_token.as_bytes());
    to_sign.extend_from_slice(&cipherkey_bytes);

    let salt_len = max_pss_salt_len(sender_private.size());
    let signing_key = SigningKey::<Sha256>::new_with_salt_len(sender_private.clone(), salt_len);
    let signature = signing_key.sign_with_rng(&mut rng, &to_sign);

    let mut envelope = EncryptedEnvelope {
        ciphertext: hex::encode(ciphertext_token.as_bytes()),
        cipherkey: hex::encode(cipherkey_bytes),
        signature: hex::encode(signature.to_bytes()),
        proof: 0,
        timestamp,
    };
    envelope.proof = pow::compute(&envelope.pow_input());
    Ok(envelope)
}

/// Verify and decrypt `envelope`, returning `(sender_pub_hex, plaintext)` on
/// success. Order matters (spec §4.3 decode): proof of work first (cheapest
/// check, and the one a flooding attacker fails most often), then
/// OAEP-decrypt the wrapped key with our own private key — failure here is
/// the "not for me" signal, not a malformed-message signal — then decrypt
/// the payload, then recover the sender's public key from *inside* it, and
/// only then verify the signature against that recovered key.
pub fn decrypt(
    own_private: &RsaPrivateKey,
    envelope: &EncryptedEnvelope,
) -> Result<(String, String), CryptoError> {
    if !pow::verify(&envelope.pow_input(), envelope.proof) {
        return Err(CryptoError::PowError);
    }

    let ciphertext_bytes = hex::decode(&envelope.ciphertext)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let cipherkey_bytes = hex::decode(&envelope.cipherkey)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let signature_bytes = hex::decode(&envelope.signature)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let fernet_key_bytes = own_private
        .decrypt(Oaep::new::<Sha256>(), &cipherkey_bytes)
        .map_err(|_| CryptoError::DecryptionError)?;
    let fernet_key = String::from_utf8(fernet_key_bytes)
        .map_err(|_| CryptoError::DecryptionError)?;
    let fernet =
        Fernet::new(&fernet_key).ok_or(CryptoError::DecryptionError)?;

    let ciphertext_token = String::from_utf8(ciphertext_bytes)
        .map_err(|_| CryptoError::DecryptionError)?;
    let inner_bytes = fernet
        .decrypt(&ciphertext_token)
        .map_err(|_| CryptoError::DecryptionError)?;

    let inner: InnerPayload = serde_json::from_slice(&inner_bytes)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let plaintext_bytes =
        hex::decode(&inner.plaintext_hex).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let plaintext =
        String::from_utf8(plaintext_bytes).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let sender_public = keystore::decode_public_key_hex(&inner.sender_pub_hex)
        .map_err(CryptoError::DecodingError)?;

    let mut signed = Vec::with_capacity(envelope.ciphertext.len() + envelope.cipherkey.len());
    signed.extend_from_slice(ciphertext_token.as_bytes());
    signed.extend_from_slice(&cipherkey_bytes);

    let salt_len = max_pss_salt_len(sender_public.size());
    let verifying_key = VerifyingKey::<Sha256>::new_with_salt_len(sender_public, salt_len);
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    verifying_key
        .verify(&signed, &signature)
        .map_err(|_| CryptoError::VerificationError)?;

    Ok((inner.sender_pub_hex, plaintext))
}
