//! Hashcash-style proof of work (spec §4.2). The target formula is part of
//! the wire contract: `target = (1 << 56) / (1 + len(bytes))`, integer
//! division, matching `original_source/securetalks/proof_of_work.py`
//! (`compute_pow`/`check_pow_valid`/`compute_target`), not the stale
//! `production/proof_of_work.py` variant.

use sha2::{Digest, Sha512};

fn target_for(bytes: &[u8]) -> u64 {
    (1u64 << 56) / (1 + bytes.len() as u64)
}

fn trial_for(nonce: u64, bytes: &[u8]) -> u64 {
    let mut first = Sha512::new();
    first.update(nonce.to_be_bytes());
    first.update(bytes);
    let hash1 = first.finalize();

    let mut second = Sha512::new();
    second.update(hash1);
    let hash2 = second.finalize();

    u64::from_be_bytes(hash2[..8].try_into().expect("sha512 digest is >= 8 bytes"))
}

/// Find the smallest nonce, starting from 1, whose trial value is at or
/// below the target for `bytes`.
pub fn compute(bytes: &[u8]) -> u64 {
    let target = target_for(bytes);
    let mut nonce = 1u64;
    loop {
        if trial_for(nonce, bytes) <= target {
            return nonce;
        }
        nonce += 1;
    }
}

/// Verify that `nonce` is a valid proof of work over `bytes`.
pub fn verify(bytes: &[u8], nonce: u64) -> bool {
    trial_for(nonce, bytes) <= target_for(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_proof_always_verifies() {
        for msg in [&b""[..], b"hello world", b"a longer message to throttle flooding"] {
            let nonce = compute(msg);
            assert!(verify(msg, nonce));
        }
    }

    #[test]
    fn tampering_with_nonce_invalidates_it() {
        let msg = b"hello world";
        let nonce = compute(msg);
        assert!(!verify(msg, nonce.wrapping_add(1)));
    }

    #[test]
    fn target_matches_spec_formula() {
        assert_eq!(target_for(b""), (1u64 << 56) / 1);
        assert_eq!(target_for(b"hello world"), (1u64 << 56) / 12);
    }
}
