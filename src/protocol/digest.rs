//! Shared-secret challenge/response helpers.
//!
//! The host sends `digest = HMAC(secret, challenge)` together with the
//! challenge; a worker holding the same secret proves it by answering with
//! `HMAC(secret, digest)`. The MAC is HMAC-SHA1 and digests travel as
//! base64 text, which is what pipes workers compute on their side.

use crate::error::{ErrorCode, PipesError, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

fn keyed_mac(secret: &[u8], message: &str) -> Result<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(secret).map_err(|e| {
        PipesError::authentication_with_code(
            ErrorCode::AUTH_SECRET_UNAVAILABLE,
            format!("Unusable job secret: {}", e),
        )
    })?;
    mac.update(message.as_bytes());
    Ok(mac)
}

pub fn create_digest(secret: &[u8], message: &str) -> Result<String> {
    let mac = keyed_mac(secret, message)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a base64 digest against `HMAC(secret, message)`.
///
/// Text that is not base64 never verifies.
pub fn verify_digest(secret: &[u8], message: &str, digest: &str) -> Result<bool> {
    let Ok(received) = base64::engine::general_purpose::STANDARD.decode(digest) else {
        return Ok(false);
    };
    Ok(keyed_mac(secret, message)?.verify_slice(&received).is_ok())
}

/// Random challenge text: four non-negative 31-bit integers, concatenated.
pub fn generate_challenge() -> String {
    let mut rng = rand::rng();
    (0..4)
        .map(|_| rng.random_range(0..i32::MAX).to_string())
        .collect()
}

/// Fresh random secret for tasks that were not handed one by the host.
pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::rng().fill(&mut secret[..]);
    secret
}

/// Constant-time comparison of two digests.
pub fn digests_match(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

/// The pair the host sends and the answer it expects back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge: String,
    pub digest: String,
    pub expected_response: String,
}

impl Challenge {
    pub fn new(secret: &[u8]) -> Result<Self> {
        let challenge = generate_challenge();
        let digest = create_digest(secret, &challenge)?;
        let expected_response = create_digest(secret, &digest)?;
        Ok(Self {
            challenge,
            digest,
            expected_response,
        })
    }
}

/// Worker-side check: verify the host's digest and compute the answer.
pub fn answer_challenge(secret: &[u8], digest: &str, challenge: &str) -> Result<String> {
    if !verify_digest(secret, challenge, digest)? {
        return Err(PipesError::authentication_with_code(
            ErrorCode::AUTH_DIGEST_MISMATCH,
            "Host digest does not match the challenge",
        ));
    }
    create_digest(secret, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic_base64() {
        let a = create_digest(b"secret", "challenge").unwrap();
        let b = create_digest(b"secret", "challenge").unwrap();
        assert_eq!(a, b);
        // 20 byte mac -> 28 base64 chars
        assert_eq!(a.len(), 28);
        assert_ne!(a, create_digest(b"other", "challenge").unwrap());
    }

    #[test]
    fn test_digest_matches_worker_side_hmac_sha1() {
        // base64(hmac.new(b"secret", b"challenge", hashlib.sha1).digest())
        assert_eq!(
            create_digest(b"secret", "challenge").unwrap(),
            "mst3phuz6r7rGqMGwE1tuxa6SYA="
        );
    }

    #[test]
    fn test_verify_digest() {
        assert!(verify_digest(b"secret", "challenge", "mst3phuz6r7rGqMGwE1tuxa6SYA=").unwrap());
        assert!(!verify_digest(b"other", "challenge", "mst3phuz6r7rGqMGwE1tuxa6SYA=").unwrap());
        assert!(!verify_digest(b"secret", "challenge", "not base64!").unwrap());
        assert!(!verify_digest(b"secret", "challenge", "").unwrap());
    }

    #[test]
    fn test_challenge_round_trip() {
        let secret = generate_secret();
        let challenge = Challenge::new(&secret).unwrap();

        let response = answer_challenge(&secret, &challenge.digest, &challenge.challenge).unwrap();
        assert!(digests_match(&challenge.expected_response, &response));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let challenge = Challenge::new(b"right").unwrap();
        let err = answer_challenge(b"wrong", &challenge.digest, &challenge.challenge).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AUTH_DIGEST_MISMATCH);
    }

    #[test]
    fn test_challenges_differ() {
        assert_ne!(generate_challenge(), generate_challenge());
        assert!(generate_challenge().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_digests_match() {
        assert!(digests_match("abc", "abc"));
        assert!(!digests_match("abc", "abd"));
        assert!(!digests_match("abc", "abcd"));
    }
}
