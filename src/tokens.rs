//! Token generation and verification for agent authentication.
//!
//! Agents authenticate with opaque bearer tokens. Only a PBKDF2-HMAC-SHA256
//! digest record is persisted, in the self-describing form
//! `pbkdf2_sha256$<iterations>$<salt_b64>$<digest_b64>` so verification needs
//! no external configuration lookup.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// PBKDF2 iteration count for newly minted digest records.
pub const ITERATIONS: u32 = 200_000;

/// Salt length in bytes (128-bit minimum per the credential scheme).
pub const SALT_BYTES: usize = 16;

const ALGORITHM: &str = "pbkdf2_sha256";
const SHA256_BLOCK_LEN: usize = 64;
const SHA256_OUTPUT_LEN: usize = 32;

/// Generate a new URL-safe random token for an agent (256 bits of entropy).
pub fn generate_agent_token() -> String {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).expect("RNG failure");
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash an agent token with a fresh random salt at the default cost.
pub fn hash_agent_token(token: &str) -> String {
    hash_agent_token_with_iterations(token, ITERATIONS)
}

/// Hash an agent token at an explicit iteration count.
pub fn hash_agent_token_with_iterations(token: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_BYTES];
    getrandom::getrandom(&mut salt).expect("RNG failure");
    let digest = pbkdf2_hmac_sha256(token.as_bytes(), &salt, iterations);
    format!(
        "{}${}${}${}",
        ALGORITHM,
        iterations,
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(digest)
    )
}

/// Verify a plaintext token against a stored digest record.
///
/// Malformed records (wrong field count, unknown algorithm, non-numeric
/// iteration count, bad base64) verify as `false` rather than erroring.
pub fn verify_agent_token(token: &str, stored_hash: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (Some(algorithm), Some(iterations), Some(salt_b64), Some(digest_b64), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if algorithm != ALGORITHM {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Some(salt) = decode_b64(salt_b64) else {
        return false;
    };
    let Some(expected) = decode_b64(digest_b64) else {
        return false;
    };
    let candidate = pbkdf2_hmac_sha256(token.as_bytes(), &salt, iterations);
    constant_time_eq(&candidate, &expected)
}

/// Decode URL-safe base64, tolerating records written with trailing padding.
fn decode_b64(value: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).ok()
}

/// Compare two byte slices without a data-dependent early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; SHA256_OUTPUT_LEN] {
    // Keys longer than the block size are hashed down first (RFC 2104).
    let mut block_key = [0u8; SHA256_BLOCK_LEN];
    if key.len() > SHA256_BLOCK_LEN {
        let digest = Sha256::digest(key);
        block_key[..SHA256_OUTPUT_LEN].copy_from_slice(&digest);
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = block_key.iter().map(|b| b ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = block_key.iter().map(|b| b ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

/// PBKDF2 with HMAC-SHA256, producing one 32-byte derived block.
fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; SHA256_OUTPUT_LEN] {
    // dkLen == hLen, so a single block (index 1) suffices.
    let mut salted = Vec::with_capacity(salt.len() + 4);
    salted.extend_from_slice(salt);
    salted.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_sha256(password, &salted);
    let mut output = u;
    for _ in 1..iterations {
        u = hmac_sha256(password, &u);
        for (out, byte) in output.iter_mut().zip(u.iter()) {
            *out ^= byte;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn pbkdf2_known_vectors() {
        // PBKDF2-HMAC-SHA256 vectors from the scrypt draft test suite.
        let one = pbkdf2_hmac_sha256(b"password", b"salt", 1);
        assert_eq!(
            hex(&one),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
        let two = pbkdf2_hmac_sha256(b"password", b"salt", 2);
        assert_eq!(
            hex(&two),
            "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43"
        );
    }

    #[test]
    fn generated_tokens_are_unique_and_urlsafe() {
        let a = generate_agent_token();
        let b = generate_agent_token();
        assert_ne!(a, b);
        assert!(a.len() >= 43); // 256 bits base64-encoded
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn hash_then_verify_roundtrip() {
        let token = generate_agent_token();
        let record = hash_agent_token_with_iterations(&token, 1_000);
        assert!(verify_agent_token(&token, &record));
        assert!(!verify_agent_token("some-other-token", &record));
    }

    #[test]
    fn hashing_is_salted_per_call() {
        let token = generate_agent_token();
        let first = hash_agent_token_with_iterations(&token, 1_000);
        let second = hash_agent_token_with_iterations(&token, 1_000);
        assert_ne!(first, second);
        assert!(verify_agent_token(&token, &first));
        assert!(verify_agent_token(&token, &second));
    }

    #[test]
    fn default_cost_roundtrip() {
        let token = generate_agent_token();
        let record = hash_agent_token(&token);
        assert!(record.starts_with("pbkdf2_sha256$200000$"));
        assert!(verify_agent_token(&token, &record));
    }

    #[test]
    fn malformed_records_never_verify() {
        let token = generate_agent_token();
        assert!(!verify_agent_token(&token, "garbage"));
        assert!(!verify_agent_token(&token, "a$b$c"));
        assert!(!verify_agent_token(&token, "a$b$c$d$e"));
        assert!(!verify_agent_token(&token, "md5$1000$c2FsdA$ZGlnZXN0"));
        assert!(!verify_agent_token(
            &token,
            "pbkdf2_sha256$notanumber$c2FsdA$ZGlnZXN0"
        ));
        assert!(!verify_agent_token(
            &token,
            "pbkdf2_sha256$1000$!!notbase64!!$ZGlnZXN0"
        ));
        assert!(!verify_agent_token(&token, ""));
    }

    #[test]
    fn record_with_trailing_padding_still_verifies() {
        let token = generate_agent_token();
        let record = hash_agent_token_with_iterations(&token, 1_000);
        let mut parts: Vec<String> = record.split('$').map(str::to_string).collect();
        parts[2].push('=');
        parts[3].push_str("==");
        assert!(verify_agent_token(&token, &parts.join("$")));
    }
}
