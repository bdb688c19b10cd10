use crate::HmacSha256;
use pbkdf2::pbkdf2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const KEY_LENGTH: usize = 32;

/// Default PBKDF2 iteration count for stored secrets
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Self-describing PBKDF2 hash of a secret: `pbkdf2-sha256$<iterations>$<salt>$<hash>`
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretHash(String);

impl SecretHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> Option<(u32, Vec<u8>, Vec<u8>)> {
        let mut fields = self.0.split('$');
        if fields.next()? != HASH_SCHEME {
            return None;
        }
        let iterations = fields.next()?.parse::<u32>().ok()?;
        let salt = hex::decode(fields.next()?).ok()?;
        let hash = hex::decode(fields.next()?).ok()?;
        if fields.next().is_some() || iterations == 0 {
            return None;
        }
        Some((iterations, salt, hash))
    }
}

// Hashes never show up in debug output
impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHash(..)")
    }
}

/// Function to generate a random salt for PBKDF2
pub fn generate_random_salt() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| rng.gen()).collect()
}

/// Function to generate a random 96-bit nonce for AES-GCM
pub fn generate_random_nonce() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..12).map(|_| rng.gen()).collect()
}

/// Function to derive a 32-byte key from the passphrase using PBKDF2
pub fn derive_key_from_passphrase(passphrase: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut key = vec![0u8; KEY_LENGTH];
    pbkdf2::<HmacSha256>(passphrase.as_bytes(), salt, iterations.max(1), &mut key);
    key
}

/// Hash a secret under a fresh salt
pub fn hash_secret(secret: &str, iterations: u32) -> SecretHash {
    let iterations = iterations.max(1);
    let salt = generate_random_salt();
    let key = derive_key_from_passphrase(secret, &salt, iterations);
    SecretHash(format!(
        "{}${}${}${}",
        HASH_SCHEME,
        iterations,
        hex::encode(&salt),
        hex::encode(key)
    ))
}

/// Compare a plaintext secret against a stored hash in constant time.
///
/// Malformed hashes never verify.
pub fn verify_secret(secret: &str, stored: &SecretHash) -> bool {
    match stored.parts() {
        Some((iterations, salt, expected)) => {
            let candidate = derive_key_from_passphrase(secret, &salt, iterations);
            bool::from(candidate.as_slice().ct_eq(expected.as_slice()))
        }
        None => false,
    }
}

/// Spend the same key-derivation effort as a real verification, for unknown accounts
pub fn burn_verification(iterations: u32) {
    let salt = [0u8; 16];
    let _ = derive_key_from_passphrase("", &salt, iterations);
}
