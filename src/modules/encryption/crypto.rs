use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

/// Function to encrypt data using AES-256-GCM
pub fn encrypt_data(data: &[u8], encryption_key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, String> {
    if nonce.len() != 12 {
        return Err("Nonce must be 12 bytes".to_string());
    }
    let cipher = Aes256Gcm::new_from_slice(encryption_key)
        .map_err(|_| "Encryption key must be 32 bytes".to_string())?;
    cipher
        .encrypt(Nonce::from_slice(nonce), data)
        .map_err(|_| "Encryption failed".to_string())
}

/// Function to decrypt data using AES-256-GCM
pub fn decrypt_data(encrypted_data: &[u8], encryption_key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, String> {
    if nonce.len() != 12 {
        return Err("Nonce must be 12 bytes".to_string());
    }
    let cipher = Aes256Gcm::new_from_slice(encryption_key)
        .map_err(|_| "Encryption key must be 32 bytes".to_string())?;
    cipher
        .decrypt(Nonce::from_slice(nonce), encrypted_data)
        .map_err(|_| "Decryption failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> Vec<u8> {
        (1..=32).collect()
    }

    #[test]
    fn test_encryption_decryption_roundtrip() {
        let original_data = b"{\"items\":[]}";
        let nonce: Vec<u8> = (1..=12).collect();

        let encrypted = encrypt_data(original_data, &fixed_key(), &nonce).unwrap();
        assert_ne!(encrypted.as_slice(), original_data.as_slice());

        let decrypted = decrypt_data(&encrypted, &fixed_key(), &nonce).unwrap();
        assert_eq!(decrypted.as_slice(), original_data.as_slice());
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let nonce: Vec<u8> = (1..=12).collect();
        let mut encrypted = encrypt_data(b"ledger", &fixed_key(), &nonce).unwrap();
        encrypted[0] ^= 0xff;
        assert!(decrypt_data(&encrypted, &fixed_key(), &nonce).is_err());
    }

    #[test]
    fn test_bad_key_or_nonce_length() {
        assert!(encrypt_data(b"x", &[0u8; 16], &[0u8; 12]).is_err());
        assert!(encrypt_data(b"x", &fixed_key(), &[0u8; 16]).is_err());
    }
}
