use aes_gcm::{ aead::{ Aead, KeyInit }, Aes256Gcm, Nonce };
use rand::RngCore;

use crate::error::{ AppError, Result };

const NONCE_LEN: usize = 12;

/// Seals custody private keys at rest with AES-256-GCM.
///
/// Ciphertexts are `hex(nonce || ciphertext)` with a fresh random nonce per key.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(AppError::Encryption("Encryption key must be 32 bytes".to_string()));
        }

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e|
            AppError::Encryption(e.to_string())
        )?;

        Ok(Self { cipher })
    }

    /// Encrypt a hex private key after normalizing it to `0x`-prefixed lowercase.
    pub fn seal_private_key(&self, private_key: &str) -> Result<String> {
        let normalized = normalize_private_key(private_key)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher
            .encrypt(nonce, normalized.as_bytes())
            .map_err(|e| AppError::Encryption(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(hex::encode(sealed))
    }

    pub fn open_private_key(&self, sealed_hex: &str) -> Result<String> {
        let sealed = hex
            ::decode(sealed_hex)
            .map_err(|e| AppError::Encryption(format!("Invalid hex: {}", e)))?;

        if sealed.len() <= NONCE_LEN {
            return Err(AppError::Encryption("Sealed key too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AppError::Custody("Sealed key failed authentication".to_string()))?;

        let key = String::from_utf8(plaintext).map_err(|e|
            AppError::Encryption(format!("Invalid UTF-8: {}", e))
        )?;

        normalize_private_key(&key)
    }
}

/// Accepts 64 hex chars with or without `0x`.
pub fn normalize_private_key(private_key: &str) -> Result<String> {
    let trimmed = private_key.trim().trim_start_matches("0x");

    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidPrivateKey);
    }

    Ok(format!("0x{}", trimmed.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4C0883A69102937D6231471B5DBB6204FE5129617082792AE468D01A3F362318";

    #[test]
    fn test_seal_and_open_normalizes_key() {
        let encryptor = Encryptor::new(&[7u8; 32]).unwrap();

        let sealed = encryptor.seal_private_key(KEY).unwrap();
        let opened = encryptor.open_private_key(&sealed).unwrap();

        assert_eq!(opened, KEY.to_lowercase());
    }

    #[test]
    fn test_sealing_twice_uses_fresh_nonces() {
        let encryptor = Encryptor::new(&[7u8; 32]).unwrap();

        let first = encryptor.seal_private_key(KEY).unwrap();
        let second = encryptor.seal_private_key(KEY).unwrap();

        assert_ne!(first, second);
        assert_eq!(encryptor.open_private_key(&first).unwrap(), encryptor.open_private_key(&second).unwrap());
    }

    #[test]
    fn test_wrong_key_or_tampering_is_rejected() {
        let encryptor = Encryptor::new(&[7u8; 32]).unwrap();
        let other = Encryptor::new(&[9u8; 32]).unwrap();
        let sealed = encryptor.seal_private_key(KEY).unwrap();

        assert!(other.open_private_key(&sealed).is_err());

        let mut tampered = sealed.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(encryptor.open_private_key(&tampered).is_err());
    }

    #[test]
    fn test_malformed_keys_are_refused() {
        let encryptor = Encryptor::new(&[7u8; 32]).unwrap();

        assert!(matches!(encryptor.seal_private_key("0x1234"), Err(AppError::InvalidPrivateKey)));
        assert!(Encryptor::new(&[0u8; 16]).is_err());
    }
}
