//! The provider's payload cipher.
//!
//! AES-256-ECB with PKCS7 padding, base64 on the wire. ECB is the provider's
//! mandate, not a design choice; the mode lives only here so it stays
//! swappable if their crypto ever changes. The cipher is deterministic, which
//! the idempotency design relies on: identical plaintext always yields an
//! identical ciphertext.

use crate::errors::{CashdeskError, CashdeskResult};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

#[derive(Clone, Debug)]
pub struct PayloadCipher {
    key: [u8; 32],
}

impl PayloadCipher {
    /// Build from the pre-shared key. The provider contract fixes the key at
    /// exactly 32 UTF-8 bytes.
    pub fn new(key: &str) -> CashdeskResult<Self> {
        let bytes = key.as_bytes();
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            CashdeskError::crypto(format!(
                "AES key must be exactly 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let encryptor = ecb::Encryptor::<Aes256>::new(&self.key.into());
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        BASE64.encode(ciphertext)
    }

    pub fn decrypt(&self, payload: &str) -> CashdeskResult<Vec<u8>> {
        let ciphertext = BASE64
            .decode(payload.trim())
            .map_err(|e| CashdeskError::crypto(format!("Invalid base64 payload: {}", e)))?;
        let decryptor = ecb::Decryptor::<Aes256>::new(&self.key.into());
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CashdeskError::crypto("Payload failed to decrypt".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PayloadCipher {
        PayloadCipher::new("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let plaintext = br#"{"serial_number":"abc","bet_amount":"1.00"}"#;
        let encrypted = cipher.encrypt(plaintext);
        assert_ne!(encrypted.as_bytes(), plaintext.as_slice());
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_encryption_is_deterministic() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same payload");
        let b = cipher.encrypt(b"same payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_key_length_is_rejected() {
        let err = PayloadCipher::new("short").unwrap_err();
        assert!(matches!(err, CashdeskError::Crypto(_)));
    }

    #[test]
    fn test_garbage_payload_fails_cleanly() {
        let cipher = cipher();
        assert!(matches!(
            cipher.decrypt("not-base64!!!").unwrap_err(),
            CashdeskError::Crypto(_)
        ));
        // Valid base64 of a non-block-aligned buffer.
        let bogus = BASE64.encode(b"abc");
        assert!(matches!(
            cipher.decrypt(&bogus).unwrap_err(),
            CashdeskError::Crypto(_)
        ));
    }

    #[test]
    fn test_decrypt_with_different_key_fails_padding() {
        let encrypted = cipher().encrypt(b"{\"x\":1}");
        let other = PayloadCipher::new("ffffffffffffffffffffffffffffffff").unwrap();
        // Overwhelmingly likely to fail PKCS7 unpadding under the wrong key.
        assert!(other.decrypt(&encrypted).is_err());
    }
}
