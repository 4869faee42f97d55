//! Byte-level codec steps: compression and authenticated encryption.
//!
//! Both transforms expose the same symmetric `{encode, decode}` shape so the
//! mapper can treat the write pipeline as a chain of steps and apply the
//! inverse chain on read. Both are optional; [`Identity`] stands in when a
//! caller wants to hold "no transform" as a value rather than an `Option`.
//!
//! The cipher is ChaCha20-Poly1305 AEAD. Its output layout is
//! `nonce(12) || ciphertext || tag(16)`, with a fresh random nonce per
//! encryption, so the same plaintext never encrypts to the same bytes twice.

use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, aead::Aead};
use rand::RngCore;
use thiserror::Error;

/// A record failed verification on the read path: the cipher tag did not
/// match, decompression failed, or an upcaster refused the record.
#[derive(Debug, Error)]
#[error("integrity error: {message}")]
pub struct IntegrityError {
    message: String,
}

impl IntegrityError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Byte-string to byte-string compression step.
pub trait Compressor: Send + Sync {
    /// Compress.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying codec fails.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError>;

    /// Decompress.
    ///
    /// # Errors
    ///
    /// Returns an error when `data` is not a valid compressed stream.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError>;
}

/// Authenticated encryption step.
pub trait Cipher: Send + Sync {
    /// Encrypt, producing `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns an error when encryption fails.
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, IntegrityError>;

    /// Verify the tag and decrypt.
    ///
    /// # Errors
    ///
    /// Fails loudly when the input is too short or the tag does not verify;
    /// no plaintext is ever returned for a tampered record.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError>;
}

/// The no-op transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        Ok(data.to_vec())
    }
}

impl Cipher for Identity {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        Ok(plaintext.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        Ok(data.to_vec())
    }
}

/// Zstandard compressor.
#[derive(Clone, Copy, Debug)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Default compression level; a reasonable speed/ratio balance.
    pub const DEFAULT_LEVEL: i32 = 3;

    #[must_use]
    pub const fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        zstd::encode_all(data, self.level)
            .map_err(|e| IntegrityError::new(format!("compression failed: {e}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        zstd::decode_all(data)
            .map_err(|e| IntegrityError::new(format!("decompression failed: {e}")))
    }
}

/// ChaCha20-Poly1305 AEAD cipher.
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for ChaCha20Poly1305Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaCha20Poly1305Cipher").finish_non_exhaustive()
    }
}

impl ChaCha20Poly1305Cipher {
    /// Required key length in bytes.
    pub const KEY_SIZE: usize = 32;
    /// Nonce length prepended to every ciphertext.
    pub const NONCE_SIZE: usize = 12;
    /// Poly1305 tag length appended to every ciphertext.
    pub const TAG_SIZE: usize = 16;

    /// Construct a cipher from raw key material.
    ///
    /// # Errors
    ///
    /// Returns an error unless `key` is exactly [`KEY_SIZE`](Self::KEY_SIZE)
    /// bytes.
    pub fn new(key: &[u8]) -> Result<Self, IntegrityError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
            IntegrityError::new(format!(
                "cipher key must be {} bytes, got {}",
                Self::KEY_SIZE,
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }

    /// Generate a fresh random key of the requested byte length.
    #[must_use]
    pub fn generate_key(num_bytes: usize) -> Vec<u8> {
        let mut key = vec![0u8; num_bytes];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }
}

impl Cipher for ChaCha20Poly1305Cipher {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        let mut nonce_bytes = [0u8; Self::NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| IntegrityError::new("encryption failed"))?;
        let mut output = nonce_bytes.to_vec();
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        if data.len() < Self::NONCE_SIZE + Self::TAG_SIZE {
            return Err(IntegrityError::new(
                "ciphertext shorter than nonce and tag",
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(Self::NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| IntegrityError::new("ciphertext failed tag verification"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_a_no_op_both_ways() {
        let data = b"plain".to_vec();
        assert_eq!(Compressor::encode(&Identity, &data).unwrap(), data);
        assert_eq!(Compressor::decode(&Identity, &data).unwrap(), data);
        assert_eq!(Cipher::encode(&Identity, &data).unwrap(), data);
        assert_eq!(Cipher::decode(&Identity, &data).unwrap(), data);
    }

    #[test]
    fn zstd_round_trips() {
        let compressor = ZstdCompressor::default();
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let compressed = compressor.encode(&data).unwrap();
        assert_ne!(compressed, data);
        assert_eq!(compressor.decode(&compressed).unwrap(), data);
    }

    #[test]
    fn zstd_rejects_garbage() {
        let compressor = ZstdCompressor::default();
        let error = compressor.decode(b"definitely not zstd").unwrap_err();
        assert!(error.to_string().contains("decompression failed"));
    }

    #[test]
    fn cipher_round_trips() {
        let key = ChaCha20Poly1305Cipher::generate_key(ChaCha20Poly1305Cipher::KEY_SIZE);
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        let ciphertext = cipher.encode(b"secret").unwrap();
        assert_eq!(cipher.decode(&ciphertext).unwrap(), b"secret");
    }

    #[test]
    fn cipher_output_layout_is_nonce_ciphertext_tag() {
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        let plaintext = b"twelve bytes";
        let ciphertext = cipher.encode(plaintext).unwrap();
        assert_eq!(
            ciphertext.len(),
            ChaCha20Poly1305Cipher::NONCE_SIZE
                + plaintext.len()
                + ChaCha20Poly1305Cipher::TAG_SIZE
        );
    }

    #[test]
    fn cipher_is_non_deterministic() {
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        assert_ne!(
            cipher.encode(b"same").unwrap(),
            cipher.encode(b"same").unwrap()
        );
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        let mut ciphertext = cipher.encode(b"secret").unwrap();
        let index = ChaCha20Poly1305Cipher::NONCE_SIZE + 1;
        ciphertext[index] ^= 0xff;
        let error = cipher.decode(&ciphertext).unwrap_err();
        assert!(error.to_string().contains("tag verification"));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let cipher_a =
            ChaCha20Poly1305Cipher::new(&ChaCha20Poly1305Cipher::generate_key(32)).unwrap();
        let cipher_b =
            ChaCha20Poly1305Cipher::new(&ChaCha20Poly1305Cipher::generate_key(32)).unwrap();
        let ciphertext = cipher_a.encode(b"secret").unwrap();
        assert!(cipher_b.decode(&ciphertext).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        let error = cipher.decode(&[0u8; 27]).unwrap_err();
        assert!(error.to_string().contains("shorter than"));
    }

    #[test]
    fn generate_key_honours_requested_length() {
        assert_eq!(ChaCha20Poly1305Cipher::generate_key(32).len(), 32);
        assert_eq!(ChaCha20Poly1305Cipher::generate_key(16).len(), 16);
    }

    #[test]
    fn wrong_key_length_is_rejected_at_construction() {
        let error = ChaCha20Poly1305Cipher::new(&[0u8; 16]).unwrap_err();
        assert!(error.to_string().contains("32 bytes"));
    }
}
