use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::BLOCK_SIZE;

// Number of sha256 rounds applied when deriving the IV. Part of the
// on-disk format, do not change.
const IV_ROUNDS: usize = 100;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("AES key must be 16, 24 or 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// AES key material. The variant selects the cipher strength.
#[derive(Clone, PartialEq, Eq)]
pub enum Key {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl Key {
    /// Wrap caller supplied key bytes, rejecting any length that does
    /// not map to an AES variant. The bytes are used directly, there
    /// is no key derivation beyond the IV schedule.
    pub fn new(bytes: &[u8]) -> Result<Self, KeyError> {
        match bytes.len() {
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(bytes);
                Ok(Key::Aes128(key))
            }
            24 => {
                let mut key = [0u8; 24];
                key.copy_from_slice(bytes);
                Ok(Key::Aes192(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                Ok(Key::Aes256(key))
            }
            x => Err(KeyError::InvalidLength(x)),
        }
    }

    /// Generate a fresh random key of the given length.
    pub fn generate(len: usize) -> Result<Self, KeyError> {
        if !matches!(len, 16 | 24 | 32) {
            return Err(KeyError::InvalidLength(len));
        }
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self::new(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Key::Aes128(k) => k,
            Key::Aes192(k) => k,
            Key::Aes256(k) => k,
        }
    }
}

/// Generate one cipher block of fresh random salt. Must be new for
/// every write session.
pub fn gen_salt() -> [u8; BLOCK_SIZE] {
    let mut salt = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the CBC IV from key material and the per-file salt.
///
/// sha256 is applied [`IV_ROUNDS`] times to the running digest of
/// `key || salt` and the result truncated to one cipher block.
/// Identical inputs always produce the identical IV.
pub fn derive_iv(key: &Key, salt: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut temp = Vec::with_capacity(key.as_bytes().len() + salt.len());
    temp.extend_from_slice(key.as_bytes());
    temp.extend_from_slice(salt);

    for _ in 0..IV_ROUNDS {
        temp = Sha256::digest(&temp).to_vec();
    }

    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&temp[..BLOCK_SIZE]);
    iv
}

#[cfg(test)]
mod test_key {
    use super::*;

    #[test]
    fn valid_lengths() {
        assert!(Key::new(&[0u8; 16]).is_ok());
        assert!(Key::new(&[0u8; 24]).is_ok());
        assert!(Key::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn invalid_lengths() {
        for len in [0, 1, 15, 17, 23, 31, 33, 64] {
            assert!(matches!(
                Key::new(&vec![0u8; len]),
                Err(KeyError::InvalidLength(x)) if x == len
            ));
        }
    }

    #[test]
    fn generate_matches_requested_length() {
        assert_eq!(Key::generate(16).unwrap().as_bytes().len(), 16);
        assert_eq!(Key::generate(24).unwrap().as_bytes().len(), 24);
        assert_eq!(Key::generate(32).unwrap().as_bytes().len(), 32);
        assert!(Key::generate(20).is_err());
    }
}
