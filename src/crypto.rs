//! Symmetric obfuscation for files written to the cache directory.
//!
//! The key is derived with scrypt from a fixed passphrase and salt, so this
//! keeps casual readers out of the files but is not a security boundary
//! against anyone with access to the binary.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use thiserror::Error;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const PASSPHRASE: &[u8] = b"password";
const SALT: &[u8] = b"YouTubeEditorSaltValue";

/// scrypt cost: N = 2^10, r = 1, p = 1.
const SCRYPT_LOG_N: u8 = 10;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;

/// Counter block starts at 1, big-endian.
const INITIAL_COUNTER: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

#[derive(Debug, Error)]
pub enum CryptoError {
  #[error("invalid key derivation parameters: {0}")]
  Params(String),
  #[error("key derivation failed: {0}")]
  Derive(String),
  #[error("cipher setup failed: {0}")]
  Cipher(String),
}

/// AES-256-CTR cipher keyed from a passphrase.
#[derive(Clone)]
pub struct Cipher {
  key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Cipher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cipher").finish_non_exhaustive()
  }
}

impl Cipher {
  /// Cipher keyed from the built-in passphrase.
  pub fn builtin() -> Result<Self, CryptoError> {
    Self::from_passphrase(PASSPHRASE, SALT)
  }

  pub fn from_passphrase(passphrase: &[u8], salt: &[u8]) -> Result<Self, CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
      .map_err(|e| CryptoError::Params(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(passphrase, salt, &params, &mut key)
      .map_err(|e| CryptoError::Derive(e.to_string()))?;

    Ok(Self { key })
  }

  pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    self.apply(plaintext)
  }

  pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    self.apply(ciphertext)
  }

  // CTR mode is symmetric; each call starts a fresh keystream.
  fn apply(&self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut cipher = Aes256Ctr::new_from_slices(&self.key, &INITIAL_COUNTER)
      .map_err(|e| CryptoError::Cipher(e.to_string()))?;
    let mut buffer = input.to_vec();
    cipher.apply_keystream(&mut buffer);
    Ok(buffer)
  }
}
