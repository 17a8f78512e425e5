use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::SecretDecryptor;
use crate::error::SecretError;

const NONCE_LEN: usize = 12;

/// AES-256-GCM secret box.
///
/// Stored values are `base64(nonce || ciphertext)` with a random 96-bit nonce.
pub struct AesGcmSecretBox {
  cipher: Aes256Gcm,
}

impl AesGcmSecretBox {
  /// Create a secret box from a raw 32-byte key.
  pub fn new(key: &[u8; 32]) -> Self {
    let key = Key::<Aes256Gcm>::from_slice(key);
    Self {
      cipher: Aes256Gcm::new(key),
    }
  }

  /// Create a secret box from a base64-encoded 32-byte key.
  pub fn from_base64_key(encoded: &str) -> Result<Self, SecretError> {
    let bytes = B64.decode(encoded.trim())?;
    let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
      SecretError::InvalidKey(format!("key has wrong length: {} (expected 32)", bytes.len()))
    })?;
    Ok(Self::new(&key))
  }

  /// Encrypt a plaintext into its stored representation.
  pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = self
      .cipher
      .encrypt(nonce, plaintext.as_bytes())
      .map_err(|e| SecretError::Encrypt(e.to_string()))?;

    let mut stored = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    stored.extend_from_slice(&nonce_bytes);
    stored.extend_from_slice(&ciphertext);
    Ok(B64.encode(stored))
  }
}

impl SecretDecryptor for AesGcmSecretBox {
  fn decrypt(&self, stored: &str) -> Result<String, SecretError> {
    let bytes = B64.decode(stored.trim())?;
    if bytes.len() <= NONCE_LEN {
      return Err(SecretError::Malformed(format!(
        "expected more than {} bytes, got {}",
        NONCE_LEN,
        bytes.len()
      )));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
    let plaintext = self
      .cipher
      .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
      .map_err(|e| SecretError::Decrypt(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| SecretError::Decrypt(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn secret_box() -> AesGcmSecretBox {
    AesGcmSecretBox::new(&[7u8; 32])
  }

  #[test]
  fn test_encrypt_decrypt_roundtrip() {
    let secret_box = secret_box();
    let stored = secret_box.encrypt("my-api-token").unwrap();
    assert_ne!(stored, "my-api-token");
    assert_eq!(secret_box.decrypt(&stored).unwrap(), "my-api-token");
  }

  #[test]
  fn test_encrypt_produces_unique_nonces() {
    let secret_box = secret_box();
    let first = secret_box.encrypt("same").unwrap();
    let second = secret_box.encrypt("same").unwrap();
    assert_ne!(first, second);
  }

  #[test]
  fn test_decrypt_with_other_key_fails() {
    let stored = secret_box().encrypt("value").unwrap();
    let other = AesGcmSecretBox::new(&[8u8; 32]);
    assert!(matches!(other.decrypt(&stored), Err(SecretError::Decrypt(_))));
  }

  #[test]
  fn test_decrypt_rejects_short_and_non_base64_input() {
    let secret_box = secret_box();
    assert!(matches!(
      secret_box.decrypt(&B64.encode([1u8; 4])),
      Err(SecretError::Malformed(_))
    ));
    assert!(matches!(
      secret_box.decrypt("***not base64***"),
      Err(SecretError::Base64(_))
    ));
  }

  #[test]
  fn test_from_base64_key_checks_length() {
    assert!(AesGcmSecretBox::from_base64_key(&B64.encode([1u8; 32])).is_ok());
    assert!(matches!(
      AesGcmSecretBox::from_base64_key(&B64.encode([1u8; 16])),
      Err(SecretError::InvalidKey(_))
    ));
  }
}
