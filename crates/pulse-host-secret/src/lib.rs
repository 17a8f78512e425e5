//! Secret decryption for pulse.
//!
//! Secret-typed widget properties are stored encrypted and decrypted right
//! before a script runs. The engine only depends on the [`SecretDecryptor`]
//! trait; [`AesGcmSecretBox`] is the bundled implementation.

mod aes;
mod error;

pub use aes::AesGcmSecretBox;
pub use error::SecretError;

/// Decrypts stored secret values.
pub trait SecretDecryptor: Send + Sync {
  /// Decrypt a stored value into its plaintext.
  fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError>;
}

/// A decryptor for deployments that store secrets in plaintext.
///
/// Returns the stored value unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughDecryptor;

impl SecretDecryptor for PassthroughDecryptor {
  fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError> {
    Ok(ciphertext.to_string())
  }
}
