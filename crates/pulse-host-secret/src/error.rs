/// Errors raised while decrypting secrets.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("malformed ciphertext: {0}")]
  Malformed(String),

  #[error("decryption failed: {0}")]
  Decrypt(String),

  #[error("encryption failed: {0}")]
  Encrypt(String),

  #[error("base64 decode error: {0}")]
  Base64(#[from] base64::DecodeError),
}
