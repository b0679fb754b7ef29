use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("verification failed: {0}")]
    VerificationError(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}
