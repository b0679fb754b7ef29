use thiserror::Error;

use ember_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum PreKeyError {
    /// No response was received from the key distribution service.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service answered with an error status.
    #[error("service rejected request with status {status}: {reason}")]
    ServiceRejected { status: u16, reason: String },

    #[error("local key state inconsistent: {0}")]
    LocalStateInconsistent(String),

    #[error("key storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("prekey rotation service stopped")]
    ServiceStopped,
}

impl PreKeyError {
    /// Whether this failure advances the sending lockout streak.
    ///
    /// Only an explicit rejection by the service counts. Transport failures
    /// and local errors never do.
    pub fn counts_toward_lockout(&self) -> bool {
        matches!(self, Self::ServiceRejected { .. })
    }
}

impl From<rusqlite::Error> for PreKeyError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
