use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use super::RegistrationKey;

/// Why a single construction attempt did not produce a client. Every
/// caller waiting on the same attempt observes the same value, so it is
/// cheap to clone.
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    /// The factory returned an error
    #[error(transparent)]
    Factory(Arc<dyn StdError + Send + Sync>),
    /// The factory panicked
    #[error("the factory panicked: {0}")]
    Panicked(String),
    /// The entry was removed while the build was in flight
    #[error("construction was cancelled because the entry was removed")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    /// A required field was missing or empty. Nothing was changed.
    #[error("invalid registration options: {0}")]
    InvalidOptions(String),
    /// The key is already registered and the registry rejects duplicates
    #[error("\"{0}\" is already registered")]
    DuplicateRegistration(RegistrationKey),
    /// No entry exists for the key
    #[error("\"{0}\" is not registered")]
    NotRegistered(RegistrationKey),
    /// The factory failed. The entry stays registered and the next resolve
    /// retries construction.
    #[error("failed to construct the client for \"{key}\": {source}")]
    ConstructionFailed {
        key: RegistrationKey,
        #[source]
        source: BuildError,
    },
    /// The caller's cancellation token fired
    #[error("the operation was cancelled")]
    Cancelled,
}
