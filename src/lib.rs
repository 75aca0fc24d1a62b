//! A keyed registry of lazily built, rate-limited model clients.
//!
//! The [`pool`] module is the core: a [`Registry`] that memoizes client
//! construction per `(pool_id, key)` and tears clients down safely. The
//! [`providers`] module contains adapters that register HTTP clients for
//! OpenAI-compatible and Ollama endpoints, sharing transports through the
//! [`transport`] cache.

pub mod pool;
pub mod providers;
pub mod transport;

pub use pool::{
    Client, ClientFactory, ClientKind, ClientOptions, RateLimits, Registry, RegistryConfig,
    RegistryError, RegistrationKey, RegistrationOptions, Unregistered,
};
pub use tokio_util::sync::CancellationToken;
