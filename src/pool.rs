//! The client pool: a registry that builds expensive model clients on
//! demand and keeps at most one live client per key.
//!
//! ## Lifecycle
//!
//! A client is described by [`RegistrationOptions`], which pairs the
//! descriptive [`ClientOptions`] (kind, model id, endpoint, credentials and
//! [`RateLimits`]) with a [`ClientFactory`]. Registering is cheap: the
//! factory runs on the first [`Registry::resolve`] and its result is cached
//! until the entry is unregistered or replaced.
//!
//! Concurrent resolves of one entry share a single construction and all
//! receive the same `Arc`. A failed construction is not cached; the next
//! resolve tries again.
//!
//! ## Teardown
//!
//! Removing an entry cancels an in-flight build, closes the built client
//! through [`Client::close`] and then runs the entry's [`RemovalHook`]. The
//! hook is where adapters release resources acquired alongside the client,
//! such as a cached HTTP transport.
//!
//! ## Rate limits
//!
//! Limits are metadata. The registry exposes them through
//! [`Registry::rate_limits`] and [`Registry::list`] for an external limiter
//! and never enforces them itself.

mod entry;
mod error;
mod key;
mod options;
mod registry;

pub use entry::{EntryInfo, EntryState};
pub use error::{BuildError, RegistryError};
pub use key::RegistrationKey;
pub use options::{
    factory_fn, BoxError, Client, ClientFactory, ClientKind, ClientOptions, FnFactory, RateLimits,
    RegistrationOptions, RemovalHook,
};
pub use registry::{DuplicatePolicy, Registry, RegistryConfig, Unregistered};
