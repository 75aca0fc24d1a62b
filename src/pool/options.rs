//! Registration options and the seams the registry calls into: the
//! [`ClientFactory`] that builds a client, the [`Client`] close operation,
//! and the [`RemovalHook`] that releases resources paired with an entry.

use async_trait::async_trait;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::RegistrationKey;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The capability a client provides. The registry carries this as
/// metadata only; adapters decide how each kind is built.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClientKind {
    Chat,
    Audio,
    Image,
    Embedding,
}

/// Rate-limit parameters attached to a registration. A missing field means
/// there is no limit. The registry never enforces these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_day: Option<u64>,
}

impl RateLimits {
    pub fn unlimited() -> RateLimits {
        RateLimits::default()
    }

    pub fn is_unlimited(&self) -> bool {
        *self == RateLimits::default()
    }
}

/// Describes the client to build. The strings are opaque to the registry.
#[derive(Clone)]
pub struct ClientOptions {
    pub kind: ClientKind,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub limits: RateLimits,
}

impl ClientOptions {
    pub fn new(kind: ClientKind, model_id: &str) -> ClientOptions {
        ClientOptions {
            kind,
            model_id: model_id.to_string(),
            endpoint: None,
            api_key: None,
            limits: RateLimits::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> ClientOptions {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> ClientOptions {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_limits(mut self, limits: RateLimits) -> ClientOptions {
        self.limits = limits;
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("kind", &self.kind)
            .field("model_id", &self.model_id)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("limits", &self.limits)
            .finish()
    }
}

/// A handle produced by a [`ClientFactory`].
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Releases whatever the client holds. The registry calls this exactly
    /// once when the owning entry is torn down. Callers may still hold an
    /// `Arc` to the client afterwards.
    async fn close(&self) {}
}

/// Builds a client from its options. The registry invokes a factory at
/// most once per successful entry lifetime, and again only after a failed
/// attempt.
///
/// `cancel` fires when the entry is removed while the build is in flight.
#[async_trait]
pub trait ClientFactory<C>: Send + Sync {
    async fn build(
        &self,
        options: &ClientOptions,
        cancel: CancellationToken,
    ) -> Result<C, BoxError>;
}

/// Adapts a closure into a [`ClientFactory`].
pub struct FnFactory<F>(F);

pub fn factory_fn<C, F, Fut>(f: F) -> FnFactory<F>
where
    F: Fn(ClientOptions, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, BoxError>> + Send,
{
    FnFactory(f)
}

#[async_trait]
impl<C, F, Fut> ClientFactory<C> for FnFactory<F>
where
    C: Send + 'static,
    F: Fn(ClientOptions, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, BoxError>> + Send,
{
    async fn build(
        &self,
        options: &ClientOptions,
        cancel: CancellationToken,
    ) -> Result<C, BoxError> {
        (self.0)(options.clone(), cancel).await
    }
}

/// Runs after an entry has been torn down, whether by unregistration,
/// replacement or shutdown. Used to release resources that were acquired
/// alongside the client, such as a cached transport.
#[async_trait]
pub trait RemovalHook: Send + Sync {
    async fn on_removed(&self, key: &RegistrationKey);
}

/// Everything the registry needs to build and later tear down one client.
pub struct RegistrationOptions<C> {
    pub client: ClientOptions,
    pub factory: Arc<dyn ClientFactory<C>>,
    pub on_removed: Option<Arc<dyn RemovalHook>>,
}

impl<C> RegistrationOptions<C> {
    pub fn new<F>(client: ClientOptions, factory: F) -> RegistrationOptions<C>
    where
        F: ClientFactory<C> + 'static,
    {
        RegistrationOptions {
            client,
            factory: Arc::new(factory),
            on_removed: None,
        }
    }

    pub fn with_removal_hook<H>(mut self, hook: H) -> RegistrationOptions<C>
    where
        H: RemovalHook + 'static,
    {
        self.on_removed = Some(Arc::new(hook));
        self
    }
}

impl<C> fmt::Debug for RegistrationOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationOptions")
            .field("client", &self.client)
            .field("on_removed", &self.on_removed.is_some())
            .finish_non_exhaustive()
    }
}
