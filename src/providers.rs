//! Provider adapters: thin functions that turn provider parameters into a
//! registry registration.
//!
//! Every adapter registers a [`ModelClient`], a small authenticated HTTP
//! client bound to one model and one API route. The factory the adapters
//! install takes its HTTP transport from the shared [`HttpClientCache`]
//! under the key `"<provider>:<pool_id>:<key>"` and installs a removal hook
//! that releases that transport when the entry goes away.
//!
//! ## Providers
//!
//! - [`openai`]: any OpenAI-compatible endpoint. Supports every
//!   [`ClientKind`].
//! - [`ollama`]: a local Ollama server. Supports chat and embedding only;
//!   other kinds fail at construction time.

pub mod client;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::pool::{
    BoxError, ClientFactory, ClientKind, ClientOptions, RateLimits, Registry, RegistrationKey,
    RegistrationOptions, RegistryError, RemovalHook, Unregistered,
};
use crate::transport::{HttpClientCache, HttpClientOptions, TransportError};

pub use client::{ApiError, ApiErrorPayload, ModelClient};

/// The `ProviderIdentifier` is a unique per-provider identifier.
///
/// The `to_string` and `FromStr` forms are used in transport cache keys,
/// the config file and the CLI, and should remain stable.
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
pub enum ProviderIdentifier {
    Ollama,
    OpenAI,
}

impl ProviderIdentifier {
    /// The API route serving `kind`, relative to the API base, or `None`
    /// if the provider cannot serve it.
    pub fn route(&self, kind: ClientKind) -> Option<&'static str> {
        match self {
            ProviderIdentifier::OpenAI => openai::route(kind),
            ProviderIdentifier::Ollama => ollama::route(kind),
        }
    }

    pub fn default_api_base(&self) -> &'static Url {
        match self {
            ProviderIdentifier::OpenAI => &openai::DEFAULT_API_BASE,
            ProviderIdentifier::Ollama => &ollama::DEFAULT_API_BASE,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderIdentifier::OpenAI)
    }
}

/// Errors raised while building a [`ModelClient`]. The registry reports
/// them as construction failures.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("provider \"{provider}\" does not support {kind} clients")]
    UnsupportedKind {
        provider: ProviderIdentifier,
        kind: ClientKind,
    },
    #[error("provider \"{0}\" requires an api key")]
    MissingApiKey(ProviderIdentifier),
    #[error("invalid endpoint \"{0}\"")]
    InvalidEndpoint(String, #[source] url::ParseError),
    #[error("failed to acquire a transport")]
    Transport(#[from] TransportError),
}

/// The default per-request timeout of adapter transports
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Provider-independent parameters of one registration
#[derive(Debug, Clone)]
pub struct ModelRegistration {
    pub pool_id: String,
    pub key: String,
    pub kind: ClientKind,
    pub model_id: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub limits: RateLimits,
    pub timeout: Duration,
}

impl ModelRegistration {
    pub fn new(pool_id: &str, key: &str, kind: ClientKind, model_id: &str) -> ModelRegistration {
        ModelRegistration {
            pool_id: pool_id.to_string(),
            key: key.to_string(),
            kind,
            model_id: model_id.to_string(),
            api_key: None,
            endpoint: None,
            limits: RateLimits::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> ModelRegistration {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> ModelRegistration {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_limits(mut self, limits: RateLimits) -> ModelRegistration {
        self.limits = limits;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ModelRegistration {
        self.timeout = timeout;
        self
    }

    fn registration_key(&self) -> RegistrationKey {
        RegistrationKey::new(&self.pool_id, &self.key)
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            kind: self.kind,
            model_id: self.model_id.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            limits: self.limits,
        }
    }
}

/// Parses an API base, making sure its path ends in a slash so routes are
/// joined below it rather than replacing its last segment.
pub(crate) fn parse_api_base(endpoint: &str) -> Result<Url, AdapterError> {
    let mut url =
        Url::parse(endpoint).map_err(|e| AdapterError::InvalidEndpoint(endpoint.to_string(), e))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

enum Transport {
    /// Shared through the cache under `key`
    Cached {
        cache: Arc<HttpClientCache>,
        key: String,
        timeout: Duration,
    },
    /// Owned by the client alone
    Dedicated { timeout: Duration },
}

struct HttpModelFactory {
    provider: ProviderIdentifier,
    transport: Transport,
}

impl HttpModelFactory {
    async fn http_client(
        &self,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Client, AdapterError> {
        match &self.transport {
            Transport::Cached {
                cache,
                key,
                timeout,
            } => {
                let timeout = *timeout;

                Ok(cache
                    .get(key, || HttpClientOptions::with_timeout(timeout), cancel)
                    .await?)
            }
            Transport::Dedicated { timeout } => HttpClientOptions::with_timeout(*timeout)
                .build()
                .map_err(|e| TransportError::BuildFailed(self.provider.to_string(), e).into()),
        }
    }
}

#[async_trait]
impl ClientFactory<ModelClient> for HttpModelFactory {
    async fn build(
        &self,
        options: &ClientOptions,
        cancel: CancellationToken,
    ) -> Result<ModelClient, BoxError> {
        let route = self
            .provider
            .route(options.kind)
            .ok_or(AdapterError::UnsupportedKind {
                provider: self.provider,
                kind: options.kind,
            })?;

        if self.provider.requires_api_key() && options.api_key.is_none() {
            return Err(AdapterError::MissingApiKey(self.provider).into());
        }

        let api_base = match &options.endpoint {
            Some(endpoint) => parse_api_base(endpoint)?,
            None => self.provider.default_api_base().clone(),
        };

        let url = api_base
            .join(route)
            .map_err(|e| AdapterError::InvalidEndpoint(api_base.to_string(), e))?;

        let http = self.http_client(&cancel).await?;

        Ok(ModelClient::new(
            self.provider,
            options.kind,
            &options.model_id,
            url,
            options.api_key.clone(),
            http,
        ))
    }
}

/// Releases the cached transport of a removed entry.
struct ReleaseTransport {
    provider: ProviderIdentifier,
    cache: Arc<HttpClientCache>,
}

#[async_trait]
impl RemovalHook for ReleaseTransport {
    async fn on_removed(&self, key: &RegistrationKey) {
        let transport_key = key.transport_key(&self.provider.to_string());

        // The hook is the last step of a teardown and is never cancelled.
        let _ = self
            .cache
            .remove(&transport_key, &CancellationToken::new())
            .await;

        debug!(key = %key, transport = %transport_key, "released transport");
    }
}

/// Registers a model served by `provider`, sharing its transport through
/// `cache`. The transport is released when the entry is removed.
pub async fn add_model(
    registry: &Registry<ModelClient>,
    cache: &Arc<HttpClientCache>,
    provider: ProviderIdentifier,
    registration: ModelRegistration,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    let key = registration.registration_key();

    let factory = HttpModelFactory {
        provider,
        transport: Transport::Cached {
            cache: Arc::clone(cache),
            key: key.transport_key(&provider.to_string()),
            timeout: registration.timeout,
        },
    };

    let options = RegistrationOptions::new(registration.client_options(), factory)
        .with_removal_hook(ReleaseTransport {
            provider,
            cache: Arc::clone(cache),
        });

    registry
        .register(&registration.pool_id, &registration.key, options, cancel)
        .await
}

/// Registers a model with a transport of its own, bypassing the cache.
pub async fn add_model_uncached(
    registry: &Registry<ModelClient>,
    provider: ProviderIdentifier,
    registration: ModelRegistration,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    let factory = HttpModelFactory {
        provider,
        transport: Transport::Dedicated {
            timeout: registration.timeout,
        },
    };

    let options = RegistrationOptions::new(registration.client_options(), factory);

    registry
        .register(&registration.pool_id, &registration.key, options, cancel)
        .await
}

/// Unregisters a model and waits for its teardown. A cached transport is
/// released by the removal hook [`add_model`] installs, before this returns,
/// so a transport acquired by a later registration of the same key is never
/// touched.
pub async fn remove_model(
    registry: &Registry<ModelClient>,
    provider: ProviderIdentifier,
    pool_id: &str,
    key: &str,
    cancel: &CancellationToken,
) -> Result<Unregistered, RegistryError> {
    let removed = registry.unregister(pool_id, key, cancel).await?;

    debug!(
        provider = %provider,
        pool = pool_id,
        key = key,
        result = ?removed,
        "removed model"
    );

    Ok(removed)
}
