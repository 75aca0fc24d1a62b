//! Registration helpers for OpenAI-compatible endpoints

use lazy_static::lazy_static;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    add_model, add_model_uncached, remove_model, ModelClient, ModelRegistration, ProviderIdentifier,
};
use crate::pool::{ClientKind, RateLimits, Registry, RegistryError, Unregistered};
use crate::transport::HttpClientCache;

lazy_static! {
    pub(super) static ref DEFAULT_API_BASE: Url = Url::parse("https://api.openai.com/v1/")
        .expect("the default OpenAI API base is a valid URL");
}

pub(super) fn route(kind: ClientKind) -> Option<&'static str> {
    match kind {
        ClientKind::Chat => Some("chat/completions"),
        ClientKind::Audio => Some("audio/speech"),
        ClientKind::Image => Some("images/generations"),
        ClientKind::Embedding => Some("embeddings"),
    }
}

/// Registers an OpenAI model of any kind. Its transport is shared through
/// `cache` under `openai:<pool_id>:<key>` and released on removal.
pub async fn add_openai(
    registry: &Registry<ModelClient>,
    cache: &Arc<HttpClientCache>,
    registration: ModelRegistration,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    add_model(registry, cache, ProviderIdentifier::OpenAI, registration, cancel).await
}

/// Unregisters an OpenAI model. Its transport cache entry is released by the
/// removal hook before this returns.
pub async fn remove_openai(
    registry: &Registry<ModelClient>,
    pool_id: &str,
    key: &str,
    cancel: &CancellationToken,
) -> Result<Unregistered, RegistryError> {
    remove_model(registry, ProviderIdentifier::OpenAI, pool_id, key, cancel).await
}

/// Registers an OpenAI chat model with a dedicated transport.
#[allow(clippy::too_many_arguments)]
pub async fn register_openai_chat(
    registry: &Registry<ModelClient>,
    pool_id: &str,
    key: &str,
    model_id: &str,
    api_key: &str,
    endpoint: Option<&str>,
    limits: RateLimits,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    let mut registration = ModelRegistration::new(pool_id, key, ClientKind::Chat, model_id)
        .with_api_key(api_key)
        .with_limits(limits);

    if let Some(endpoint) = endpoint {
        registration = registration.with_endpoint(endpoint);
    }

    add_model_uncached(registry, ProviderIdentifier::OpenAI, registration, cancel).await
}
