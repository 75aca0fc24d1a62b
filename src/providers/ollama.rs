//! Registration helpers for a local Ollama server

use lazy_static::lazy_static;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{add_model, remove_model, ModelClient, ModelRegistration, ProviderIdentifier};
use crate::pool::{ClientKind, Registry, RegistryError, Unregistered};
use crate::transport::HttpClientCache;

lazy_static! {
    pub(super) static ref DEFAULT_API_BASE: Url = Url::parse("http://localhost:11434/api/")
        .expect("the default Ollama API base is a valid URL");
}

/// Ollama serves chat and embeddings only
pub(super) fn route(kind: ClientKind) -> Option<&'static str> {
    match kind {
        ClientKind::Chat => Some("chat"),
        ClientKind::Embedding => Some("embed"),
        ClientKind::Audio | ClientKind::Image => None,
    }
}

pub async fn add_ollama(
    registry: &Registry<ModelClient>,
    cache: &Arc<HttpClientCache>,
    registration: ModelRegistration,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    add_model(registry, cache, ProviderIdentifier::Ollama, registration, cancel).await
}

pub async fn remove_ollama(
    registry: &Registry<ModelClient>,
    pool_id: &str,
    key: &str,
    cancel: &CancellationToken,
) -> Result<Unregistered, RegistryError> {
    remove_model(registry, ProviderIdentifier::Ollama, pool_id, key, cancel).await
}
