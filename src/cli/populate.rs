use std::collections::HashMap;
use std::env::VarError;
use std::sync::Arc;
use std::time::Duration;

use modelpool::providers::{
    add_model, ModelClient, ModelRegistration, ProviderIdentifier, DEFAULT_TIMEOUT,
};
use modelpool::transport::HttpClientCache;
use modelpool::{CancellationToken, RegistrationKey, Registry};

use crate::config::{Config, Model};
use crate::{die, warn};

const OPENAI_ENV_KEY_VAR: &str = "OPENAI_API_KEY";

fn openai_api_key() -> Option<String> {
    match std::env::var(OPENAI_ENV_KEY_VAR) {
        Ok(api_key) => Some(api_key),
        Err(err) => match err {
            VarError::NotUnicode(_) => die!("failed to parse {}", OPENAI_ENV_KEY_VAR),
            VarError::NotPresent => None,
        },
    }
}

/// A registry filled from the `[[models]]` section of the config
pub(crate) struct Populated {
    pub registry: Registry<ModelClient>,
    pub cache: Arc<HttpClientCache>,
    pub providers: HashMap<RegistrationKey, ProviderIdentifier>,
}

impl Populated {
    pub(crate) fn provider(&self, key: &RegistrationKey) -> Option<ProviderIdentifier> {
        self.providers.get(key).copied()
    }

    pub(crate) async fn shutdown(self) {
        self.registry.shutdown().await;

        tracing::debug!(transports = self.cache.len(), "registry shut down");
    }
}

fn registration(model: &Model, api_key: Option<&str>, timeout: Duration) -> ModelRegistration {
    let mut registration =
        ModelRegistration::new(&model.pool, &model.key, model.kind, &model.model_id)
            .with_limits(model.limits)
            .with_timeout(timeout);

    if let Some(api_key) = api_key {
        registration = registration.with_api_key(api_key);
    }

    if let Some(endpoint) = &model.endpoint {
        registration = registration.with_endpoint(endpoint);
    }

    registration
}

/// Registers every configured model. Nothing is built until it is resolved.
pub(crate) async fn populated_registry(config: &Config, cancel: &CancellationToken) -> Populated {
    let registry = Registry::new(config.registry);
    let cache = Arc::new(HttpClientCache::new());
    let mut providers = HashMap::new();

    let timeout = config
        .transport
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let openai_env_var = openai_api_key();

    for model in &config.models {
        let api_key = match (model.provider, &model.api_key) {
            (_, Some(api_key)) => Some(api_key.as_str()),
            (ProviderIdentifier::OpenAI, None) => openai_env_var.as_deref(),
            (ProviderIdentifier::Ollama, None) => None,
        };

        if model.provider.requires_api_key() && api_key.is_none() {
            warn!(
                "skipping \"{}/{}\": the \"{}\" provider needs an API key, \
                 either add it to the config or define {}",
                model.pool, model.key, model.provider, OPENAI_ENV_KEY_VAR
            );
            continue;
        }

        let registration = registration(model, api_key, timeout);

        if let Err(err) = add_model(&registry, &cache, model.provider, registration, cancel).await {
            die!("failed to register \"{}/{}\": {}", model.pool, model.key, err);
        }

        providers.insert(RegistrationKey::new(&model.pool, &model.key), model.provider);
    }

    Populated {
        registry,
        cache,
        providers,
    }
}
