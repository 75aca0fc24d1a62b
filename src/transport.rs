//! A keyed cache of HTTP clients.
//!
//! Model clients built by the adapters share their transport through this
//! cache. Entries are created on first use and released explicitly, usually
//! from a registry removal hook. `reqwest::Client` is reference counted, so
//! a removed entry stays usable by whoever still holds a clone.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to build the HTTP client for \"{0}\"")]
    BuildFailed(String, #[source] reqwest::Error),
    #[error("the operation was cancelled")]
    Cancelled,
}

/// Settings for a newly created HTTP client
#[derive(Debug, Clone, Default)]
pub struct HttpClientOptions {
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub pool_idle_timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl HttpClientOptions {
    pub fn with_timeout(timeout: Duration) -> HttpClientOptions {
        HttpClientOptions {
            timeout: Some(timeout),
            ..HttpClientOptions::default()
        }
    }

    pub(crate) fn build(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(timeout) = self.pool_idle_timeout {
            builder = builder.pool_idle_timeout(timeout);
        }

        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| concat!("modelpool/", env!("CARGO_PKG_VERSION")).to_string());

        builder.user_agent(user_agent).build()
    }
}

#[derive(Default)]
pub struct HttpClientCache {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpClientCache {
    pub fn new() -> HttpClientCache {
        HttpClientCache::default()
    }

    /// Returns the client cached under `key`, creating it with the options
    /// produced by `options` on a miss. `options` is only called on a miss.
    pub async fn get<F>(
        &self,
        key: &str,
        options: F,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Client, TransportError>
    where
        F: FnOnce() -> HttpClientOptions,
    {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let mut clients = self.clients.lock();

        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        let client = options()
            .build()
            .map_err(|e| TransportError::BuildFailed(key.to_string(), e))?;

        debug!(key, "created HTTP client");

        clients.insert(key.to_string(), client.clone());

        Ok(client)
    }

    /// Drops the client cached under `key`. Returns whether it was present.
    pub async fn remove(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let removed = self.clients.lock().remove(key).is_some();

        if removed {
            debug!(key, "released HTTP client");
        }

        Ok(removed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.clients.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
