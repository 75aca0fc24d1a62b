use core::fmt;
use serde::Serialize;

/// Identifies one registration: a logical model `key` inside the pool
/// `pool_id`. The registry holds at most one live entry per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegistrationKey {
    pub pool_id: String,
    pub key: String,
}

impl RegistrationKey {
    pub fn new(pool_id: &str, key: &str) -> RegistrationKey {
        RegistrationKey {
            pool_id: pool_id.to_string(),
            key: key.to_string(),
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The transport cache key for `provider`. Keys are unique per
    /// provider, pool and model key so unrelated providers never share a
    /// transport.
    pub fn transport_key(&self, provider: &str) -> String {
        format!("{}:{}:{}", provider, self.pool_id, self.key)
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool_id, self.key)
    }
}
