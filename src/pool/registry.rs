use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::entry::{Acquire, PoolEntry, Teardown};
use super::{
    BuildError, Client, EntryInfo, RateLimits, RegistrationKey, RegistrationOptions,
    RegistryError,
};

/// What `register` does when the key is already live.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Tear down the live entry and install the new one
    #[default]
    Replace,
    /// Fail with [`RegistryError::DuplicateRegistration`]
    Reject,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

/// The result of [`Registry::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    Removed,
    NotFound,
}

/// A keyed registry of lazily built clients.
///
/// Entries are registered cheaply and built on first [`Registry::resolve`].
/// Concurrent resolves of one entry share a single construction. The map
/// lock is only held for lookups and swaps; builds and teardowns happen
/// outside it, so unrelated keys never wait on each other.
///
/// The registry has no implicit lifetime: call [`Registry::shutdown`] to
/// close every remaining client.
pub struct Registry<C> {
    entries: RwLock<HashMap<RegistrationKey, Arc<PoolEntry<C>>>>,
    config: RegistryConfig,
}

impl<C: Client> Default for Registry<C> {
    fn default() -> Self {
        Registry::new(RegistryConfig::default())
    }
}

fn validate<C>(
    pool_id: &str,
    key: &str,
    options: &RegistrationOptions<C>,
) -> Result<RegistrationKey, RegistryError> {
    if pool_id.is_empty() {
        return Err(RegistryError::InvalidOptions(
            "the pool id must not be empty".to_string(),
        ));
    }

    if key.is_empty() {
        return Err(RegistryError::InvalidOptions(
            "the key must not be empty".to_string(),
        ));
    }

    if options.client.model_id.is_empty() {
        return Err(RegistryError::InvalidOptions(
            "the model id must not be empty".to_string(),
        ));
    }

    Ok(RegistrationKey::new(pool_id, key))
}

async fn await_teardowns(
    teardowns: Vec<Teardown>,
    cancel: &CancellationToken,
) -> Result<(), RegistryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        _ = join_all(teardowns) => Ok(()),
    }
}

impl<C: Client> Registry<C> {
    pub fn new(config: RegistryConfig) -> Registry<C> {
        Registry {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn entry(&self, key: &RegistrationKey) -> Option<Arc<PoolEntry<C>>> {
        self.entries.read().get(key).cloned()
    }

    /// Registers a client under `pool_id`/`key` without building it.
    ///
    /// When the key is live, the duplicate policy decides. On replacement
    /// the previous entry is torn down in the background and the new entry's
    /// first build waits for that teardown to finish.
    pub async fn register(
        &self,
        pool_id: &str,
        key: &str,
        options: RegistrationOptions<C>,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        let key = validate(pool_id, key, &options)?;

        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let mut entries = self.entries.write();

        let predecessor = if entries.contains_key(&key) {
            if self.config.on_duplicate == DuplicatePolicy::Reject {
                return Err(RegistryError::DuplicateRegistration(key));
            }

            entries.remove(&key).map(|previous| previous.remove())
        } else {
            None
        };

        debug!(
            key = %key,
            kind = %options.client.kind,
            model = %options.client.model_id,
            replaced = predecessor.is_some(),
            "registered client"
        );

        entries.insert(key.clone(), PoolEntry::new(key, options, predecessor));

        Ok(())
    }

    /// Returns the client for `pool_id`/`key`, building it on first use.
    ///
    /// Cancelling `cancel` abandons only this caller's wait. The build keeps
    /// running for everyone else.
    pub async fn resolve(
        &self,
        pool_id: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<C>, RegistryError> {
        let key = RegistrationKey::new(pool_id, key);

        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        // An entry removed under us may already have a successor; retry
        // against whatever is registered now.
        loop {
            let entry = self
                .entry(&key)
                .ok_or_else(|| RegistryError::NotRegistered(key.clone()))?;

            let build = match entry.acquire() {
                Acquire::Ready(client) => return Ok(client),
                Acquire::Removed => continue,
                Acquire::Pending(build) => build,
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
                outcome = build => outcome,
            };

            match outcome {
                Ok(client) => return Ok(client),
                Err(BuildError::Cancelled) => continue,
                Err(source) => return Err(RegistryError::ConstructionFailed { key, source }),
            }
        }
    }

    /// Removes `pool_id`/`key`, waiting until its client is closed and its
    /// removal hook has run.
    ///
    /// The removal takes effect as soon as it starts. If `cancel` fires
    /// while waiting, [`RegistryError::Cancelled`] is returned and the
    /// teardown finishes in the background.
    pub async fn unregister(
        &self,
        pool_id: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Unregistered, RegistryError> {
        let key = RegistrationKey::new(pool_id, key);

        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let removed = self.entries.write().remove(&key);

        let entry = match removed {
            Some(entry) => entry,
            None => return Ok(Unregistered::NotFound),
        };

        await_teardowns(vec![entry.remove()], cancel).await?;

        Ok(Unregistered::Removed)
    }

    /// Unregisters every entry in `pool_id` and returns how many there were.
    pub async fn remove_pool(
        &self,
        pool_id: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, RegistryError> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let removed: Vec<Arc<PoolEntry<C>>> = {
            let mut entries = self.entries.write();

            let keys: Vec<RegistrationKey> = entries
                .keys()
                .filter(|key| key.pool_id == pool_id)
                .cloned()
                .collect();

            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };

        let count = removed.len();

        let teardowns = removed.iter().map(|entry| entry.remove()).collect();

        await_teardowns(teardowns, cancel).await?;

        Ok(count)
    }

    /// Tears down every entry and waits for all of them.
    pub async fn shutdown(&self) {
        let removed: Vec<Arc<PoolEntry<C>>> = self
            .entries
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        debug!(entries = removed.len(), "shutting down registry");

        join_all(removed.iter().map(|entry| entry.remove())).await;
    }

    pub fn contains(&self, pool_id: &str, key: &str) -> bool {
        self.entries
            .read()
            .contains_key(&RegistrationKey::new(pool_id, key))
    }

    pub fn rate_limits(&self, pool_id: &str, key: &str) -> Option<RateLimits> {
        self.entry(&RegistrationKey::new(pool_id, key))
            .map(|entry| entry.limits())
    }

    pub fn info(&self, pool_id: &str, key: &str) -> Option<EntryInfo> {
        self.entry(&RegistrationKey::new(pool_id, key))
            .map(|entry| entry.info())
    }

    /// A snapshot of the registered entries, optionally limited to one
    /// pool, ordered by key.
    pub fn list(&self, pool_id: Option<&str>) -> Vec<EntryInfo> {
        let entries: Vec<Arc<PoolEntry<C>>> = self.entries.read().values().cloned().collect();

        let mut infos: Vec<EntryInfo> = entries
            .iter()
            .map(|entry| entry.info())
            .filter(|info| pool_id.map_or(true, |pool_id| info.key.pool_id == pool_id))
            .collect();

        infos.sort_by(|a, b| a.key.cmp(&b.key));

        infos
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BoxError, ClientFactory, ClientKind, ClientOptions, EntryState, RemovalHook};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct TestClient {
        id: usize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Client for TestClient {
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct Counters {
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Counters {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct CountingFactory {
        counters: Counters,
        delay: Duration,
        fail_first: usize,
    }

    #[async_trait]
    impl ClientFactory<TestClient> for CountingFactory {
        async fn build(
            &self,
            _options: &ClientOptions,
            _cancel: CancellationToken,
        ) -> Result<TestClient, BoxError> {
            let attempt = self.counters.calls.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            if attempt < self.fail_first {
                return Err("upstream unavailable".into());
            }

            Ok(TestClient {
                id: attempt,
                closed: self.counters.closed.clone(),
            })
        }
    }

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl RemovalHook for CountingHook {
        async fn on_removed(&self, _key: &RegistrationKey) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options(
        counters: &Counters,
        delay: Duration,
        fail_first: usize,
    ) -> RegistrationOptions<TestClient> {
        let client = ClientOptions::new(ClientKind::Chat, "m1");

        RegistrationOptions::new(
            client,
            CountingFactory {
                counters: counters.clone(),
                delay,
                fail_first,
            },
        )
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_build_once() {
        let registry = Arc::new(Registry::default());
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::from_millis(50), 0), &token())
            .await
            .unwrap();

        let mut handles = Vec::new();

        for _ in 0..16 {
            let registry = Arc::clone(&registry);

            handles.push(tokio::spawn(async move {
                registry.resolve("pool1", "gpt", &token()).await
            }));
        }

        let mut clients = Vec::new();

        for handle in handles {
            clients.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(counters.calls(), 1);

        for client in &clients {
            assert!(Arc::ptr_eq(client, &clients[0]));
        }
    }

    #[tokio::test]
    async fn test_register_does_not_build() {
        let registry = Registry::default();
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 0), &token())
            .await
            .unwrap();

        assert_eq!(counters.calls(), 0);
        assert_eq!(registry.info("pool1", "gpt").unwrap().state, EntryState::Unbuilt);
    }

    #[tokio::test]
    async fn test_resolve_before_register_fails() {
        let registry: Registry<TestClient> = Registry::default();

        let result = registry.resolve("pool1", "gpt", &token()).await;

        assert!(matches!(result, Err(RegistryError::NotRegistered(key)) if key.key == "gpt"));
    }

    #[tokio::test]
    async fn test_unregister_twice_reports_not_found() {
        let registry = Registry::default();
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 0), &token())
            .await
            .unwrap();

        let first = registry.unregister("pool1", "gpt", &token()).await.unwrap();
        let second = registry.unregister("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(first, Unregistered::Removed);
        assert_eq!(second, Unregistered::NotFound);
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let registry = Registry::default();
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 1), &token())
            .await
            .unwrap();

        let first = registry.resolve("pool1", "gpt", &token()).await;

        assert!(matches!(
            first,
            Err(RegistryError::ConstructionFailed {
                source: BuildError::Factory(_),
                ..
            })
        ));
        assert_eq!(registry.info("pool1", "gpt").unwrap().state, EntryState::Unbuilt);

        let second = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(second.id, 1);
        assert_eq!(counters.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_a_failure() {
        let registry = Arc::new(Registry::default());
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::from_millis(50), 1), &token())
            .await
            .unwrap();

        let a = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("pool1", "gpt", &token()).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("pool1", "gpt", &token()).await })
        };

        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert_eq!(counters.calls(), 1);
    }

    #[tokio::test]
    async fn test_replacement_isolates_generations() {
        let registry = Registry::default();
        let first = Counters::default();
        let second = Counters::default();

        registry
            .register("pool1", "gpt", options(&first, Duration::ZERO, 0), &token())
            .await
            .unwrap();

        let a = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        registry
            .register("pool1", "gpt", options(&second, Duration::ZERO, 0), &token())
            .await
            .unwrap();

        let b = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(first.closed(), 1);
        assert_eq!(second.closed(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_duplicates() {
        let registry = Registry::new(RegistryConfig {
            on_duplicate: DuplicatePolicy::Reject,
        });
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 0), &token())
            .await
            .unwrap();

        let result = registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 0), &token())
            .await;

        assert!(matches!(result, Err(RegistryError::DuplicateRegistration(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let registry = Registry::default();
        let counters = Counters::default();

        let empty_pool = registry
            .register("", "gpt", options(&counters, Duration::ZERO, 0), &token())
            .await;
        let empty_key = registry
            .register("pool1", "", options(&counters, Duration::ZERO, 0), &token())
            .await;

        let mut no_model = options(&counters, Duration::ZERO, 0);
        no_model.client.model_id.clear();

        let empty_model = registry.register("pool1", "gpt", no_model, &token()).await;

        assert!(matches!(empty_pool, Err(RegistryError::InvalidOptions(_))));
        assert!(matches!(empty_key, Err(RegistryError::InvalidOptions(_))));
        assert!(matches!(empty_model, Err(RegistryError::InvalidOptions(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_register_resolve_unregister() {
        let registry = Arc::new(Registry::default());
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::from_millis(20), 0), &token())
            .await
            .unwrap();

        let cancel = token();

        let (a, b) = tokio::join!(
            registry.resolve("pool1", "gpt", &cancel),
            registry.resolve("pool1", "gpt", &cancel)
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(counters.calls(), 1);

        let removed = registry.unregister("pool1", "gpt", &cancel).await.unwrap();

        assert_eq!(removed, Unregistered::Removed);
        assert_eq!(counters.closed(), 1);

        let result = registry.resolve("pool1", "gpt", &cancel).await;

        assert!(matches!(result, Err(RegistryError::NotRegistered(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_waiter_does_not_abort_build() {
        let registry = Arc::new(Registry::default());
        let counters = Counters::default();

        registry
            .register("pool1", "gpt", options(&counters, Duration::from_millis(100), 0), &token())
            .await
            .unwrap();

        let cancel = token();

        let waiter = {
            let registry = Arc::clone(&registry);
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.resolve("pool1", "gpt", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(RegistryError::Cancelled)));

        let client = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(client.id, 0);
        assert_eq!(counters.calls(), 1);
    }

    struct StallingFactory {
        started: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClientFactory<TestClient> for StallingFactory {
        async fn build(
            &self,
            _options: &ClientOptions,
            cancel: CancellationToken,
        ) -> Result<TestClient, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();

            cancel.cancelled().await;

            Err("cancelled".into())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unregister_during_build_cancels_it() {
        let registry = Arc::new(Registry::default());
        let started = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::new(AtomicUsize::new(0));

        let factory = StallingFactory {
            started: Arc::clone(&started),
            calls: Arc::clone(&calls),
        };

        let options = RegistrationOptions::new(ClientOptions::new(ClientKind::Chat, "m1"), factory)
            .with_removal_hook(CountingHook(Arc::clone(&hook_calls)));

        registry.register("pool1", "gpt", options, &token()).await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("pool1", "gpt", &token()).await })
        };

        started.notified().await;

        let removed = registry.unregister("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(removed, Unregistered::Removed);
        assert!(matches!(waiter.await.unwrap(), Err(RegistryError::NotRegistered(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    /// A removal hook that takes a while to finish
    struct SlowHook {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemovalHook for SlowHook {
        async fn on_removed(&self, _key: &RegistrationKey) {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records how many removal hooks had completed when it was called
    struct OrderingFactory {
        counters: Counters,
        hook_calls: Arc<AtomicUsize>,
        hooks_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClientFactory<TestClient> for OrderingFactory {
        async fn build(
            &self,
            _options: &ClientOptions,
            _cancel: CancellationToken,
        ) -> Result<TestClient, BoxError> {
            self.hooks_seen
                .store(self.hook_calls.load(Ordering::SeqCst), Ordering::SeqCst);

            let attempt = self.counters.calls.fetch_add(1, Ordering::SeqCst);

            Ok(TestClient {
                id: attempt,
                closed: self.counters.closed.clone(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replace_during_build_hands_out_the_successor() {
        let registry = Arc::new(Registry::default());
        let first = Counters::default();
        let second = Counters::default();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hooks_seen = Arc::new(AtomicUsize::new(usize::MAX));

        let old = options(&first, Duration::from_millis(200), 0).with_removal_hook(SlowHook {
            delay: Duration::from_millis(50),
            calls: Arc::clone(&hook_calls),
        });

        registry.register("pool1", "gpt", old, &token()).await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("pool1", "gpt", &token()).await })
        };

        while first.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let new = RegistrationOptions::new(
            ClientOptions::new(ClientKind::Chat, "m2"),
            OrderingFactory {
                counters: second.clone(),
                hook_calls: Arc::clone(&hook_calls),
                hooks_seen: Arc::clone(&hooks_seen),
            },
        );

        registry.register("pool1", "gpt", new, &token()).await.unwrap();

        let client = waiter.await.unwrap().unwrap();
        let again = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        assert!(Arc::ptr_eq(&client, &again));
        assert_eq!(first.calls(), 1);
        assert_eq!(first.closed(), 0);
        assert_eq!(second.calls(), 1);
        assert_eq!(hooks_seen.load(Ordering::SeqCst), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.info("pool1", "gpt").unwrap().model_id, "m2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_unregister_still_tears_down() {
        let registry = Registry::default();
        let counters = Counters::default();
        let hook_calls = Arc::new(AtomicUsize::new(0));

        let options = options(&counters, Duration::ZERO, 0).with_removal_hook(SlowHook {
            delay: Duration::from_millis(200),
            calls: Arc::clone(&hook_calls),
        });

        registry.register("pool1", "gpt", options, &token()).await.unwrap();
        registry.resolve("pool1", "gpt", &token()).await.unwrap();

        let cancel = token();

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            });
        }

        let result = registry.unregister("pool1", "gpt", &cancel).await;

        assert!(matches!(result, Err(RegistryError::Cancelled)));
        assert!(!registry.contains("pool1", "gpt"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while hook_calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let again = registry.unregister("pool1", "gpt", &token()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(again, Unregistered::NotFound);
        assert_eq!(counters.closed(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removal_hook_runs_once_after_close() {
        let registry = Registry::default();
        let counters = Counters::default();
        let hook_calls = Arc::new(AtomicUsize::new(0));

        let options = options(&counters, Duration::ZERO, 0)
            .with_removal_hook(CountingHook(Arc::clone(&hook_calls)));

        registry.register("pool1", "gpt", options, &token()).await.unwrap();
        registry.resolve("pool1", "gpt", &token()).await.unwrap();

        registry.unregister("pool1", "gpt", &token()).await.unwrap();
        registry.unregister("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(counters.closed(), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_register_changes_nothing() {
        let registry = Registry::default();
        let counters = Counters::default();
        let cancel = token();

        cancel.cancel();

        let result = registry
            .register("pool1", "gpt", options(&counters, Duration::ZERO, 0), &cancel)
            .await;

        assert!(matches!(result, Err(RegistryError::Cancelled)));
        assert!(!registry.contains("pool1", "gpt"));
    }

    struct PanickingFactory {
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ClientFactory<TestClient> for PanickingFactory {
        async fn build(
            &self,
            _options: &ClientOptions,
            _cancel: CancellationToken,
        ) -> Result<TestClient, BoxError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);

            if attempt == 0 {
                panic!("factory exploded");
            }

            Ok(TestClient {
                id: attempt,
                closed: Arc::clone(&self.closed),
            })
        }
    }

    #[tokio::test]
    async fn test_factory_panic_is_reported_and_retried() {
        let registry = Registry::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let factory = PanickingFactory {
            calls: Arc::clone(&calls),
            closed: Arc::new(AtomicUsize::new(0)),
        };

        registry
            .register(
                "pool1",
                "gpt",
                RegistrationOptions::new(ClientOptions::new(ClientKind::Chat, "m1"), factory),
                &token(),
            )
            .await
            .unwrap();

        let first = registry.resolve("pool1", "gpt", &token()).await;

        assert!(matches!(
            first,
            Err(RegistryError::ConstructionFailed {
                source: BuildError::Panicked(ref message),
                ..
            }) if message.contains("exploded")
        ));

        let second = registry.resolve("pool1", "gpt", &token()).await.unwrap();

        assert_eq!(second.id, 1);
    }

    #[tokio::test]
    async fn test_list_exposes_metadata_only() {
        let registry = Registry::default();
        let counters = Counters::default();

        let limits = RateLimits {
            requests_per_minute: Some(60),
            ..RateLimits::default()
        };

        let mut first = options(&counters, Duration::ZERO, 0);
        first.client = first.client.with_api_key("sk-secret").with_limits(limits);

        registry.register("b", "gpt", first, &token()).await.unwrap();
        registry
            .register("a", "embed", options(&counters, Duration::ZERO, 0), &token())
            .await
            .unwrap();
        registry.resolve("b", "gpt", &token()).await.unwrap();

        let all = registry.list(None);

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, RegistrationKey::new("a", "embed"));
        assert_eq!(all[0].state, EntryState::Unbuilt);
        assert_eq!(all[1].state, EntryState::Built);
        assert_eq!(all[1].limits, limits);

        let rendered = serde_json::to_string(&all).unwrap();

        assert!(!rendered.contains("sk-secret"));

        assert_eq!(registry.list(Some("a")).len(), 1);
        assert_eq!(registry.rate_limits("b", "gpt"), Some(limits));
        assert_eq!(registry.rate_limits("b", "missing"), None);
    }

    #[tokio::test]
    async fn test_remove_pool_only_touches_that_pool() {
        let registry = Registry::default();
        let counters = Counters::default();

        for (pool, key) in [("a", "one"), ("a", "two"), ("b", "one")] {
            registry
                .register(pool, key, options(&counters, Duration::ZERO, 0), &token())
                .await
                .unwrap();
            registry.resolve(pool, key, &token()).await.unwrap();
        }

        let removed = registry.remove_pool("a", &token()).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(counters.closed(), 2);
        assert!(registry.contains("b", "one"));
        assert!(!registry.contains("a", "one"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_built_client() {
        let registry = Registry::default();
        let counters = Counters::default();

        for key in ["one", "two", "three"] {
            registry
                .register("pool1", key, options(&counters, Duration::ZERO, 0), &token())
                .await
                .unwrap();
        }

        registry.resolve("pool1", "one", &token()).await.unwrap();
        registry.resolve("pool1", "two", &token()).await.unwrap();

        registry.shutdown().await;

        assert_eq!(counters.closed(), 2);
        assert!(registry.is_empty());
    }
}
