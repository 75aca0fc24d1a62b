//! A single registration and its construction protocol.
//!
//! The slot moves `Unbuilt -> Building -> Built`, falls back from `Building`
//! to `Unbuilt` when the factory fails, and ends in `Removed`. A build runs
//! on its own task; callers only hold a shared handle to its outcome, so
//! dropping a waiter never aborts the build for anyone else.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BuildError, Client, ClientKind, RateLimits, RegistrationKey, RegistrationOptions};

pub(super) type BuildOutcome<C> = Result<Arc<C>, BuildError>;

/// A handle to an in-flight construction, shared by every waiter.
pub(super) type Build<C> = Shared<BoxFuture<'static, BuildOutcome<C>>>;

/// Completes once a removed entry has been fully torn down.
pub(super) type Teardown = Shared<BoxFuture<'static, ()>>;

enum Slot<C> {
    Unbuilt,
    Building(Build<C>),
    Built(Arc<C>),
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryState {
    Unbuilt,
    Building,
    Built,
    Removed,
}

/// A copy of an entry's metadata. The api key is never included.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    #[serde(flatten)]
    pub key: RegistrationKey,
    pub kind: ClientKind,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub limits: RateLimits,
    pub state: EntryState,
}

pub(super) enum Acquire<C> {
    Ready(Arc<C>),
    Pending(Build<C>),
    Removed,
}

pub(super) struct PoolEntry<C> {
    key: RegistrationKey,
    options: RegistrationOptions<C>,
    slot: Mutex<Slot<C>>,
    /// Fired when the entry is removed. In-flight builds observe it.
    removed: CancellationToken,
    /// Teardown of the entry this one replaced. Construction waits for it
    /// so two clients never live under one key.
    predecessor: Option<Teardown>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<C: Client> PoolEntry<C> {
    pub(super) fn new(
        key: RegistrationKey,
        options: RegistrationOptions<C>,
        predecessor: Option<Teardown>,
    ) -> Arc<PoolEntry<C>> {
        Arc::new(PoolEntry {
            key,
            options,
            slot: Mutex::new(Slot::Unbuilt),
            removed: CancellationToken::new(),
            predecessor,
        })
    }

    pub(super) fn state(&self) -> EntryState {
        match &*self.slot.lock() {
            Slot::Unbuilt => EntryState::Unbuilt,
            Slot::Building(_) => EntryState::Building,
            Slot::Built(_) => EntryState::Built,
            Slot::Removed => EntryState::Removed,
        }
    }

    pub(super) fn info(&self) -> EntryInfo {
        let client = &self.options.client;

        EntryInfo {
            key: self.key.clone(),
            kind: client.kind,
            model_id: client.model_id.clone(),
            endpoint: client.endpoint.clone(),
            limits: client.limits,
            state: self.state(),
        }
    }

    pub(super) fn limits(&self) -> RateLimits {
        self.options.client.limits
    }

    /// Returns the built client, or the build to wait on. The first caller
    /// to find the slot unbuilt starts the build.
    pub(super) fn acquire(self: &Arc<Self>) -> Acquire<C> {
        let mut slot = self.slot.lock();

        match &*slot {
            Slot::Built(client) => Acquire::Ready(Arc::clone(client)),
            Slot::Building(build) => Acquire::Pending(build.clone()),
            Slot::Removed => Acquire::Removed,
            Slot::Unbuilt => {
                let build = self.start_build();

                *slot = Slot::Building(build.clone());

                Acquire::Pending(build)
            }
        }
    }

    fn start_build(self: &Arc<Self>) -> Build<C> {
        let entry = Arc::clone(self);

        let handle = tokio::spawn(async move { entry.run_build().await });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(BuildError::Panicked(err.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    async fn construct(&self) -> BuildOutcome<C> {
        if let Some(teardown) = &self.predecessor {
            teardown.clone().await;
        }

        debug!(key = %self.key, model = %self.options.client.model_id, "building client");

        let build = self
            .options
            .factory
            .build(&self.options.client, self.removed.child_token());

        match AssertUnwindSafe(build).catch_unwind().await {
            Ok(Ok(client)) => Ok(Arc::new(client)),
            Ok(Err(err)) => Err(BuildError::Factory(Arc::from(err))),
            Err(payload) => Err(BuildError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    async fn run_build(self: Arc<Self>) -> BuildOutcome<C> {
        let outcome = tokio::select! {
            biased;
            _ = self.removed.cancelled() => Err(BuildError::Cancelled),
            outcome = self.construct() => outcome,
        };

        self.settle(outcome).await
    }

    /// Records the outcome of a build. A client that finishes after its
    /// entry was removed is closed here and never handed out.
    async fn settle(&self, outcome: BuildOutcome<C>) -> BuildOutcome<C> {
        let orphan = {
            let mut slot = self.slot.lock();

            match &*slot {
                Slot::Building(_) => {
                    *slot = match &outcome {
                        Ok(client) => Slot::Built(Arc::clone(client)),
                        Err(_) => Slot::Unbuilt,
                    };

                    None
                }
                _ => Some(outcome.as_ref().ok().cloned()),
            }
        };

        match orphan {
            None => {
                match &outcome {
                    Ok(_) => debug!(key = %self.key, "client built"),
                    Err(err) => warn!(key = %self.key, error = %err, "client construction failed"),
                }

                outcome
            }
            Some(client) => {
                if let Some(client) = client {
                    client.close().await;
                }

                Err(BuildError::Cancelled)
            }
        }
    }

    /// Marks the entry removed and starts its teardown on a separate task:
    /// the in-flight build is cancelled and awaited, a built client is
    /// closed, and finally the removal hook runs.
    ///
    /// Must be called at most once per entry, by whoever took it out of the
    /// registry map.
    pub(super) fn remove(self: &Arc<Self>) -> Teardown {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Removed);

        self.removed.cancel();

        let entry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            match previous {
                Slot::Built(client) => client.close().await,
                Slot::Building(build) => {
                    let _ = build.await;
                }
                Slot::Unbuilt | Slot::Removed => {}
            }

            if let Some(hook) = &entry.options.on_removed {
                hook.on_removed(&entry.key).await;
            }

            info!(key = %entry.key, "entry removed");
        });

        async move {
            let _ = handle.await;
        }
        .boxed()
        .shared()
    }
}
