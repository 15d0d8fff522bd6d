//! Subscription registry — fans change notifications out to callbacks.
//!
//! Subscribers register under a [`SubscriptionKey`]:
//!
//! - `Exact(path)` fires when exactly `path` is written and receives the
//!   written value.
//! - `Deep(base)` (written `base.*`) fires when any path under `base` is
//!   written (segment-aware) and receives the current full value at `base`.
//! - `Global` (the empty key) fires after every write and receives the whole
//!   core state.
//!
//! Path-scoped subscribers fire before global ones; within a key, in
//! subscription order. No lock is held while callbacks run, so a callback
//! may subscribe, unsubscribe or write re-entrantly.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, error, warn};

use pathstore_core::path::{Path, DEEP_WILDCARD};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SyncCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type AsyncCallback = Arc<dyn Fn(Value) -> BoxFuture + Send + Sync>;

/// What a subscriber listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Global,
    Exact(Path),
    Deep(Path),
}

impl SubscriptionKey {
    /// `""` is global, `base.*` is deep (a bare `*` is deep at the root),
    /// anything else is exact.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Global;
        }
        if raw == "*" {
            return Self::Deep(Path::root());
        }
        match raw.strip_suffix(DEEP_WILDCARD) {
            Some(base) => Self::Deep(Path::parse(base)),
            None => Self::Exact(Path::parse(raw)),
        }
    }

    /// Rebase a key relative to `scope`. The global key becomes an exact
    /// subscription on `scope` itself.
    pub fn within(self, scope: &Path) -> Self {
        match self {
            Self::Global => Self::Exact(scope.clone()),
            Self::Exact(path) => Self::Exact(scope.join(&path)),
            Self::Deep(path) => Self::Deep(scope.join(&path)),
        }
    }

    /// Path the key is anchored at; `None` for the global key.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Global => None,
            Self::Exact(path) | Self::Deep(path) => Some(path),
        }
    }

    fn matches(&self, written: &Path) -> bool {
        match self {
            Self::Global => false,
            Self::Exact(path) => path == written,
            Self::Deep(base) => written.starts_with(base),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => Ok(()),
            Self::Exact(path) => write!(f, "{path}"),
            Self::Deep(base) if base.is_root() => f.write_str("*"),
            Self::Deep(base) => write!(f, "{base}{DEEP_WILDCARD}"),
        }
    }
}

impl From<&str> for SubscriptionKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Handle identifying one subscription, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Subscribers grouped by key, keys in first-subscription order.
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<(SubscriptionKey, Vec<Subscriber>)>>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, key: SubscriptionKey, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.insert(key, Callback::Sync(Arc::new(callback)))
    }

    /// Subscribe an async callback. Each notification spawns it on the
    /// current tokio runtime; completion is not awaited.
    pub fn subscribe_async<F, Fut>(&self, key: SubscriptionKey, callback: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: AsyncCallback = Arc::new(move |value| -> BoxFuture { Box::pin(callback(value)) });
        self.insert(key, Callback::Async(boxed))
    }

    /// Remove one subscriber. Returns true if it was registered under `key`.
    pub fn unsubscribe(&self, key: &SubscriptionKey, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().expect("subscriptions lock");
        let Some(index) = entries.iter().position(|(k, _)| k == key) else {
            return false;
        };
        let subscribers = &mut entries[index].1;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            entries.remove(index);
        }
        removed
    }

    /// Remove every subscriber under `key`.
    pub fn unsubscribe_all(&self, key: &SubscriptionKey) -> bool {
        let mut entries = self.entries.write().expect("subscriptions lock");
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    /// Remove every key anchored at or below `prefix` (segment-aware).
    /// Returns the number of keys removed.
    pub fn unsubscribe_under(&self, prefix: &Path) -> usize {
        let mut entries = self.entries.write().expect("subscriptions lock");
        let before = entries.len();
        entries.retain(|(k, _)| !k.path().is_some_and(|path| path.starts_with(prefix)));
        let removed = before - entries.len();
        debug!(%prefix, removed, "subscriptions removed");
        removed
    }

    pub fn clear(&self) {
        self.entries.write().expect("subscriptions lock").clear();
    }

    /// Number of subscribers under `key`.
    pub fn count(&self, key: &SubscriptionKey) -> usize {
        self.entries
            .read()
            .expect("subscriptions lock")
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |(_, subscribers)| subscribers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("subscriptions lock").is_empty()
    }

    /// Deliver a write at `written` to every matching subscriber.
    ///
    /// `read` resolves a path against the current core state; it is consulted
    /// for deep subscribers (their base) and global subscribers (the root).
    pub fn notify<R>(&self, written: &Path, value: &Value, read: R)
    where
        R: Fn(&Path) -> Option<Value>,
    {
        let (scoped, global) = {
            let entries = self.entries.read().expect("subscriptions lock");
            let mut scoped = Vec::new();
            let mut global = Vec::new();
            for (key, subscribers) in entries.iter() {
                if matches!(key, SubscriptionKey::Global) {
                    global.extend(subscribers.iter().cloned());
                } else if key.matches(written) {
                    scoped.push((key.clone(), subscribers.clone()));
                }
            }
            (scoped, global)
        };

        for (key, subscribers) in scoped {
            let payload = match &key {
                SubscriptionKey::Deep(base) => read(base).unwrap_or(Value::Null),
                _ => value.clone(),
            };
            for subscriber in &subscribers {
                dispatch(&key, subscriber, &payload);
            }
        }

        if !global.is_empty() {
            let core = read(&Path::root()).unwrap_or(Value::Null);
            for subscriber in &global {
                dispatch(&SubscriptionKey::Global, subscriber, &core);
            }
        }
    }

    fn insert(&self, key: SubscriptionKey, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Subscriber { id, callback };
        let mut entries = self.entries.write().expect("subscriptions lock");
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, subscribers)) => subscribers.push(subscriber),
            None => entries.push((key, vec![subscriber])),
        }
        id
    }
}

fn dispatch(key: &SubscriptionKey, subscriber: &Subscriber, payload: &Value) {
    match &subscriber.callback {
        Callback::Sync(callback) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(payload)));
            if outcome.is_err() {
                error!(%key, id = subscriber.id.0, "subscriber panicked");
            }
        }
        Callback::Async(callback) => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(callback(payload.clone()));
            }
            Err(_) => {
                warn!(%key, id = subscriber.id.0, "no tokio runtime, async subscriber skipped");
            }
        },
    }
}
