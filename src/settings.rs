//! Prefixed settings storage with change notifications.
//!
//! A [`SettingsStore`] namespaces every key under a constructor-supplied
//! prefix and delegates persistence to a [`StorageBackend`]. Writes are
//! fanned out to subscribers of the affected key, which lets separate parts
//! of an application react to settings changes without sharing globals.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Key-value persistence for JSON values.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    /// Store `value`, returning the previous value.
    fn set(&self, key: &str, value: Value) -> Result<Option<Value>, SettingsError>;

    /// Delete `key`, returning the previous value.
    fn remove(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    fn keys(&self) -> Result<Vec<String>, SettingsError>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<Option<Value>, SettingsError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, SettingsError> {
        (**self).keys()
    }
}

/// In-process backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<Option<Value>, SettingsError> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        Ok(values.insert(key.to_string(), value))
    }

    fn remove(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        Ok(values.remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, SettingsError> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.keys().cloned().collect())
    }
}

/// A change to one key, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Key without the store prefix
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Receiving end of [`SettingsStore::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    key: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Wait for the next change. `None` once the store is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(key = %self.key, missed, "Settings subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a pending change without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Settings namespace over a storage backend.
///
/// # Example
/// ```
/// use chatwire::settings::{MemoryBackend, SettingsStore};
///
/// let store = SettingsStore::new("chatwire.", MemoryBackend::new());
/// store.set("model", &"llama3").unwrap();
/// assert_eq!(store.get::<String>("model").unwrap().as_deref(), Some("llama3"));
/// ```
pub struct SettingsStore<B> {
    prefix: String,
    backend: B,
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl<B: StorageBackend> SettingsStore<B> {
    pub fn new(prefix: impl Into<String>, backend: B) -> Self {
        Self {
            prefix: prefix.into(),
            backend,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read and deserialize `key`. A missing key is `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        match self.backend.get(&self.storage_key(key))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` and notify subscribers.
    ///
    /// Concurrent writers notify in the order their writes were stored.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let new = serde_json::to_value(value)?;

        let mut channels = self.lock_channels();
        let old = self.backend.set(&self.storage_key(key), new.clone())?;

        notify(
            &mut channels,
            ChangeEvent {
                key: key.to_string(),
                old,
                new: Some(new),
            },
        );
        Ok(())
    }

    /// Delete `key`. Subscribers hear about it only if it existed.
    pub fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut channels = self.lock_channels();
        if let Some(old) = self.backend.remove(&self.storage_key(key))? {
            notify(
                &mut channels,
                ChangeEvent {
                    key: key.to_string(),
                    old: Some(old),
                    new: None,
                },
            );
        }
        Ok(())
    }

    /// Keys in this namespace, without the prefix.
    pub fn keys(&self) -> Result<Vec<String>, SettingsError> {
        let mut keys: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Send `value` to subscribers of `key` without storing it.
    pub fn publish(&self, key: &str, value: Value) {
        notify(
            &mut self.lock_channels(),
            ChangeEvent {
                key: key.to_string(),
                old: None,
                new: Some(value),
            },
        );
    }

    /// Listen for changes to `key`.
    pub fn subscribe(&self, key: &str) -> Subscription {
        let receiver = self
            .lock_channels()
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        Subscription {
            key: key.to_string(),
            receiver,
        }
    }

    // Held across a backend write and its notification.
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ChangeEvent>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn notify(channels: &mut HashMap<String, broadcast::Sender<ChangeEvent>>, event: ChangeEvent) {
    let Some(sender) = channels.get(&event.key) else {
        return;
    };

    let key = event.key.clone();
    if sender.send(event).is_err() {
        // Every subscriber has been dropped.
        channels.remove(&key);
        debug!(key = %key, "Pruned settings channel");
    }
}
