//! Rotating API key pools with persisted exhaustion state.
//!
//! Each provider driver owns one [`ApiKeyManager`] built from its
//! `<PROVIDER>_API_KEY` environment variable (comma-separated pool). Keys
//! rotate on quota-type errors only; exhausted keys recover after a
//! configurable timeout. State is persisted to the shared store best-effort
//! and any persistence failure silently degrades to process-local state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Persisted key-state TTL: 7 days.
const KEY_STATE_TTL_SECONDS: u64 = 7 * 24 * 3600;

/// Lifecycle status of one API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Exhausted,
    Error,
}

/// State of one key in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyState {
    pub key: String,
    pub status: KeyStatus,
    #[serde(default)]
    pub error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhausted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl KeyState {
    fn new(key: String) -> Self {
        Self {
            key,
            status: KeyStatus::Active,
            error_count: 0,
            exhausted_at: None,
            last_error: None,
        }
    }
}

/// Key manager tunables.
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// How long an exhausted key rests before it may be retried.
    pub recovery_time_ms: u64,
    /// Errors tolerated before a key is treated as exhausted.
    pub max_errors_before_switch: u32,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            recovery_time_ms: 60 * 60 * 1000,
            max_errors_before_switch: 3,
        }
    }
}

/// Rotating pool of API keys for one provider.
pub struct ApiKeyManager {
    provider: String,
    states: Mutex<Vec<KeyState>>,
    store: Option<Arc<dyn KeyValueStore>>,
    config: KeyManagerConfig,
}

impl ApiKeyManager {
    pub fn new(
        provider: impl Into<String>,
        keys: Vec<String>,
        store: Option<Arc<dyn KeyValueStore>>,
        config: KeyManagerConfig,
    ) -> Self {
        let provider = provider.into();
        let manager = Self {
            states: Mutex::new(keys.into_iter().map(KeyState::new).collect()),
            provider,
            store,
            config,
        };
        manager.load_persisted();
        manager
    }

    /// Build from `<PROVIDER>_API_KEY`, a comma-separated key list.
    pub fn from_env(provider: &str, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        let var = format!("{}_API_KEY", provider.to_ascii_uppercase());
        let keys = std::env::var(&var)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        Self::new(provider, keys, store, KeyManagerConfig::default())
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn has_keys(&self) -> bool {
        !self.states.lock().map(|s| s.is_empty()).unwrap_or(true)
    }

    /// First usable key, recovering rested exhausted keys as needed.
    ///
    /// Keys in the error state are still usable; only exhausted keys are
    /// skipped until their rest period passes.
    pub fn get_key(&self) -> Option<String> {
        let mut states = self.states.lock().ok()?;

        if let Some(state) = states.iter().find(|s| s.status != KeyStatus::Exhausted) {
            return Some(state.key.clone());
        }

        // Every key is exhausted: recover any past its rest period.
        let recovery = chrono::Duration::milliseconds(self.config.recovery_time_ms as i64);
        let now = Utc::now();
        let mut recovered = None;
        for state in states.iter_mut() {
            if state.status == KeyStatus::Exhausted
                && state
                    .exhausted_at
                    .map(|at| now - at >= recovery)
                    .unwrap_or(false)
            {
                state.status = KeyStatus::Active;
                state.error_count = 0;
                state.exhausted_at = None;
                recovered.get_or_insert_with(|| state.key.clone());
            }
        }
        drop(states);
        if recovered.is_some() {
            tracing::info!(provider = %self.provider, "recovered exhausted API key");
            self.persist();
        }
        recovered
    }

    /// Mark a key exhausted (quota hit).
    pub fn mark_exhausted(&self, key: &str, reason: &str) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.iter_mut().find(|s| s.key == key) {
                state.status = KeyStatus::Exhausted;
                state.exhausted_at = Some(Utc::now());
                state.last_error = Some(reason.to_string());
            }
        }
        tracing::warn!(provider = %self.provider, reason, "API key exhausted");
        self.persist();
    }

    /// Record a non-quota error against a key; repeated errors exhaust it.
    pub fn mark_error(&self, key: &str, err: &str) {
        let mut exhausted = false;
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.iter_mut().find(|s| s.key == key) {
                state.error_count += 1;
                state.last_error = Some(err.to_string());
                if state.error_count >= self.config.max_errors_before_switch {
                    state.status = KeyStatus::Exhausted;
                    state.exhausted_at = Some(Utc::now());
                    exhausted = true;
                } else {
                    state.status = KeyStatus::Error;
                }
            }
        }
        if exhausted {
            tracing::warn!(provider = %self.provider, "API key exhausted after repeated errors");
        }
        self.persist();
    }

    /// Run `f` with an API key, rotating through the pool on quota errors.
    ///
    /// Each key is attempted at most once. Non-quota errors bubble up after
    /// a single attempt; quota errors exhaust the key and move on.
    pub async fn with_key<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tried: Vec<String> = Vec::new();
        loop {
            let Some(key) = self.get_key() else {
                return Err(Error::KeysExhausted(self.provider.clone()));
            };
            if tried.contains(&key) {
                return Err(Error::KeysExhausted(self.provider.clone()));
            }
            tried.push(key.clone());

            match f(key.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_quota() => {
                    self.mark_exhausted(&key, &err.to_string());
                    continue;
                }
                Err(err) => {
                    self.mark_error(&key, &err.to_string());
                    return Err(err);
                }
            }
        }
    }

    /// Snapshot of every key's state.
    pub fn snapshot(&self) -> Vec<KeyState> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn state_key(&self) -> String {
        format!("apikey:state:{}", self.provider)
    }

    /// Merge persisted state into the configured pool. Keys no longer in
    /// configuration are ignored.
    fn load_persisted(&self) {
        let Some(store) = &self.store else { return };
        let loaded = match store.get(&self.state_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(provider = %self.provider, error = %e, "key state unavailable");
                return;
            }
        };
        let Ok(persisted) = serde_json::from_str::<Vec<KeyState>>(&loaded) else {
            return;
        };
        if let Ok(mut states) = self.states.lock() {
            for state in states.iter_mut() {
                if let Some(saved) = persisted.iter().find(|p| p.key == state.key) {
                    *state = saved.clone();
                }
            }
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else { return };
        let Ok(states) = self.states.lock().map(|s| s.clone()) else {
            return;
        };
        let Ok(serialized) = serde_json::to_string(&states) else {
            return;
        };
        if let Err(e) = store.set(&self.state_key(), &serialized, Some(KEY_STATE_TTL_SECONDS)) {
            tracing::debug!(provider = %self.provider, error = %e, "key state persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(keys: &[&str]) -> ApiKeyManager {
        ApiKeyManager::new(
            "hunter",
            keys.iter().map(|k| k.to_string()).collect(),
            None,
            KeyManagerConfig::default(),
        )
    }

    #[test]
    fn test_get_key_returns_first_active() {
        let mgr = manager(&["k1", "k2"]);
        assert_eq!(mgr.get_key(), Some("k1".to_string()));
        mgr.mark_exhausted("k1", "429");
        assert_eq!(mgr.get_key(), Some("k2".to_string()));
    }

    #[test]
    fn test_exhausted_key_recovers_after_timeout() {
        let mgr = ApiKeyManager::new(
            "hunter",
            vec!["k1".to_string()],
            None,
            KeyManagerConfig {
                recovery_time_ms: 0,
                ..Default::default()
            },
        );
        mgr.mark_exhausted("k1", "quota");
        // recovery_time_ms of zero lets the key come straight back
        assert_eq!(mgr.get_key(), Some("k1".to_string()));
        assert_eq!(mgr.snapshot()[0].status, KeyStatus::Active);
    }

    #[test]
    fn test_repeated_errors_exhaust_key() {
        let mgr = manager(&["k1", "k2"]);
        mgr.mark_error("k1", "boom");
        mgr.mark_error("k1", "boom");
        assert_eq!(mgr.snapshot()[0].status, KeyStatus::Error);
        mgr.mark_error("k1", "boom");
        assert_eq!(mgr.snapshot()[0].status, KeyStatus::Exhausted);
        assert_eq!(mgr.get_key(), Some("k2".to_string()));
    }

    #[tokio::test]
    async fn test_with_key_rotates_on_quota_only() {
        let mgr = manager(&["bad", "good"]);
        let calls = AtomicUsize::new(0);
        let result = mgr
            .with_key(|key| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if key == "bad" {
                        Err(Error::rate_limited("hunter", "429"))
                    } else {
                        Ok(key)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "good");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.snapshot()[0].status, KeyStatus::Exhausted);
    }

    #[tokio::test]
    async fn test_with_key_bubbles_non_quota_errors() {
        let mgr = manager(&["k1", "k2"]);
        let calls = AtomicUsize::new(0);
        let err = mgr
            .with_key(|_key| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(Error::provider("hunter", "HTTP 500")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        // no rotation on a server error
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_key_exhausts_whole_pool() {
        let mgr = manager(&["k1", "k2"]);
        let err = mgr
            .with_key(|_key| async move { Err::<(), _>(Error::rate_limited("hunter", "429")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeysExhausted(_)));
    }

    #[test]
    fn test_state_persists_and_reloads() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let mgr = ApiKeyManager::new(
                "serper",
                vec!["k1".to_string(), "k2".to_string()],
                Some(Arc::clone(&store)),
                KeyManagerConfig::default(),
            );
            mgr.mark_exhausted("k1", "429 quota");
        }
        let reloaded = ApiKeyManager::new(
            "serper",
            vec!["k1".to_string(), "k2".to_string()],
            Some(store),
            KeyManagerConfig::default(),
        );
        assert_eq!(reloaded.snapshot()[0].status, KeyStatus::Exhausted);
        assert_eq!(reloaded.get_key(), Some("k2".to_string()));
    }
}
