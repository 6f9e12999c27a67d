// Process-wide token rotator for the GitHub credential family

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::RotatorError;

use super::pool::{CredentialPool, CredentialStats, RotateOutcome, RotationPolicy};
use super::store::CredentialStore;
use super::supervisor::ProcessSupervisor;

/// Rotates one credential family (all store keys sharing the family prefix)
/// and persists the active choice back to the durable store so a process
/// restart picks it up. One instance per process, owned by the composition
/// root and injected into the handlers that need it.
pub struct TokenRotator {
    family: String,
    pool: CredentialPool,
    store: Arc<dyn CredentialStore>,
    supervisor: ProcessSupervisor,
    policy: RotationPolicy,
    rotation_lock: AtomicBool,
}

struct RotationGuard<'a>(&'a AtomicBool);

impl Drop for RotationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TokenRotator {
    /// Read the durable store, collect every entry whose key starts with
    /// `family`, build the pool, and reconcile the active index with the
    /// secret the family base key currently holds (so a manually edited
    /// store and in-memory state agree at startup).
    pub fn initialize(
        family: impl Into<String>,
        secret_prefixes: &[String],
        store: Arc<dyn CredentialStore>,
        supervisor: ProcessSupervisor,
        policy: RotationPolicy,
    ) -> anyhow::Result<Self> {
        let family = family.into();
        let entries = store.read_all()?;

        let family_entries: Vec<(String, String)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(&family))
            .cloned()
            .collect();

        let active_secret = family_entries
            .iter()
            .find(|(key, _)| key == &family)
            .map(|(_, value)| value.clone());

        let pool = CredentialPool::new(
            "token-rotator",
            family_entries,
            secret_prefixes,
            policy.clone(),
        );

        if let Some(secret) = active_secret {
            if !pool.set_active_by_secret(&secret) {
                tracing::warn!(
                    "token rotator: {} holds a secret not present in the pool",
                    family
                );
            }
        }

        if let Some(key) = pool.active_key() {
            tracing::info!("token rotator: current credential is {}", key);
        }

        Ok(Self {
            family,
            pool,
            store,
            supervisor,
            policy,
            rotation_lock: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The live in-memory active credential. This is the process's source of
    /// truth between rotations; the durable store only matters at startup.
    pub fn current_secret(&self) -> Option<String> {
        self.pool.current()
    }

    pub fn current_key(&self) -> Option<String> {
        self.pool.active_key()
    }

    /// Record a rate-limit failure for the named credential. Once failures
    /// reach the configured threshold a rotation is triggered. Returns
    /// whether a rotation actually happened.
    pub async fn record_rate_limit_error(&self, secret: &str) -> Result<bool, RotatorError> {
        let failures = match self.pool.record_failure_for(secret) {
            Some(n) => n,
            None => return Ok(false),
        };

        tracing::warn!(
            "token rotator: 429 recorded for {}, failures: {}",
            self.current_key().unwrap_or_default(),
            failures
        );

        if failures >= self.policy.max_failures {
            tracing::info!("token rotator: failure threshold reached, rotating");
            return self.rotate_to_next_token().await;
        }
        Ok(false)
    }

    /// Success bookkeeping: decays the credential's failure count.
    pub fn record_success(&self, secret: &str) {
        self.pool.record_success_for(secret);
    }

    /// Block the current credential and switch to the best next candidate.
    /// Guarded so only one rotation is in flight at a time; a concurrent
    /// caller observes `false` and performs no mutation. On success the new
    /// active credential is persisted to the store; a persistence failure is
    /// surfaced but the in-memory rotation is kept (it is already usable).
    pub async fn rotate_to_next_token(&self) -> Result<bool, RotatorError> {
        let _guard = match self.try_lock_rotation() {
            Some(guard) => guard,
            None => {
                tracing::info!("token rotator: rotation already in progress, skipping");
                return Ok(false);
            }
        };

        match self.pool.rotate_away_from_active() {
            RotateOutcome::Empty => {
                tracing::warn!("token rotator: no credentials configured");
                Ok(false)
            }
            RotateOutcome::Exhausted => {
                tracing::warn!("token rotator: no credentials available for rotation");
                // give upstream limits some room before anyone retries
                tokio::time::sleep(self.policy.exhausted_backoff).await;
                Ok(false)
            }
            RotateOutcome::Rotated {
                from_key,
                to_key,
                to_secret,
            } => {
                tracing::info!("token rotator: switching from {} to {}", from_key, to_key);

                self.store
                    .write_one(&self.family, &to_secret)
                    .map_err(RotatorError::Persistence)?;

                tracing::info!("token rotator: subsequent requests will use {}", to_key);
                Ok(true)
            }
        }
    }

    /// Ask the external supervisor to stop and restart the service. Not
    /// invoked by rotation; reserved for the cases rotation cannot fix.
    pub async fn restart_server(&self) -> Result<(), RotatorError> {
        self.supervisor.restart().await.map_err(|e| {
            tracing::error!("token rotator: supervisor restart failed: {}", e);
            RotatorError::Restart(e)
        })
    }

    pub fn get_stats(&self) -> Vec<CredentialStats> {
        self.pool.stats()
    }

    pub fn reset_stats(&self) {
        self.pool.reset();
    }

    fn try_lock_rotation(&self) -> Option<RotationGuard<'_>> {
        self.rotation_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RotationGuard(&self.rotation_lock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MemStore {
        entries: Mutex<Vec<(String, String)>>,
        fail_writes: bool,
    }

    impl MemStore {
        fn new(entries: Vec<(&str, &str)>) -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                fail_writes: false,
            })
        }

        fn failing(entries: Vec<(&str, &str)>) -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                fail_writes: true,
            })
        }

        fn get(&self, key: &str) -> Option<String> {
            self.entries
                .lock()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        }
    }

    impl CredentialStore for MemStore {
        fn read_all(&self) -> std::io::Result<Vec<(String, String)>> {
            Ok(self.entries.lock().clone())
        }

        fn write_one(&self, key: &str, value: &str) -> std::io::Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::other("disk full"));
            }
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => entries.push((key.to_string(), value.to_string())),
            }
            Ok(())
        }
    }

    fn policy() -> RotationPolicy {
        RotationPolicy {
            exhausted_backoff: std::time::Duration::from_millis(1),
            ..RotationPolicy::default()
        }
    }

    fn rotator(store: Arc<MemStore>) -> TokenRotator {
        TokenRotator::initialize(
            "GITHUB_TOKEN",
            &["gho_".to_string()],
            store,
            ProcessSupervisor::new("pm2", "openai-proxy", "ecosystem.config.cjs"),
            policy(),
        )
        .unwrap()
    }

    #[test]
    fn initialize_reconciles_active_with_base_key() {
        // base key appears after an alternate; the pool must still point at
        // the credential the store marks active
        let store = MemStore::new(vec![
            ("GITHUB_TOKEN1", "gho_one"),
            ("GITHUB_TOKEN", "gho_two"),
            ("GITHUB_TOKEN2", "gho_two"),
            ("PORT", "3000"),
        ]);
        let rotator = rotator(store);
        assert_eq!(rotator.len(), 3);
        assert_eq!(rotator.current_secret(), Some("gho_two".to_string()));
    }

    #[tokio::test]
    async fn rotation_persists_new_active_credential() {
        let store = MemStore::new(vec![
            ("GITHUB_TOKEN", "gho_one"),
            ("GITHUB_TOKEN2", "gho_two"),
        ]);
        let rotator = rotator(store.clone());

        let rotated = rotator.rotate_to_next_token().await.unwrap();
        assert!(rotated);
        assert_eq!(rotator.current_secret(), Some("gho_two".to_string()));
        assert_eq!(store.get("GITHUB_TOKEN"), Some("gho_two".to_string()));
        // the alternate's own line is untouched
        assert_eq!(store.get("GITHUB_TOKEN2"), Some("gho_two".to_string()));
    }

    #[tokio::test]
    async fn concurrent_rotation_is_a_guarded_no_op() {
        let store = MemStore::new(vec![
            ("GITHUB_TOKEN", "gho_one"),
            ("GITHUB_TOKEN2", "gho_two"),
        ]);
        let rotator = rotator(store);

        // simulate a rotation already holding the lock
        let guard = rotator.try_lock_rotation().unwrap();
        let before = rotator.get_stats();

        let rotated = rotator.rotate_to_next_token().await.unwrap();
        assert!(!rotated);
        let after = rotator.get_stats();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.blocked, b.blocked);
            assert_eq!(a.is_current, b.is_current);
        }

        // once released, rotation proceeds
        drop(guard);
        assert!(rotator.rotate_to_next_token().await.unwrap());
    }

    #[tokio::test]
    async fn failure_threshold_triggers_rotation() {
        let store = MemStore::new(vec![
            ("GITHUB_TOKEN", "gho_one"),
            ("GITHUB_TOKEN2", "gho_two"),
        ]);
        let rotator = rotator(store);

        assert!(!rotator.record_rate_limit_error("gho_one").await.unwrap());
        assert!(!rotator.record_rate_limit_error("gho_one").await.unwrap());
        assert!(rotator.record_rate_limit_error("gho_one").await.unwrap());
        assert_eq!(rotator.current_secret(), Some("gho_two".to_string()));
    }

    #[tokio::test]
    async fn exhausted_pool_backs_off_and_keeps_state() {
        let store = MemStore::new(vec![("GITHUB_TOKEN", "gho_only")]);
        let rotator = rotator(store.clone());

        let rotated = rotator.rotate_to_next_token().await.unwrap();
        assert!(!rotated);
        assert_eq!(store.get("GITHUB_TOKEN"), Some("gho_only".to_string()));
        // a later attempt is not dead-locked by the earlier failure
        assert!(!rotator.rotate_to_next_token().await.unwrap());
    }

    #[tokio::test]
    async fn persistence_failure_keeps_in_memory_rotation() {
        let store = MemStore::failing(vec![
            ("GITHUB_TOKEN", "gho_one"),
            ("GITHUB_TOKEN2", "gho_two"),
        ]);
        let rotator = rotator(store.clone());

        let err = rotator.rotate_to_next_token().await.unwrap_err();
        assert!(matches!(err, RotatorError::Persistence(_)));
        // in-memory state already advanced and is not rolled back
        assert_eq!(rotator.current_secret(), Some("gho_two".to_string()));
        // the store still carries the old value
        assert_eq!(store.get("GITHUB_TOKEN"), Some("gho_one".to_string()));
        // and the guard was released for the next attempt
        assert!(rotator.try_lock_rotation().is_some());
    }

    #[tokio::test]
    async fn reset_stats_clears_blocks_and_failures() {
        let store = MemStore::new(vec![
            ("GITHUB_TOKEN", "gho_one"),
            ("GITHUB_TOKEN2", "gho_two"),
        ]);
        let rotator = rotator(store);
        rotator.rotate_to_next_token().await.unwrap();
        assert!(rotator.get_stats().iter().any(|s| s.blocked));

        rotator.reset_stats();
        assert!(rotator.get_stats().iter().all(|s| !s.blocked && s.failures == 0));
    }
}
