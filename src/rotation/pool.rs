// Credential pool - selection, cooldown and rotation bookkeeping for one provider identity

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Why an upstream call against the active credential failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    RateLimited,
    Other,
}

/// Tunable rotation policy shared by every pool.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub cooldown: Duration,
    pub max_failures: u32,
    pub exhausted_backoff: std::time::Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::milliseconds(60_000),
            max_failures: 3,
            exhausted_backoff: std::time::Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone)]
struct Credential {
    key: String,
    secret: String,
    blocked: bool,
    blocked_until: Option<DateTime<Utc>>,
    failures: u32,
    last_used: Option<DateTime<Utc>>,
}

impl Credential {
    fn new(key: String, secret: String) -> Self {
        Self {
            key,
            secret,
            blocked: false,
            blocked_until: None,
            failures: 0,
            last_used: None,
        }
    }

    fn unblock_if_expired(&mut self, now: DateTime<Utc>) {
        if self.blocked && self.blocked_until.map(|t| t <= now).unwrap_or(true) {
            self.blocked = false;
            self.blocked_until = None;
        }
    }
}

/// Read-only snapshot of one credential, safe to serialize. Secrets are
/// never included, only the configuration key they came from.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub key: String,
    pub index: usize,
    pub is_current: bool,
    pub blocked: bool,
    pub blocked_until: Option<String>,
    pub failures: u32,
    pub last_used: Option<String>,
}

/// Outcome of forcing the active pointer away from the current credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated {
        from_key: String,
        to_key: String,
        to_secret: String,
    },
    /// Every other credential is still cooling down; state left on the
    /// current (now blocked) credential.
    Exhausted,
    Empty,
}

struct PoolState {
    credentials: Vec<Credential>,
    active: usize,
}

/// Ordered set of credentials for one logical provider identity plus the
/// pointer to the currently preferred one. All mutations run under one
/// mutex so concurrent requests never interleave on the pointer or a
/// credential's bookkeeping.
pub struct CredentialPool {
    name: String,
    policy: RotationPolicy,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from `(key, secret)` pairs discovered in configuration.
    /// Blank secrets and secrets not matching any of `allowed_prefixes`
    /// (when non-empty) are dropped. An empty pool is valid; `current()`
    /// just answers `None`.
    pub fn new(
        name: impl Into<String>,
        entries: Vec<(String, String)>,
        allowed_prefixes: &[String],
        policy: RotationPolicy,
    ) -> Self {
        let name = name.into();
        let mut credentials = Vec::new();
        for (key, secret) in entries {
            let secret = secret.trim().to_string();
            if secret.is_empty() {
                continue;
            }
            if !allowed_prefixes.is_empty()
                && !allowed_prefixes.iter().any(|p| secret.starts_with(p.as_str()))
            {
                tracing::debug!("{} pool: skipping {} (unrecognized secret format)", name, key);
                continue;
            }
            credentials.push(Credential::new(key, secret));
        }

        tracing::info!("{} pool initialized with {} credentials", name, credentials.len());

        Self {
            name,
            policy,
            state: Mutex::new(PoolState {
                credentials,
                active: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.state.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().credentials.is_empty()
    }

    /// Secret of the credential the pool currently prefers, or `None` for an
    /// empty pool. Blocked credentials whose cooldown has elapsed are
    /// unblocked on the way; if the active credential is still cooling down
    /// the pointer switches to the first usable candidate, falling back to
    /// the least-failed one when everything is blocked.
    pub fn current(&self) -> Option<String> {
        self.current_at(Utc::now())
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> Option<String> {
        let mut state = self.state.lock();
        if state.credentials.is_empty() {
            return None;
        }

        let active = state.active;
        state.credentials[active].unblock_if_expired(now);
        if !state.credentials[active].blocked {
            return Some(state.credentials[active].secret.clone());
        }

        let len = state.credentials.len();
        for step in 1..len {
            let idx = (active + step) % len;
            state.credentials[idx].unblock_if_expired(now);
            if !state.credentials[idx].blocked {
                tracing::info!(
                    "{} pool: switching from blocked {} to {}",
                    self.name,
                    state.credentials[active].key,
                    state.credentials[idx].key
                );
                state.active = idx;
                return Some(state.credentials[idx].secret.clone());
            }
        }

        // Everything is cooling down: degrade to the least-failed credential
        // instead of refusing to answer.
        let best = Self::least_failed(&state.credentials);
        if best != active {
            tracing::warn!(
                "{} pool: all credentials blocked, degrading to least-failed {}",
                self.name,
                state.credentials[best].key
            );
            state.active = best;
        } else {
            tracing::warn!(
                "{} pool: all credentials blocked, staying on {}",
                self.name,
                state.credentials[active].key
            );
        }
        Some(state.credentials[state.active].secret.clone())
    }

    /// Record the outcome of a failed call against the active credential.
    /// A rate-limited failure blocks it for the cooldown window and advances
    /// the pointer by one (a logged no-op for single-credential pools);
    /// other failures only bump the failure count.
    pub fn mark_failure(&self, reason: FailureReason) {
        self.mark_failure_at(reason, Utc::now())
    }

    pub fn mark_failure_at(&self, reason: FailureReason, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.credentials.is_empty() {
            return;
        }

        let active = state.active;
        {
            let cred = &mut state.credentials[active];
            cred.failures += 1;
            cred.last_used = Some(now);
            if reason == FailureReason::RateLimited {
                cred.blocked = true;
                cred.blocked_until = Some(now + self.policy.cooldown);
            }
        }

        if reason != FailureReason::RateLimited {
            return;
        }

        let len = state.credentials.len();
        if len <= 1 {
            tracing::warn!("{} pool: no additional credentials available for rotation", self.name);
            return;
        }

        state.active = (active + 1) % len;
        tracing::info!(
            "{} pool: rotated from {} to {}",
            self.name,
            state.credentials[active].key,
            state.credentials[state.active].key
        );
    }

    /// Record a successful call: decay the failure count by one (floor zero)
    /// so a mostly-healthy credential does not stay classified as failing.
    pub fn mark_success(&self) {
        self.mark_success_at(Utc::now())
    }

    pub fn mark_success_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.credentials.is_empty() {
            return;
        }
        let active = state.active;
        let cred = &mut state.credentials[active];
        cred.failures = cred.failures.saturating_sub(1);
        cred.last_used = Some(now);
    }

    /// Failure bookkeeping by secret value, for callers that tracked which
    /// credential they used. Returns the new failure count.
    pub fn record_failure_for(&self, secret: &str) -> Option<u32> {
        self.record_failure_for_at(secret, Utc::now())
    }

    pub fn record_failure_for_at(&self, secret: &str, now: DateTime<Utc>) -> Option<u32> {
        let mut state = self.state.lock();
        let cred = state.credentials.iter_mut().find(|c| c.secret == secret)?;
        cred.failures += 1;
        cred.last_used = Some(now);
        Some(cred.failures)
    }

    /// Success bookkeeping by secret value.
    pub fn record_success_for(&self, secret: &str) {
        let now = Utc::now();
        let mut state = self.state.lock();
        if let Some(cred) = state.credentials.iter_mut().find(|c| c.secret == secret) {
            cred.failures = cred.failures.saturating_sub(1);
            cred.last_used = Some(now);
        }
    }

    /// Force the pointer away from the active credential: block it for the
    /// cooldown window, then prefer the first unblocked candidate after it
    /// (wrapping), else the least-failed credential overall.
    pub fn rotate_away_from_active(&self) -> RotateOutcome {
        self.rotate_away_from_active_at(Utc::now())
    }

    pub fn rotate_away_from_active_at(&self, now: DateTime<Utc>) -> RotateOutcome {
        let mut state = self.state.lock();
        if state.credentials.is_empty() {
            return RotateOutcome::Empty;
        }

        let active = state.active;
        {
            let cred = &mut state.credentials[active];
            cred.blocked = true;
            cred.blocked_until = Some(now + self.policy.cooldown);
        }

        let len = state.credentials.len();
        let mut next = None;
        for step in 1..len {
            let idx = (active + step) % len;
            state.credentials[idx].unblock_if_expired(now);
            if !state.credentials[idx].blocked {
                next = Some(idx);
                break;
            }
        }

        let next = match next {
            Some(idx) => idx,
            None => Self::least_failed(&state.credentials),
        };

        if next == active {
            return RotateOutcome::Exhausted;
        }

        state.active = next;
        RotateOutcome::Rotated {
            from_key: state.credentials[active].key.clone(),
            to_key: state.credentials[next].key.clone(),
            to_secret: state.credentials[next].secret.clone(),
        }
    }

    /// Point the pool at the credential holding `secret`, if present. Used
    /// to reconcile in-memory state with the durable store at startup.
    pub fn set_active_by_secret(&self, secret: &str) -> bool {
        let mut state = self.state.lock();
        match state.credentials.iter().position(|c| c.secret == secret) {
            Some(idx) => {
                state.active = idx;
                true
            }
            None => false,
        }
    }

    pub fn active_key(&self) -> Option<String> {
        let state = self.state.lock();
        state.credentials.get(state.active).map(|c| c.key.clone())
    }

    /// Read-only snapshot for the monitoring surface. Does not mutate state,
    /// so an expired cooldown still shows as blocked until the next read.
    pub fn stats(&self) -> Vec<CredentialStats> {
        let state = self.state.lock();
        state
            .credentials
            .iter()
            .enumerate()
            .map(|(index, cred)| CredentialStats {
                key: cred.key.clone(),
                index,
                is_current: index == state.active,
                blocked: cred.blocked,
                blocked_until: cred
                    .blocked
                    .then(|| cred.blocked_until.map(|t| t.to_rfc3339()))
                    .flatten(),
                failures: cred.failures,
                last_used: cred.last_used.map(|t| t.to_rfc3339()),
            })
            .collect()
    }

    /// Force every credential back to a clean unblocked, zero-failure state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for cred in &mut state.credentials {
            cred.failures = 0;
            cred.blocked = false;
            cred.blocked_until = None;
        }
        tracing::info!("{} pool: stats reset", self.name);
    }

    fn least_failed(credentials: &[Credential]) -> usize {
        credentials
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.failures)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("TOKEN{}", i), format!("gho_secret{}", i)))
            .collect()
    }

    fn pool(n: usize) -> CredentialPool {
        CredentialPool::new("test", entries(n), &[], RotationPolicy::default())
    }

    #[test]
    fn empty_pool_returns_none() {
        let pool = pool(0);
        assert_eq!(pool.current(), None);
        assert!(pool.stats().is_empty());
        // mutations on an empty pool must not panic
        pool.mark_failure(FailureReason::RateLimited);
        pool.mark_success();
        assert_eq!(pool.rotate_away_from_active(), RotateOutcome::Empty);
    }

    #[test]
    fn filters_blank_and_malformed_secrets() {
        let entries = vec![
            ("A".to_string(), "gho_valid".to_string()),
            ("B".to_string(), "   ".to_string()),
            ("C".to_string(), "sk-wrong-family".to_string()),
            ("D".to_string(), "ghp_also_valid".to_string()),
        ];
        let prefixes = vec!["gho_".to_string(), "ghp_".to_string()];
        let pool = CredentialPool::new("test", entries, &prefixes, RotationPolicy::default());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.current(), Some("gho_valid".to_string()));
    }

    #[test]
    fn rate_limit_walks_through_three_credentials() {
        let pool = pool(3);
        let now = Utc::now();

        // A fails -> blocked, pointer on B
        pool.mark_failure_at(FailureReason::RateLimited, now);
        assert_eq!(pool.current_at(now), Some("gho_secret1".to_string()));

        // B fails -> blocked, pointer on C
        pool.mark_failure_at(FailureReason::RateLimited, now);
        assert_eq!(pool.current_at(now), Some("gho_secret2".to_string()));

        let stats = pool.stats();
        assert!(stats[0].blocked);
        assert!(stats[1].blocked);
        assert!(!stats[2].blocked);
        assert!(stats[2].is_current);
    }

    #[test]
    fn rotation_advances_by_one_and_wraps() {
        let pool = pool(3);
        let now = Utc::now();
        for expected in [1usize, 2, 0] {
            pool.mark_failure_at(FailureReason::RateLimited, now);
            let idx = pool.stats().iter().position(|s| s.is_current).unwrap();
            assert_eq!(idx, expected);
        }
    }

    #[test]
    fn all_blocked_still_answers_least_failed() {
        let pool = pool(3);
        let now = Utc::now();
        for _ in 0..3 {
            pool.mark_failure_at(FailureReason::RateLimited, now);
        }
        assert!(pool.stats().iter().all(|s| s.blocked));

        // make failures distinct: secret1 fails once more
        pool.record_failure_for_at("gho_secret1", now);
        let current = pool.current_at(now);
        assert_eq!(current, Some("gho_secret0".to_string()));
    }

    #[test]
    fn single_credential_blocks_without_advancing() {
        let pool = pool(1);
        let now = Utc::now();
        pool.mark_failure_at(FailureReason::RateLimited, now);

        let stats = pool.stats();
        assert!(stats[0].blocked);
        assert_eq!(stats[0].failures, 1);
        assert!(stats[0].is_current);
        // least-failed fallback: the only credential is still served
        assert_eq!(pool.current_at(now), Some("gho_secret0".to_string()));
    }

    #[test]
    fn mark_success_never_goes_negative() {
        let pool = pool(1);
        pool.mark_success();
        pool.mark_success();
        assert_eq!(pool.stats()[0].failures, 0);

        pool.mark_failure(FailureReason::Other);
        pool.mark_failure(FailureReason::Other);
        pool.mark_success();
        assert_eq!(pool.stats()[0].failures, 1);
    }

    #[test]
    fn blocked_until_is_strictly_in_the_future() {
        let pool = pool(2);
        let now = Utc::now();
        pool.mark_failure_at(FailureReason::RateLimited, now);
        let state = pool.state.lock();
        let until = state.credentials[0].blocked_until.unwrap();
        assert!(until > now);
    }

    #[test]
    fn cooldown_expiry_makes_credential_usable_again() {
        let pool = pool(2);
        let now = Utc::now();

        // block both: A fails (pointer -> B), B fails (pointer -> A, blocked)
        pool.mark_failure_at(FailureReason::RateLimited, now);
        pool.mark_failure_at(FailureReason::RateLimited, now);
        assert!(pool.stats().iter().all(|s| s.blocked));

        let later = now + Duration::milliseconds(60_001);
        let current = pool.current_at(later);
        assert_eq!(current, Some("gho_secret0".to_string()));
        assert!(!pool.stats()[0].blocked);
    }

    #[test]
    fn non_rate_limit_failures_do_not_rotate() {
        let pool = pool(2);
        pool.mark_failure(FailureReason::Other);

        let stats = pool.stats();
        assert!(stats[0].is_current);
        assert!(!stats[0].blocked);
        assert_eq!(stats[0].failures, 1);
    }

    #[test]
    fn rotate_away_prefers_unblocked_then_least_failed() {
        let pool = pool(3);
        let now = Utc::now();

        match pool.rotate_away_from_active_at(now) {
            RotateOutcome::Rotated { from_key, to_key, .. } => {
                assert_eq!(from_key, "TOKEN0");
                assert_eq!(to_key, "TOKEN1");
            }
            other => panic!("expected rotation, got {:?}", other),
        }

        // block the rest too; with everything cooling down the next
        // rotation lands on the least-failed credential rather than refusing
        pool.rotate_away_from_active_at(now);
        pool.record_failure_for_at("gho_secret2", now);
        pool.record_failure_for_at("gho_secret2", now);
        match pool.rotate_away_from_active_at(now) {
            RotateOutcome::Rotated { from_key, to_key, .. } => {
                assert_eq!(from_key, "TOKEN2");
                assert_eq!(to_key, "TOKEN0");
            }
            other => panic!("expected rotation, got {:?}", other),
        }
    }

    #[test]
    fn rotate_away_single_credential_is_exhausted() {
        let pool = pool(1);
        assert_eq!(pool.rotate_away_from_active(), RotateOutcome::Exhausted);
        // the current credential was still blocked as part of the attempt
        assert!(pool.stats()[0].blocked);
    }

    #[test]
    fn stats_snapshot_does_not_mutate_or_leak_secrets() {
        let pool = pool(2);
        let now = Utc::now();
        pool.mark_failure_at(FailureReason::RateLimited, now);

        let before = pool.stats();
        let after = pool.stats();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.blocked, b.blocked);
            assert_eq!(a.failures, b.failures);
        }
        let rendered = serde_json::to_string(&before).unwrap();
        assert!(!rendered.contains("gho_secret"));
    }

    #[test]
    fn startup_reconcile_points_at_matching_secret() {
        let pool = pool(3);
        assert!(pool.set_active_by_secret("gho_secret2"));
        assert_eq!(pool.current(), Some("gho_secret2".to_string()));
        assert!(!pool.set_active_by_secret("gho_unknown"));
    }
}
