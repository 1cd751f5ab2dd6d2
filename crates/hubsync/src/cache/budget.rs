//! Per-credential rate-limit budgets.
//!
//! The budget for one access token is the single source of truth for how
//! many calls that token may still make in its current window. Every real
//! API response feeds [`RateLimitRegistry::update`]; snapshots relayed from
//! elsewhere (for example inside queue messages) go through
//! [`RateLimitRegistry::learn`]. Before each call the client passes through
//! [`RateLimitRegistry::admit`], a hard gate that waits out an exhausted
//! window instead of spending a request that would be rejected.
//!
//! Each token's budget sits behind its own mutex, so updates to one token
//! are linearizable while different tokens never contend.
//!
//! A task waiting out a window gives back the [`WorkerSlot`] it runs under
//! (see [`holding_slot`]) and reclaims it once the wait is over, so an
//! exhausted token never occupies workers that other tokens could use.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An opaque API credential.
///
/// `Debug` and `Display` only reveal the last four characters so tokens can
/// appear in structured logs without leaking.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// The raw token, for the `Authorization` header only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The last four characters, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(4);
        chars[start..].iter().collect()
    }

    /// Stable hex SHA-256 digest used where tokens are persisted as keys.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"hubsync-token-v1");
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(…{})", self.fingerprint())
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "…{}", self.fingerprint())
    }
}

/// Rate-limit state reported by the API for one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBudget {
    /// Calls allowed per window.
    pub limit: u32,
    /// Calls left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset: DateTime<Utc>,
}

impl RateLimitBudget {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Remaining calls as seen at `now`; a window that already ended counts as full.
    #[must_use]
    pub fn available_at(&self, now: DateTime<Utc>) -> u32 {
        if self.reset <= now {
            self.limit.max(self.remaining)
        } else {
            self.remaining
        }
    }
}

#[derive(Debug, Default)]
struct BudgetSlot {
    budget: Option<RateLimitBudget>,
    /// Set when the window was opened locally after waiting out a reset,
    /// rather than reported by the API. Any real snapshot replaces it.
    provisional: bool,
}

impl BudgetSlot {
    fn apply(&mut self, snapshot: RateLimitBudget) {
        let next = match self.budget {
            None => snapshot,
            Some(current) if snapshot.reset > current.reset => snapshot,
            Some(current) if snapshot.reset == current.reset && self.provisional => snapshot,
            Some(current) if snapshot.reset == current.reset => RateLimitBudget {
                limit: snapshot.limit,
                remaining: current.remaining.min(snapshot.remaining),
                reset: current.reset,
            },
            Some(_) => return,
        };

        self.budget = Some(next);
        self.provisional = false;
    }
}

/// A unit of worker capacity held by the running task.
#[async_trait]
pub trait WorkerSlot: Send + Sync {
    /// Give the capacity back for the duration of a wait.
    fn release(&self);
    /// Take capacity again after a wait.
    async fn reclaim(&self);
}

tokio::task_local! {
    static WORKER_SLOT: Arc<dyn WorkerSlot>;
}

/// Run `work` with `slot` as the current task's worker slot.
pub async fn holding_slot<F: Future>(slot: Arc<dyn WorkerSlot>, work: F) -> F::Output {
    WORKER_SLOT.scope(slot, work).await
}

/// Sleep for `wait` without occupying the current task's worker slot.
pub async fn wait_unoccupied(wait: Duration) {
    let slot = WORKER_SLOT.try_with(Arc::clone).ok();
    if let Some(slot) = &slot {
        slot.release();
    }
    tokio::time::sleep(wait).await;
    if let Some(slot) = &slot {
        slot.reclaim().await;
    }
}

type SharedSlot = Arc<Mutex<BudgetSlot>>;

fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, BudgetSlot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry of rate-limit budgets, one per access token.
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    slots: Mutex<HashMap<AccessToken, SharedSlot>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, token: &AccessToken) -> SharedSlot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(token.clone()).or_default())
    }

    /// Current budget for `token`, if any response has reported one.
    #[must_use]
    pub fn get(&self, token: &AccessToken) -> Option<RateLimitBudget> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(token).and_then(|slot| lock_slot(slot).budget)
    }

    /// Apply a snapshot taken from a real API response.
    ///
    /// A snapshot for a later window replaces the stored one; within the same
    /// window `remaining` only ever decreases; snapshots for an older window
    /// are ignored. Returns whether the stored budget changed.
    pub fn update(&self, token: &AccessToken, snapshot: RateLimitBudget) -> bool {
        let slot = self.slot(token);
        let mut slot = lock_slot(&slot);
        let before = slot.budget;
        slot.apply(snapshot);
        slot.budget != before
    }

    /// Apply a snapshot relayed from elsewhere without making a call.
    ///
    /// Same rules as [`update`](Self::update), but a snapshot whose window
    /// has already ended is dropped so stale relays never resurrect it.
    pub fn learn(&self, token: &AccessToken, snapshot: RateLimitBudget) -> bool {
        if snapshot.reset <= Utc::now() {
            tracing::debug!(token = %token, "Ignoring expired rate-limit snapshot");
            return false;
        }
        self.update(token, snapshot)
    }

    /// Wait until `token` may make another call and reserve it.
    ///
    /// Unknown budgets are admitted immediately. An exhausted budget blocks
    /// until its reset instant; the gate then opens a provisional window that
    /// the next real response overwrites.
    pub async fn admit(&self, token: &AccessToken) {
        let slot = self.slot(token);

        loop {
            let reset = {
                let mut guard = lock_slot(&slot);
                match guard.budget.as_mut() {
                    None => return,
                    Some(budget) if budget.remaining > 0 => {
                        budget.remaining -= 1;
                        return;
                    }
                    Some(budget) => budget.reset,
                }
            };

            let wait = (reset - Utc::now()).to_std().unwrap_or_default();
            if !wait.is_zero() {
                tracing::info!(
                    token = %token,
                    reset = %reset,
                    wait_secs = wait.as_secs(),
                    "Rate limit exhausted, waiting for reset"
                );
                wait_unoccupied(wait).await;
            }

            let mut guard = lock_slot(&slot);
            if let Some(budget) = guard.budget
                && budget.remaining == 0
                && budget.reset == reset
            {
                guard.budget = Some(RateLimitBudget {
                    limit: budget.limit,
                    remaining: budget.limit.max(1),
                    reset,
                });
                guard.provisional = true;
            }
        }
    }

    /// The token among `candidates` with the most calls left right now.
    ///
    /// Tokens with no known budget are preferred, since they have never been
    /// observed to be constrained. Ties keep the earlier candidate.
    #[must_use]
    pub fn best_of(&self, candidates: &[AccessToken]) -> Option<AccessToken> {
        let now = Utc::now();
        let mut best: Option<(&AccessToken, u32)> = None;
        for token in candidates {
            let available = self
                .get(token)
                .map_or(u32::MAX, |budget| budget.available_at(now));
            if best.is_none_or(|(_, most)| available > most) {
                best = Some((token, available));
            }
        }
        best.map(|(token, _)| token.clone())
    }

    /// All known budgets, for reporting.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(AccessToken, RateLimitBudget)> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = slots
            .iter()
            .filter_map(|(token, slot)| lock_slot(slot).budget.map(|b| (token.clone(), b)))
            .collect();
        all.sort_by_key(|(token, _)| token.fingerprint());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    /// A whole-second instant `secs` from now.
    fn from_now(secs: i64) -> DateTime<Utc> {
        at(Utc::now().timestamp() + secs)
    }

    fn budget(limit: u32, remaining: u32, reset: DateTime<Utc>) -> RateLimitBudget {
        RateLimitBudget {
            limit,
            remaining,
            reset,
        }
    }

    #[test]
    fn test_access_token_redacts_debug_and_display() {
        let token = AccessToken::new("ghp_supersecretvalue1234");

        assert_eq!(token.fingerprint(), "1234");
        assert_eq!(format!("{token}"), "…1234");
        assert!(!format!("{token:?}").contains("supersecret"));
        assert_eq!(token.expose(), "ghp_supersecretvalue1234");
    }

    #[test]
    fn test_access_token_digest_is_stable_and_distinct() {
        let a = AccessToken::new("token-a");
        let b = AccessToken::new("token-b");

        assert_eq!(a.digest(), AccessToken::new("token-a").digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_update_keeps_minimum_remaining_within_window() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");
        let reset = at(2_000_000_000);

        registry.update(&token, budget(5000, 4000, reset));
        registry.update(&token, budget(5000, 4100, reset));
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(4000));

        registry.update(&token, budget(5000, 3999, reset));
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(3999));
    }

    #[test]
    fn test_update_newer_window_replaces_and_older_is_ignored() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");

        registry.update(&token, budget(5000, 10, at(2_000_000_000)));
        assert!(registry.update(&token, budget(5000, 4999, at(2_000_003_600))));
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(4999));

        assert!(!registry.update(&token, budget(5000, 3, at(2_000_000_000))));
        assert_eq!(
            registry.get(&token),
            Some(budget(5000, 4999, at(2_000_003_600)))
        );
    }

    #[test]
    fn test_remaining_never_increases_across_interleaved_updates() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");
        let reset = at(2_000_000_000);

        let reported = [50, 48, 49, 47, 47, 49, 45, 46];
        let mut last = u32::MAX;
        for remaining in reported {
            registry.update(&token, budget(60, remaining, reset));
            let current = registry.get(&token).map(|b| b.remaining).expect("budget");
            assert!(current <= last, "remaining went up: {current} > {last}");
            last = current;
        }
        assert_eq!(last, 45);
    }

    #[test]
    fn test_learn_ignores_expired_snapshot() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");

        let past = Utc::now() - ChronoDuration::seconds(10);
        assert!(!registry.learn(&token, budget(5000, 0, past)));
        assert_eq!(registry.get(&token), None);

        let future = from_now(600);
        assert!(registry.learn(&token, budget(5000, 12, future)));
        assert!(registry.learn(&token, budget(5000, 3, future)));
        assert!(!registry.learn(&token, budget(5000, 40, future)));
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(3));
    }

    #[tokio::test]
    async fn test_admit_unknown_token_is_immediate() {
        let registry = RateLimitRegistry::new();
        registry.admit(&AccessToken::new("fresh")).await;
        assert_eq!(registry.get(&AccessToken::new("fresh")), None);
    }

    #[tokio::test]
    async fn test_admit_reserves_one_call() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");
        registry.update(&token, budget(10, 2, from_now(3600)));

        registry.admit(&token).await;
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(1));
        registry.admit(&token).await;
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_waits_for_reset_when_exhausted() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");
        let reset = from_now(60);
        registry.update(&token, budget(5000, 0, reset));

        let start = tokio::time::Instant::now();
        registry.admit(&token).await;
        let waited = start.elapsed();

        assert!(waited >= std::time::Duration::from_secs(58), "waited {waited:?}");
        let after = registry.get(&token).expect("budget");
        assert_eq!(after.reset, reset);
        assert_eq!(after.remaining, 4999);

        // A real response for the next window replaces the provisional one.
        let next = reset + ChronoDuration::seconds(3600);
        registry.update(&token, budget(5000, 4990, next));
        assert_eq!(registry.get(&token), Some(budget(5000, 4990, next)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_provisional_window_yields_to_real_snapshot_for_same_reset() {
        let registry = RateLimitRegistry::new();
        let token = AccessToken::new("t");
        let reset = from_now(5);
        registry.update(&token, budget(100, 0, reset));

        registry.admit(&token).await;
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(99));

        // Same reset instant reported by the API: the real number wins even
        // though it is larger than what the provisional window left.
        registry.update(&token, budget(100, 0, reset));
        assert_eq!(registry.get(&token).map(|b| b.remaining), Some(0));
    }

    #[test]
    fn test_best_of_prefers_unknown_then_most_remaining() {
        let registry = RateLimitRegistry::new();
        let low = AccessToken::new("low");
        let high = AccessToken::new("high");
        let unknown = AccessToken::new("unknown");
        let reset = from_now(3600);

        registry.update(&low, budget(5000, 10, reset));
        registry.update(&high, budget(5000, 3000, reset));

        assert_eq!(
            registry.best_of(&[low.clone(), high.clone()]),
            Some(high.clone())
        );
        assert_eq!(
            registry.best_of(&[low.clone(), high.clone(), unknown.clone()]),
            Some(unknown)
        );
        assert_eq!(registry.best_of(&[]), None);
    }

    #[test]
    fn test_best_of_counts_ended_window_as_full() {
        let registry = RateLimitRegistry::new();
        let spent = AccessToken::new("spent");
        let busy = AccessToken::new("busy");

        registry.update(&spent, budget(5000, 0, Utc::now() - ChronoDuration::seconds(1)));
        registry.update(&busy, budget(5000, 100, from_now(3600)));

        assert_eq!(registry.best_of(&[busy, spent.clone()]), Some(spent));
    }

    #[test]
    fn test_snapshot_lists_known_budgets() {
        let registry = RateLimitRegistry::new();
        let reset = at(2_000_000_000);
        registry.update(&AccessToken::new("aaaa"), budget(1, 1, reset));
        registry.update(&AccessToken::new("bbbb"), budget(2, 2, reset));

        let all = registry.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.fingerprint(), "aaaa");
        assert_eq!(all[1].1.limit, 2);
    }
}
