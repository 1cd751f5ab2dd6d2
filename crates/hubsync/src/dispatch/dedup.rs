use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::actor::EntityId;
use crate::config::DispatchConfig;

/// One delivery as applied to one entity.
type DeliveryKey = (EntityId, String);

#[derive(Debug, Default)]
struct LogState {
    seen: HashMap<DeliveryKey, DateTime<Utc>>,
    /// Insertion order, for expiry and eviction.
    order: VecDeque<(DeliveryKey, DateTime<Utc>)>,
}

/// Processed webhook delivery ids, per entity.
///
/// A delivery that touches several entities is recorded once for each of
/// them, so marking it on one entity never suppresses another's update.
/// Ids are remembered for a retention window and the log never holds more
/// than `capacity` ids; the oldest are evicted first.
#[derive(Debug)]
pub struct DeliveryLog {
    state: Mutex<LogState>,
    retention: Duration,
    capacity: usize,
}

impl DeliveryLog {
    pub fn new(retention: std::time::Duration, capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            retention: Duration::from_std(retention).unwrap_or(Duration::MAX),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.delivery_retention(), config.delivery_capacity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn contains(&self, entity: EntityId, delivery_id: &str) -> bool {
        self.contains_at(entity, delivery_id, Utc::now())
    }

    /// Record a processed delivery. Returns `false` if it was already recorded.
    pub fn mark(&self, entity: EntityId, delivery_id: &str) -> bool {
        self.mark_at(entity, delivery_id, Utc::now())
    }

    #[must_use]
    pub fn contains_at(&self, entity: EntityId, delivery_id: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        self.expire(&mut state, now);
        state.seen.contains_key(&(entity, delivery_id.to_string()))
    }

    pub fn mark_at(&self, entity: EntityId, delivery_id: &str, now: DateTime<Utc>) -> bool {
        let key = (entity, delivery_id.to_string());
        let mut state = self.lock();
        self.expire(&mut state, now);
        if state.seen.contains_key(&key) {
            return false;
        }

        while state.seen.len() >= self.capacity {
            let Some((oldest, _)) = state.order.pop_front() else {
                break;
            };
            state.seen.remove(&oldest);
        }

        state.seen.insert(key.clone(), now);
        state.order.push_back((key, now));
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, state: &mut LogState, now: DateTime<Utc>) {
        let cutoff = now.checked_sub_signed(self.retention);
        while let Some((_, at)) = state.order.front() {
            if cutoff.is_some_and(|cutoff| *at <= cutoff) {
                if let Some((key, _)) = state.order.pop_front() {
                    state.seen.remove(&key);
                }
            } else {
                break;
            }
        }
    }
}
