//! Watch target registry
//!
//! Owns every [`WatchTarget`] together with its live runtime state. Each
//! target sits behind its own `tokio::sync::Mutex`; the target's loop and the
//! management operations take that lock, nothing else does. The outer map is
//! only locked to look up, insert or remove slots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::model::{Classification, DirectionCounters, StatusRecord, TargetId, WatchTarget};
use crate::storage::StatusSnapshot;

/// Live state of one target
#[derive(Debug, Clone)]
pub struct TargetState {
    pub target: WatchTarget,
    pub record: StatusRecord,
    pub counters: DirectionCounters,
    pub classification: Classification,
    /// When the target's loop probes next
    pub next_check_at: DateTime<Utc>,
}

impl TargetState {
    pub fn new(target: WatchTarget, now: DateTime<Utc>) -> Self {
        Self {
            target,
            record: StatusRecord::initial(now),
            counters: DirectionCounters::default(),
            classification: Classification::Normal,
            next_check_at: now,
        }
    }

    /// Resume from the last persisted snapshot; the first probe is due immediately
    pub fn restore(target: WatchTarget, snapshot: StatusSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            target,
            record: snapshot.record,
            counters: snapshot.counters,
            classification: snapshot.classification,
            next_check_at: now,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            target_id: self.target.id,
            record: self.record,
            counters: self.counters,
            classification: self.classification,
        }
    }
}

#[derive(Debug)]
pub struct TargetSlot {
    pub id: TargetId,
    pub state: Mutex<TargetState>,
}

impl TargetSlot {
    pub fn new(state: TargetState) -> Self {
        Self {
            id: state.target.id,
            state: Mutex::new(state),
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    slots: RwLock<HashMap<TargetId, Arc<TargetSlot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target, replacing any previous slot with the same id
    pub async fn insert(&self, state: TargetState) -> Arc<TargetSlot> {
        let slot = Arc::new(TargetSlot::new(state));
        self.slots.write().await.insert(slot.id, slot.clone());
        slot
    }

    pub async fn get(&self, id: TargetId) -> Option<Arc<TargetSlot>> {
        self.slots.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: TargetId) -> Option<Arc<TargetSlot>> {
        self.slots.write().await.remove(&id)
    }

    pub async fn contains(&self, id: TargetId) -> bool {
        self.slots.read().await.contains_key(&id)
    }

    pub async fn slots(&self) -> Vec<Arc<TargetSlot>> {
        self.slots.read().await.values().cloned().collect()
    }

    /// Copy of every target's state, ordered by creation time
    pub async fn states(&self) -> Vec<TargetState> {
        let mut states = Vec::new();
        for slot in self.slots().await {
            states.push(slot.state.lock().await.clone());
        }
        states.sort_by_key(|state| (state.target.created_at, state.target.id));
        states
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
