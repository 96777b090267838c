//! Scheduler State Module
//!
//! The single bookkeeping record shared by the template rotation and the
//! orchestrator: last template, last post time, and the next run time of
//! every slot scheduled today.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::store::{load_or_init, JsonFileStore, MemoryStore, Store};

/// Slot names that always appear in a freshly initialized record.
const DEFAULT_SLOTS: [&str; 2] = ["morning", "evening"];

/// Persisted scheduler record.
///
/// Slot times live under dynamic `next<Name>Schedule` keys, so they are kept
/// as a flattened map instead of named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    #[serde(default)]
    pub last_used_template: String,

    #[serde(default = "Utc::now")]
    pub last_post_time: DateTime<Utc>,

    #[serde(flatten)]
    pub schedules: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            last_used_template: String::new(),
            last_post_time: Utc::now(),
            schedules: DEFAULT_SLOTS
                .iter()
                .map(|slot| (schedule_key(slot), None))
                .collect(),
        }
    }
}

impl SchedulerState {
    /// Shallow-merge an update into this record.
    pub fn merge(&mut self, update: StateUpdate) {
        if let Some(template) = update.last_used_template {
            self.last_used_template = template;
        }
        if let Some(at) = update.last_post_time {
            self.last_post_time = at;
        }
        self.schedules.extend(update.schedules);
    }

    /// Next recorded run time for a slot name such as `optimal1`.
    pub fn next_schedule(&self, slot: &str) -> Option<DateTime<Utc>> {
        self.schedules.get(&schedule_key(slot)).copied().flatten()
    }
}

/// State key for a slot: `optimal1` becomes `nextOptimal1Schedule`.
pub fn schedule_key(slot: &str) -> String {
    let mut chars = slot.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("next{}Schedule", capitalized)
}

/// Partial record; unset fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub last_used_template: Option<String>,
    pub last_post_time: Option<DateTime<Utc>>,
    pub schedules: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl StateUpdate {
    pub fn template(template: impl Into<String>) -> Self {
        Self {
            last_used_template: Some(template.into()),
            ..Self::default()
        }
    }

    pub fn post(template: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            last_used_template: Some(template.into()),
            last_post_time: Some(at),
            ..Self::default()
        }
    }

    pub fn schedule(slot: &str, at: Option<DateTime<Utc>>) -> Self {
        let mut update = Self::default();
        update.schedules.insert(schedule_key(slot), at);
        update
    }
}

/// Read-whole/write-whole access to the scheduler record.
pub struct SchedulerStateStore {
    store: Box<dyn Store<SchedulerState>>,
}

impl SchedulerStateStore {
    pub fn new(store: impl Store<SchedulerState> + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn json(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonFileStore::new(path))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Current record; a missing or corrupt file is replaced by defaults.
    pub fn read(&self) -> SchedulerState {
        load_or_init(self.store.as_ref(), SchedulerState::default)
    }

    /// Merge `update` into the stored record and persist the whole record.
    ///
    /// Write failures are logged and swallowed; the merged record is still
    /// returned so callers can carry on.
    pub fn write(&self, update: StateUpdate) -> SchedulerState {
        let mut state = self.read();
        state.merge(update);

        if let Err(e) = self.store.save(&state) {
            log::error!("Failed to update scheduler state: {}", e);
        }

        state
    }
}
