//! Mirrors changed model slices into the session store and restores them.

use crate::reducer::{DashboardModel, LogBuffer, ModelLimits};
use ptrack_core::{AgentId, AgentRecord, DispatchRecord, LogEntry, SystemState};
use ptrack_storage::{load_slice, save_slice, SessionStore, StateSlice, StorageError};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

pub struct PersistenceAdapter {
    store: Box<dyn SessionStore + Send>,
}

impl PersistenceAdapter {
    pub fn new(store: Box<dyn SessionStore + Send>) -> Self {
        Self { store }
    }

    /// Rebuild a model from storage. Missing or unreadable slices fall back
    /// to their defaults independently of each other.
    pub fn restore(&self, limits: ModelLimits) -> DashboardModel {
        let mut model = DashboardModel::new(limits);
        if let Some(system) = self.read::<SystemState>(StateSlice::SystemState) {
            model.system = system;
        }
        if let Some(logs) = self.read::<Vec<LogEntry>>(StateSlice::Logs) {
            model.logs = LogBuffer::from_entries(logs, limits.log_capacity);
        }
        model.dispatch = self
            .read::<Option<DispatchRecord>>(StateSlice::CurrentDispatch)
            .flatten();
        if let Some(agents) = self.read::<Vec<AgentRecord>>(StateSlice::AgentsState) {
            let mut seen = HashSet::new();
            model.agents = agents
                .into_iter()
                .filter(|agent| seen.insert(agent.id))
                .collect();
        }
        if let Some(next) = self.read::<AgentId>(StateSlice::NextAgentId) {
            model.next_agent_id = next.max(0);
        }
        model
    }

    fn read<T: DeserializeOwned>(&self, slice: StateSlice) -> Option<T> {
        match load_slice(self.store.as_ref(), slice) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "persisted_slice_unreadable", slice = slice.key(), error = %err);
                None
            }
        }
    }

    pub fn persist(&mut self, model: &DashboardModel, changed: &BTreeSet<StateSlice>) {
        for slice in changed {
            if let Err(err) = self.write(model, *slice) {
                warn!(event = "persist_slice_failed", slice = slice.key(), error = %err);
            }
        }
    }

    pub fn persist_all(&mut self, model: &DashboardModel) {
        let all: BTreeSet<StateSlice> = StateSlice::ALL.into_iter().collect();
        self.persist(model, &all);
    }

    fn write(&mut self, model: &DashboardModel, slice: StateSlice) -> Result<(), StorageError> {
        let store = self.store.as_mut();
        match slice {
            StateSlice::SystemState => save_slice(store, slice, &model.system),
            StateSlice::Logs => save_slice(store, slice, &model.logs.to_vec()),
            StateSlice::CurrentDispatch => save_slice(store, slice, &model.dispatch),
            StateSlice::AgentsState => save_slice(store, slice, &model.agents),
            StateSlice::NextAgentId => save_slice(store, slice, &model.next_agent_id),
        }
    }

    pub fn clear(&mut self) {
        match self.store.clear() {
            Ok(()) => debug!(event = "persisted_state_cleared"),
            Err(err) => warn!(event = "persist_clear_failed", error = %err),
        }
    }
}
