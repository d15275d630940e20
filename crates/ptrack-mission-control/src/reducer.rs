//! Merge rules applying classified events and poll results to the in-memory
//! dashboard model. Every apply reports the persisted slices it touched plus
//! the follow-up work the caller owns (timers, toasts, pulls).

use ptrack_core::log_grammar::LogSignal;
use ptrack_core::wire::PushEvent;
use ptrack_core::{
    AgentId, AgentRecord, AgentStatus, Connectivity, DispatchRecord, LogEntry, QueueSnapshot,
    RosterEntry, SystemState, TaskEvent, TaskRecord, TaskStatus, LOG_CAPACITY,
    RECENT_EVENTS_CAPACITY,
};
use ptrack_storage::StateSlice;
use std::collections::{BTreeSet, VecDeque};

pub const TOAST_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    pub log_capacity: usize,
    pub recent_events_capacity: usize,
    pub toast_capacity: usize,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            log_capacity: LOG_CAPACITY,
            recent_events_capacity: RECENT_EVENTS_CAPACITY,
            toast_capacity: TOAST_CAPACITY,
        }
    }
}

/// Bounded log ring buffer; the oldest entry is dropped first.
#[derive(Debug, Clone, PartialEq)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn from_entries(entries: Vec<LogEntry>, capacity: usize) -> Self {
        let mut buffer = Self::with_capacity(capacity);
        for entry in entries {
            buffer.push(entry);
        }
        buffer
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Push(PushEvent),
    Queue(QueueSnapshot),
    Roster(Vec<RosterEntry>),
    EscapeCount(u64),
    LiveUsers(u64),
    Connectivity(bool),
    ClearTask(AgentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    RefreshEscapeCount,
    ArmTaskClear(AgentId),
    /// A new task started; any clear armed for the previous one is stale.
    CancelTaskClear(AgentId),
    Toast(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Persisted slices that changed.
    pub changed: BTreeSet<StateSlice>,
    /// Visible state changed, persisted or not.
    pub dirty: bool,
    pub followups: Vec<Followup>,
}

impl Outcome {
    fn touch(&mut self, slice: StateSlice) {
        self.changed.insert(slice);
        self.dirty = true;
    }

    pub fn merge(&mut self, other: Outcome) {
        self.changed.extend(other.changed);
        self.dirty |= other.dirty;
        self.followups.extend(other.followups);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardModel {
    pub system: SystemState,
    pub logs: LogBuffer,
    pub dispatch: Option<DispatchRecord>,
    pub agents: Vec<AgentRecord>,
    pub next_agent_id: AgentId,
    pub escape_count: u64,
    pub live_users: u64,
    pub toasts: VecDeque<Toast>,
    limits: ModelLimits,
}

impl Default for DashboardModel {
    fn default() -> Self {
        Self::new(ModelLimits::default())
    }
}

impl DashboardModel {
    pub fn new(limits: ModelLimits) -> Self {
        Self {
            system: SystemState::default(),
            logs: LogBuffer::with_capacity(limits.log_capacity),
            dispatch: None,
            agents: Vec::new(),
            next_agent_id: 0,
            escape_count: 0,
            live_users: 0,
            toasts: VecDeque::new(),
            limits,
        }
    }

    pub fn limits(&self) -> ModelLimits {
        self.limits
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|agent| agent.id == id)
    }

    pub fn connectivity(&self) -> Connectivity {
        self.system.system_health.websocket
    }

    pub fn apply(&mut self, event: ModelEvent) -> Outcome {
        let mut outcome = Outcome::default();
        match event {
            ModelEvent::Push(push) => self.apply_push(push, &mut outcome),
            ModelEvent::Queue(queue) => {
                if self.system.queues.len() != 1 || self.system.queues[0] != queue {
                    self.system.queues = vec![queue];
                    outcome.touch(StateSlice::SystemState);
                }
            }
            ModelEvent::Roster(roster) => self.sync_roster(roster, &mut outcome),
            ModelEvent::EscapeCount(count) => {
                if self.escape_count != count {
                    self.escape_count = count;
                    outcome.dirty = true;
                }
            }
            ModelEvent::LiveUsers(count) => {
                if self.live_users != count {
                    self.live_users = count;
                    outcome.dirty = true;
                }
            }
            ModelEvent::Connectivity(open) => {
                let websocket = Connectivity::from_open(open);
                if self.system.system_health.websocket != websocket {
                    self.system.system_health.websocket = websocket;
                    outcome.touch(StateSlice::SystemState);
                }
            }
            ModelEvent::ClearTask(agent_id) => {
                // A processing match during the grace window wins over the clear.
                if let Some(agent) = self.agent_mut(agent_id) {
                    if agent.task.as_ref().is_some_and(|task| task.status.is_terminal()) {
                        agent.task = None;
                        outcome.touch(StateSlice::AgentsState);
                    }
                }
            }
        }
        outcome
    }

    fn apply_push(&mut self, push: PushEvent, outcome: &mut Outcome) {
        match push {
            PushEvent::Log(entry) => {
                self.logs.push(entry);
                outcome.touch(StateSlice::Logs);
            }
            PushEvent::Event(event) => {
                self.push_recent_event(event);
                outcome.touch(StateSlice::SystemState);
            }
            PushEvent::StateUpdate(state) => {
                self.system = state;
                outcome.touch(StateSlice::SystemState);
            }
            PushEvent::AgentStatus(status) => {
                self.upsert_agent_status(status);
                outcome.touch(StateSlice::SystemState);
            }
            PushEvent::Signal(signal) => self.apply_signal(signal, outcome),
        }
    }

    fn push_recent_event(&mut self, event: TaskEvent) {
        let events = &mut self.system.recent_events;
        events.push(event);
        let cap = self.limits.recent_events_capacity;
        if events.len() > cap {
            let overflow = events.len() - cap;
            events.drain(..overflow);
        }
    }

    fn upsert_agent_status(&mut self, status: AgentStatus) {
        match self
            .system
            .agents
            .iter_mut()
            .find(|existing| existing.id == status.id)
        {
            Some(existing) => *existing = status,
            None => self.system.agents.push(status),
        }
    }

    fn apply_signal(&mut self, signal: LogSignal, outcome: &mut Outcome) {
        match signal {
            LogSignal::Dispatched {
                pokemon,
                location,
                element,
            } => {
                self.dispatch = Some(DispatchRecord::new(pokemon, location, element));
                outcome.touch(StateSlice::CurrentDispatch);
            }
            LogSignal::AgentLog { agent_id, text, .. } => {
                if let Some(agent) = self.agent_mut(agent_id) {
                    agent.last_log = Some(text);
                    outcome.touch(StateSlice::AgentsState);
                }
            }
            LogSignal::TaskProcessing {
                agent_id,
                pokemon,
                location,
            } => {
                if self.dispatch.take().is_some() {
                    outcome.touch(StateSlice::CurrentDispatch);
                }
                if let Some(agent) = self.agent_mut(agent_id) {
                    agent.task = Some(TaskRecord {
                        pokemon,
                        location,
                        status: TaskStatus::Processing,
                        element: None,
                    });
                    outcome.touch(StateSlice::AgentsState);
                    outcome.followups.push(Followup::CancelTaskClear(agent_id));
                }
            }
            LogSignal::TaskCaptured {
                agent_id,
                pokemon,
                location,
                element,
            } => {
                let toast = format!("✅ {pokemon} captured at {location}!");
                if self.finish_task(agent_id, pokemon, location, TaskStatus::Captured, Some(element)) {
                    outcome.touch(StateSlice::AgentsState);
                    outcome.followups.push(Followup::Toast(toast));
                    outcome.followups.push(Followup::ArmTaskClear(agent_id));
                }
            }
            LogSignal::TaskFailed {
                agent_id,
                pokemon,
                location,
            } => {
                let toast = format!("❌ {pokemon} escaped at {location}");
                if self.finish_task(agent_id, pokemon, location, TaskStatus::Failed, None) {
                    outcome.touch(StateSlice::AgentsState);
                    outcome.followups.push(Followup::Toast(toast));
                    outcome.followups.push(Followup::ArmTaskClear(agent_id));
                }
            }
            LogSignal::EscapeObserved => outcome.followups.push(Followup::RefreshEscapeCount),
        }
    }

    /// Terminal transitions are only legal from an in-flight task.
    fn finish_task(
        &mut self,
        agent_id: AgentId,
        pokemon: String,
        location: String,
        status: TaskStatus,
        element: Option<String>,
    ) -> bool {
        let Some(agent) = self.agent_mut(agent_id) else {
            return false;
        };
        let in_flight = agent.task.as_ref().is_some_and(|task| task.status.is_in_flight());
        if !in_flight {
            return false;
        }
        let element = element.or_else(|| agent.task.as_ref().and_then(|task| task.element.clone()));
        agent.task = Some(TaskRecord {
            pokemon,
            location,
            status,
            element,
        });
        true
    }

    /// Replace the roster wholesale while keeping log-derived fields for ids
    /// present on both sides.
    fn sync_roster(&mut self, roster: Vec<RosterEntry>, outcome: &mut Outcome) {
        let mut seen = BTreeSet::new();
        let mut merged = Vec::with_capacity(roster.len());
        for entry in roster {
            if !seen.insert(entry.id) {
                continue;
            }
            let record = match self.agent(entry.id) {
                Some(existing) => AgentRecord {
                    id: entry.id,
                    name: entry.name,
                    image_num: entry.image_num.unwrap_or(existing.image_num),
                    last_log: existing.last_log.clone(),
                    task: existing.task.clone(),
                },
                None => AgentRecord::new(entry.id, entry.name, entry.image_num.unwrap_or(0)),
            };
            merged.push(record);
        }
        if merged != self.agents {
            self.agents = merged;
            outcome.touch(StateSlice::AgentsState);
        }
    }

    pub fn record_sighting(
        &mut self,
        pokemon: &str,
        location: &str,
        element: &str,
    ) -> (DispatchRecord, Outcome) {
        let record = DispatchRecord::new(pokemon, location, element);
        self.dispatch = Some(record.clone());
        let mut outcome = Outcome::default();
        outcome.touch(StateSlice::CurrentDispatch);
        (record, outcome)
    }

    /// Allocate the next local agent id and insert the agent. The id skips
    /// past any id the roster already uses.
    /// `None` once the id space is exhausted.
    pub fn add_local_agent(
        &mut self,
        name: &str,
        image_num: u32,
    ) -> Option<(AgentRecord, Outcome)> {
        let mut taken = 0;
        for agent in &self.agents {
            taken = taken.max(agent.id.checked_add(1)?);
        }
        let id = self.next_agent_id.max(taken);
        self.next_agent_id = id.checked_add(1)?;
        let record = AgentRecord::new(id, name, image_num);
        self.agents.push(record.clone());

        let mut outcome = Outcome::default();
        outcome.touch(StateSlice::AgentsState);
        outcome.touch(StateSlice::NextAgentId);
        Some((record, outcome))
    }

    /// Back to defaults, keeping only the live connectivity reading and a
    /// placeholder queue.
    pub fn reset(&mut self, queue_name: &str) {
        let websocket = self.system.system_health.websocket;
        let toasts = std::mem::take(&mut self.toasts);
        *self = Self::new(self.limits);
        self.system.system_health.websocket = websocket;
        self.system.queues = vec![QueueSnapshot::empty(queue_name)];
        self.toasts = toasts;
    }

    pub fn push_toast(&mut self, id: String, message: String) {
        self.toasts.push_back(Toast { id, message });
        while self.toasts.len() > self.limits.toast_capacity {
            self.toasts.pop_front();
        }
    }

    pub fn dismiss_toast(&mut self, id: &str) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|toast| toast.id != id);
        self.toasts.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptrack_core::{AgentPresence, HealthLevel, LogLevel, TaskEventKind};

    fn agent(id: AgentId, name: &str) -> AgentRecord {
        AgentRecord::new(id, name, 1)
    }

    fn roster(id: AgentId, name: &str, image_num: Option<u32>) -> RosterEntry {
        RosterEntry {
            id,
            name: name.to_string(),
            image_num,
        }
    }

    fn log(n: usize) -> LogEntry {
        LogEntry {
            id: format!("log-{n}"),
            timestamp: "2024-05-01 10:00:00.000".to_string(),
            level: LogLevel::Info,
            message: format!("line {n}"),
            source: "backend".to_string(),
            metadata: None,
        }
    }

    fn signal(signal: LogSignal) -> ModelEvent {
        ModelEvent::Push(PushEvent::Signal(signal))
    }

    fn processing(agent_id: AgentId) -> ModelEvent {
        signal(LogSignal::TaskProcessing {
            agent_id,
            pokemon: "Pikachu".to_string(),
            location: "Cerulean City".to_string(),
        })
    }

    fn captured(agent_id: AgentId) -> ModelEvent {
        signal(LogSignal::TaskCaptured {
            agent_id,
            pokemon: "Pikachu".to_string(),
            location: "Cerulean City".to_string(),
            element: "lighting".to_string(),
        })
    }

    fn model_with(agents: Vec<AgentRecord>) -> DashboardModel {
        let mut model = DashboardModel::default();
        model.agents = agents;
        model
    }

    #[test]
    fn log_buffer_keeps_last_thousand_in_order() {
        let mut model = DashboardModel::default();
        for n in 0..1005 {
            model.apply(ModelEvent::Push(PushEvent::Log(log(n))));
        }
        assert_eq!(model.logs.len(), 1000);
        let ids: Vec<String> = model.logs.iter().map(|entry| entry.id.clone()).collect();
        let expected: Vec<String> = (5..1005).map(|n| format!("log-{n}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn roster_sync_retains_log_derived_fields() {
        let mut model = model_with(vec![agent(1, "Jessie"), agent(2, "James")]);
        model.apply(processing(1));
        model.apply(signal(LogSignal::AgentLog {
            agent_id: 1,
            agent_name: "Jessie".to_string(),
            text: "Agent processing task: Pikachu at Cerulean City".to_string(),
        }));

        let outcome = model.apply(ModelEvent::Roster(vec![
            roster(1, "Jessie", None),
            roster(3, "Meowth", Some(2)),
        ]));
        assert!(outcome.changed.contains(&StateSlice::AgentsState));

        assert_eq!(model.agents.len(), 2);
        let jessie = model.agent(1).expect("jessie kept");
        assert_eq!(jessie.image_num, 1);
        assert_eq!(
            jessie.task.as_ref().map(|task| task.status),
            Some(TaskStatus::Processing)
        );
        assert!(jessie.last_log.is_some());
        assert!(model.agent(2).is_none());
        let meowth = model.agent(3).expect("meowth added");
        assert_eq!(meowth.image_num, 2);
        assert!(meowth.task.is_none());
    }

    #[test]
    fn identical_roster_changes_nothing() {
        let mut model = model_with(vec![agent(1, "Jessie")]);
        let outcome = model.apply(ModelEvent::Roster(vec![roster(1, "Jessie", Some(1))]));
        assert!(outcome.changed.is_empty());
        assert!(!outcome.dirty);
    }

    #[test]
    fn processing_clears_dispatch_and_sets_task() {
        let mut model = model_with(vec![agent(7, "Rocket Agent")]);
        model.apply(signal(LogSignal::Dispatched {
            pokemon: "Pikachu".to_string(),
            location: "Cerulean City".to_string(),
            element: "lighting".to_string(),
        }));
        assert!(model.dispatch.is_some());

        let outcome = model.apply(processing(7));
        assert_eq!(outcome.followups, vec![Followup::CancelTaskClear(7)]);
        assert!(model.dispatch.is_none());
        assert!(outcome.changed.contains(&StateSlice::CurrentDispatch));
        assert!(outcome.changed.contains(&StateSlice::AgentsState));
        let task = model.agent(7).and_then(|agent| agent.task.clone()).expect("task");
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.element, None);
    }

    #[test]
    fn unknown_agent_is_a_no_op() {
        let mut model = model_with(vec![agent(1, "Jessie")]);
        let outcome = model.apply(captured(99));
        assert!(outcome.changed.is_empty());
        assert!(outcome.followups.is_empty());
        let outcome = model.apply(processing(99));
        assert!(!outcome.changed.contains(&StateSlice::AgentsState));
    }

    #[test]
    fn capture_requires_an_in_flight_task() {
        let mut model = model_with(vec![agent(7, "Rocket Agent")]);
        let outcome = model.apply(captured(7));
        assert!(outcome.followups.is_empty());
        assert!(model.agent(7).and_then(|agent| agent.task.as_ref()).is_none());

        model.apply(processing(7));
        let outcome = model.apply(captured(7));
        assert_eq!(
            outcome.followups,
            vec![
                Followup::Toast("✅ Pikachu captured at Cerulean City!".to_string()),
                Followup::ArmTaskClear(7),
            ]
        );
        let task = model.agent(7).and_then(|agent| agent.task.clone()).expect("task");
        assert_eq!(task.status, TaskStatus::Captured);
        assert_eq!(task.element.as_deref(), Some("lighting"));

        // Already terminal: a second capture does not re-arm anything.
        assert!(model.apply(captured(7)).followups.is_empty());
    }

    #[test]
    fn failure_toasts_escape() {
        let mut model = model_with(vec![agent(2, "James")]);
        model.apply(processing(2));
        let outcome = model.apply(signal(LogSignal::TaskFailed {
            agent_id: 2,
            pokemon: "Pikachu".to_string(),
            location: "Cerulean City".to_string(),
        }));
        assert_eq!(
            outcome.followups[0],
            Followup::Toast("❌ Pikachu escaped at Cerulean City".to_string())
        );
        assert_eq!(
            model.agent(2).and_then(|agent| agent.task.as_ref()).map(|task| task.status),
            Some(TaskStatus::Failed)
        );
    }

    #[test]
    fn clear_only_removes_terminal_tasks() {
        let mut model = model_with(vec![agent(7, "Rocket Agent")]);
        model.apply(processing(7));
        model.apply(captured(7));
        // Fresh work arrives inside the grace window.
        model.apply(processing(7));

        let outcome = model.apply(ModelEvent::ClearTask(7));
        assert!(outcome.changed.is_empty());
        assert_eq!(
            model.agent(7).and_then(|agent| agent.task.as_ref()).map(|task| task.status),
            Some(TaskStatus::Processing)
        );

        model.apply(captured(7));
        let outcome = model.apply(ModelEvent::ClearTask(7));
        assert!(outcome.changed.contains(&StateSlice::AgentsState));
        assert!(model.agent(7).and_then(|agent| agent.task.as_ref()).is_none());
    }

    #[test]
    fn escape_signal_requests_refresh() {
        let mut model = DashboardModel::default();
        let outcome = model.apply(signal(LogSignal::EscapeObserved));
        assert_eq!(outcome.followups, vec![Followup::RefreshEscapeCount]);
        assert!(!outcome.dirty);
    }

    #[test]
    fn queue_poll_replaces_snapshot() {
        let mut model = DashboardModel::default();
        let queue = QueueSnapshot {
            name: "pokemon_tasks".to_string(),
            messages: 4,
            consumers: 2,
            status: HealthLevel::Healthy,
        };
        let outcome = model.apply(ModelEvent::Queue(queue.clone()));
        assert!(outcome.changed.contains(&StateSlice::SystemState));
        assert_eq!(model.system.queues, vec![queue.clone()]);
        assert!(model.apply(ModelEvent::Queue(queue)).changed.is_empty());
    }

    #[test]
    fn connectivity_only_reports_changes() {
        let mut model = DashboardModel::default();
        assert!(model.apply(ModelEvent::Connectivity(false)).changed.is_empty());
        let outcome = model.apply(ModelEvent::Connectivity(true));
        assert!(outcome.changed.contains(&StateSlice::SystemState));
        assert_eq!(model.connectivity(), Connectivity::Connected);
    }

    #[test]
    fn structured_updates_replace_and_upsert() {
        let mut model = DashboardModel::default();
        let mut state = SystemState::default();
        state.system_health.overall = HealthLevel::Healthy;
        state.queues.push(QueueSnapshot::empty("pokemon_tasks"));
        model.apply(ModelEvent::Push(PushEvent::StateUpdate(state.clone())));
        assert_eq!(model.system, state);

        let status = |presence| AgentStatus {
            id: "7".to_string(),
            name: "Rocket Agent".to_string(),
            status: presence,
            current_task: None,
            last_seen: "now".to_string(),
            location: None,
            image_num: None,
        };
        model.apply(ModelEvent::Push(PushEvent::AgentStatus(status(AgentPresence::Online))));
        model.apply(ModelEvent::Push(PushEvent::AgentStatus(status(AgentPresence::Busy))));
        assert_eq!(model.system.agents.len(), 1);
        assert_eq!(model.system.agents[0].status, AgentPresence::Busy);
    }

    #[test]
    fn recent_events_keep_newest() {
        let mut model = DashboardModel::default();
        for n in 0..105 {
            model.apply(ModelEvent::Push(PushEvent::Event(TaskEvent {
                id: format!("e{n}"),
                kind: TaskEventKind::Dispatch,
                agent_id: String::new(),
                task_type: "capture".to_string(),
                timestamp: String::new(),
                details: None,
            })));
        }
        assert_eq!(model.system.recent_events.len(), 100);
        assert_eq!(model.system.recent_events[0].id, "e5");
        assert_eq!(model.system.recent_events[99].id, "e104");
    }

    #[test]
    fn local_agents_get_unique_ids() {
        let mut model = model_with(vec![agent(0, "Jessie"), agent(4, "James")]);
        let (first, outcome) = model.add_local_agent("Meowth", 3).expect("id available");
        assert_eq!(first.id, 5);
        assert!(outcome.changed.contains(&StateSlice::NextAgentId));
        let (second, _) = model.add_local_agent("Wobbuffet", 0).expect("id available");
        assert_eq!(second.id, 6);
        assert_eq!(model.next_agent_id, 7);
    }

    #[test]
    fn local_agent_refused_when_roster_holds_the_largest_id() {
        let mut model = DashboardModel::default();
        model.apply(ModelEvent::Roster(vec![roster(AgentId::MAX, "Giovanni", None)]));
        assert!(model.add_local_agent("Meowth", 0).is_none());
        assert_eq!(model.agents.len(), 1);
        assert_eq!(model.next_agent_id, 0);
    }

    #[test]
    fn reset_keeps_connectivity_and_placeholder_queue() {
        let mut model = model_with(vec![agent(1, "Jessie")]);
        model.apply(ModelEvent::Connectivity(true));
        model.apply(ModelEvent::Push(PushEvent::Log(log(1))));
        model.next_agent_id = 9;
        model.reset("pokemon_tasks");

        assert!(model.agents.is_empty());
        assert!(model.logs.is_empty());
        assert_eq!(model.next_agent_id, 0);
        assert_eq!(model.connectivity(), Connectivity::Connected);
        assert_eq!(model.system.queues, vec![QueueSnapshot::empty("pokemon_tasks")]);
    }

    #[test]
    fn toasts_keep_newest_four() {
        let mut model = DashboardModel::default();
        for n in 0..6 {
            model.push_toast(format!("t{n}"), format!("toast {n}"));
        }
        let ids: Vec<&str> = model.toasts.iter().map(|toast| toast.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3", "t4", "t5"]);
        assert!(model.dismiss_toast("t3"));
        assert!(!model.dismiss_toast("t3"));
    }
}
