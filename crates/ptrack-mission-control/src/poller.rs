//! Pull-side reconciliation: periodic and on-demand requests whose results
//! are fed back into the sync loop as they complete.

use crate::api::{ApiClient, ApiError, SightingRequest, SpawnRequest};
use crate::reducer::ModelEvent;
use ptrack_core::{QueueSnapshot, RosterEntry};
use std::collections::HashSet;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
    QueueStats,
    Roster,
    LiveUsers,
    EscapeCount,
}

impl PollKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollKind::QueueStats => "queue_stats",
            PollKind::Roster => "roster",
            PollKind::LiveUsers => "live_users",
            PollKind::EscapeCount => "escape_count",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Queue(QueueSnapshot),
    Roster(Vec<RosterEntry>),
    LiveUsers(u64),
    EscapeCount(u64),
}

impl From<PollResult> for ModelEvent {
    fn from(result: PollResult) -> Self {
        match result {
            PollResult::Queue(queue) => ModelEvent::Queue(queue),
            PollResult::Roster(roster) => ModelEvent::Roster(roster),
            PollResult::LiveUsers(count) => ModelEvent::LiveUsers(count),
            PollResult::EscapeCount(count) => ModelEvent::EscapeCount(count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Sighting,
    Spawn,
    Reset,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Sighting => "sighting",
            UserAction::Spawn => "spawn",
            UserAction::Reset => "reset",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            UserAction::Sighting => "Failed to add sighting!",
            UserAction::Spawn => "Failed to add agent!",
            UserAction::Reset => "Failed to reset backend",
        }
    }
}

#[derive(Debug)]
pub enum Completion {
    Poll {
        kind: PollKind,
        result: Result<Option<PollResult>, ApiError>,
    },
    Action {
        action: UserAction,
        result: Result<(), ApiError>,
    },
}

pub async fn run_poll(
    api: &ApiClient,
    kind: PollKind,
    queue_name: &str,
) -> Result<Option<PollResult>, ApiError> {
    Ok(match kind {
        PollKind::QueueStats => api.queue_stats(queue_name).await?.map(PollResult::Queue),
        PollKind::Roster => api.agents().await?.map(PollResult::Roster),
        PollKind::LiveUsers => api.live_user_count().await?.map(PollResult::LiveUsers),
        PollKind::EscapeCount => api.dead_letter_count().await?.map(PollResult::EscapeCount),
    })
}

/// In-flight pull requests. At most one request per poll kind runs at a time
/// so a slow backend does not pile up duplicates.
pub struct Reconciler {
    api: ApiClient,
    queue_name: String,
    tasks: JoinSet<Completion>,
    in_flight: HashSet<PollKind>,
}

impl Reconciler {
    pub fn new(api: ApiClient, queue_name: impl Into<String>) -> Self {
        Self {
            api,
            queue_name: queue_name.into(),
            tasks: JoinSet::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn is_in_flight(&self, kind: PollKind) -> bool {
        self.in_flight.contains(&kind)
    }

    pub fn poll(&mut self, kind: PollKind) {
        if !self.in_flight.insert(kind) {
            debug!(event = "poll_skipped", kind = kind.as_str());
            return;
        }
        let api = self.api.clone();
        let queue_name = self.queue_name.clone();
        self.tasks.spawn(async move {
            let result = run_poll(&api, kind, &queue_name).await;
            Completion::Poll { kind, result }
        });
    }

    pub fn poll_all(&mut self, kinds: impl IntoIterator<Item = PollKind>) {
        for kind in kinds {
            self.poll(kind);
        }
    }

    pub fn submit_sighting(&mut self, request: SightingRequest) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let result = api.submit_sighting(&request).await.map(|_| ());
            Completion::Action {
                action: UserAction::Sighting,
                result,
            }
        });
    }

    pub fn spawn_agent(&mut self, request: SpawnRequest) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let result = api.spawn_agent(&request).await.map(|_| ());
            Completion::Action {
                action: UserAction::Spawn,
                result,
            }
        });
    }

    pub fn reset_system(&mut self) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            Completion::Action {
                action: UserAction::Reset,
                result: api.reset_system().await,
            }
        });
    }

    /// Next finished request. `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        loop {
            match self.tasks.join_next().await? {
                Ok(completion) => {
                    if let Completion::Poll { kind, .. } = &completion {
                        self.in_flight.remove(kind);
                    }
                    return Some(completion);
                }
                Err(err) => {
                    // The kind of a panicked poll is unknown here; clear them all
                    // so polling cannot stall.
                    debug!(event = "pull_task_aborted", error = %err);
                    if !err.is_cancelled() {
                        self.in_flight.clear();
                    }
                }
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
        self.in_flight.clear();
    }
}
