//! The single event loop that owns the dashboard model.
//!
//! [`SyncState`] is the synchronous part (model, timers, persistence) and is
//! driven with explicit instants. [`SyncCore`] wires it to the push channel,
//! the pull reconciler, tickers and user commands.

use crate::api::{ApiClient, ApiError, SightingRequest, SpawnRequest};
use crate::config::{Config, SyncTimings};
use crate::connection::ConnectionManager;
use crate::effects::{Effect, EffectScheduler};
use crate::persistence::PersistenceAdapter;
use crate::poller::{Completion, PollKind, PollResult, Reconciler, UserAction};
use crate::reducer::{DashboardModel, Followup, ModelEvent, Outcome};
use crate::registry::{Subscription, TopicRegistry};
use ptrack_core::wire::{PushEvent, Topic};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    AddSighting {
        pokemon: String,
        location: String,
        element: String,
    },
    SpawnAgent {
        name: String,
        image_num: u32,
    },
    Reset,
    Reconnect,
    Shutdown,
}

pub struct SyncState {
    model: DashboardModel,
    persistence: PersistenceAdapter,
    effects: EffectScheduler,
    timings: SyncTimings,
    queue_name: String,
    revision: u64,
}

impl SyncState {
    pub fn new(
        persistence: PersistenceAdapter,
        timings: SyncTimings,
        queue_name: impl Into<String>,
    ) -> Self {
        let model = persistence.restore(timings.model_limits());
        Self {
            model,
            persistence,
            effects: EffectScheduler::new(),
            timings,
            queue_name: queue_name.into(),
            revision: 0,
        }
    }

    pub fn model(&self) -> &DashboardModel {
        &self.model
    }

    /// Bumped whenever visible state changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_effects(&self) -> usize {
        self.effects.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.effects.next_deadline()
    }

    /// Apply one event; returns pulls the caller must start.
    pub fn apply(&mut self, event: ModelEvent, now: Instant) -> Vec<PollKind> {
        let outcome = self.model.apply(event);
        self.settle(outcome, now)
    }

    pub fn apply_poll(
        &mut self,
        kind: PollKind,
        result: Result<Option<PollResult>, ApiError>,
        now: Instant,
    ) -> Vec<PollKind> {
        match result {
            Ok(Some(result)) => self.apply(result.into(), now),
            Ok(None) => {
                debug!(event = "poll_no_value", kind = kind.as_str());
                Vec::new()
            }
            Err(err) => {
                debug!(event = "poll_failed", kind = kind.as_str(), error = %err);
                Vec::new()
            }
        }
    }

    fn settle(&mut self, outcome: Outcome, now: Instant) -> Vec<PollKind> {
        self.persistence.persist(&self.model, &outcome.changed);
        if outcome.dirty {
            self.revision += 1;
        }
        let mut pulls = Vec::new();
        for followup in outcome.followups {
            match followup {
                Followup::RefreshEscapeCount => {
                    if !pulls.contains(&PollKind::EscapeCount) {
                        pulls.push(PollKind::EscapeCount);
                    }
                }
                Followup::ArmTaskClear(agent_id) => {
                    self.effects
                        .arm(now, self.timings.task_grace, Effect::ClearTask(agent_id));
                }
                Followup::CancelTaskClear(agent_id) => {
                    self.effects.cancel(&Effect::ClearTask(agent_id));
                }
                Followup::Toast(message) => self.notify(message, now),
            }
        }
        pulls
    }

    pub fn notify(&mut self, message: impl Into<String>, now: Instant) {
        let id = uuid::Uuid::new_v4().to_string();
        self.model.push_toast(id.clone(), message.into());
        self.effects
            .arm(now, self.timings.toast_lifetime, Effect::DismissToast(id));
        self.revision += 1;
    }

    pub fn fire_due(&mut self, now: Instant) -> Vec<PollKind> {
        let mut pulls = Vec::new();
        for effect in self.effects.take_due(now) {
            match effect {
                Effect::ClearTask(agent_id) => {
                    pulls.extend(self.apply(ModelEvent::ClearTask(agent_id), now));
                }
                Effect::DismissToast(id) => {
                    if self.model.dismiss_toast(&id) {
                        self.revision += 1;
                    }
                }
            }
        }
        pulls
    }

    pub fn begin_sighting(
        &mut self,
        pokemon: &str,
        location: &str,
        element: &str,
        now: Instant,
    ) -> SightingRequest {
        self.notify(format!("📝 Added {pokemon} sighting at {location}"), now);
        let (record, outcome) = self.model.record_sighting(pokemon, location, element);
        self.settle(outcome, now);
        SightingRequest {
            pokemon: record.pokemon,
            location: record.location,
            element: record.element,
        }
    }

    /// `None` when no local id is left; the failure is toasted.
    pub fn begin_spawn(
        &mut self,
        name: &str,
        image_num: u32,
        now: Instant,
    ) -> Option<SpawnRequest> {
        let Some((record, outcome)) = self.model.add_local_agent(name, image_num) else {
            warn!(event = "agent_id_exhausted", name);
            self.notify(UserAction::Spawn.failure_message(), now);
            return None;
        };
        self.settle(outcome, now);
        self.notify(format!("📝 Spawned agent {name}"), now);
        Some(SpawnRequest {
            id: record.id,
            name: record.name,
            image_num: record.image_num,
        })
    }

    /// Local half of a reset; the backend call follows.
    pub fn begin_reset(&mut self) {
        self.persistence.clear();
        self.model.reset(&self.queue_name);
        self.revision += 1;
        info!(event = "state_reset");
    }

    pub fn finish_action(
        &mut self,
        action: UserAction,
        result: Result<(), ApiError>,
        now: Instant,
    ) -> Vec<PollKind> {
        match result {
            Ok(()) if action == UserAction::Reset => {
                self.notify("System reset", now);
                vec![PollKind::QueueStats, PollKind::EscapeCount]
            }
            Ok(()) => Vec::new(),
            Err(err) => {
                warn!(event = "user_action_failed", action = action.as_str(), error = %err);
                self.notify(action.failure_message(), now);
                Vec::new()
            }
        }
    }

    pub fn teardown(&mut self) {
        self.effects.cancel_all();
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ws_url: String,
    pub queue_name: String,
    pub timings: SyncTimings,
}

impl From<&Config> for SyncConfig {
    fn from(config: &Config) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            queue_name: config.queue_name.clone(),
            timings: config.timings,
        }
    }
}

pub struct SyncCore {
    config: SyncConfig,
    state: SyncState,
    connection: ConnectionManager,
    reconciler: Reconciler,
    model_tx: watch::Sender<DashboardModel>,
}

impl SyncCore {
    pub fn new(config: SyncConfig, persistence: PersistenceAdapter, api: ApiClient) -> Self {
        let state = SyncState::new(persistence, config.timings, config.queue_name.clone());
        let connection =
            ConnectionManager::new(TopicRegistry::new(), config.timings.reconnect_policy());
        let reconciler = Reconciler::new(api, config.queue_name.clone());
        let (model_tx, _) = watch::channel(state.model().clone());
        Self {
            config,
            state,
            connection,
            reconciler,
            model_tx,
        }
    }

    pub fn subscribe_model(&self) -> watch::Receiver<DashboardModel> {
        self.model_tx.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn forward_topics(&self, tx: mpsc::UnboundedSender<PushEvent>) -> Vec<Subscription> {
        Topic::ALL
            .iter()
            .map(|topic| {
                let tx = tx.clone();
                self.connection.subscribe(*topic, move |event| {
                    tx.send(event.clone())
                        .map_err(|_| anyhow::anyhow!("sync loop is gone"))
                })
            })
            .collect()
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<SyncCommand>) {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        let subscriptions = self.forward_topics(push_tx);

        let mut published = self.state.revision();
        if let Err(err) = self.connection.spawn_connect(&self.config.ws_url) {
            warn!(event = "push_connect_rejected", error = %err);
        }
        self.sample_connectivity();
        self.reconciler.poll(PollKind::EscapeCount);
        self.publish(&mut published);

        let timings = self.config.timings;
        let start = tokio::time::Instant::now();
        let mut heartbeat = tokio::time::interval_at(start + timings.heartbeat, timings.heartbeat);
        let mut queue_ticker = tokio::time::interval(timings.queue_poll);
        let mut roster_ticker = tokio::time::interval(timings.roster_poll);
        let mut live_ticker = tokio::time::interval(timings.live_user_poll);

        loop {
            let deadline = self.state.next_deadline();
            let wake_at = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                Some(event) = push_rx.recv() => {
                    let pulls = self.state.apply(ModelEvent::Push(event), Instant::now());
                    self.reconciler.poll_all(pulls);
                }
                _ = heartbeat.tick() => self.sample_connectivity(),
                _ = queue_ticker.tick() => self.reconciler.poll(PollKind::QueueStats),
                _ = roster_ticker.tick() => self.reconciler.poll(PollKind::Roster),
                _ = live_ticker.tick() => self.reconciler.poll(PollKind::LiveUsers),
                Some(completion) = self.reconciler.next_completion() => {
                    let now = Instant::now();
                    let pulls = match completion {
                        Completion::Poll { kind, result } => self.state.apply_poll(kind, result, now),
                        Completion::Action { action, result } => {
                            self.state.finish_action(action, result, now)
                        }
                    };
                    self.reconciler.poll_all(pulls);
                }
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    let pulls = self.state.fire_due(Instant::now());
                    self.reconciler.poll_all(pulls);
                }
                command = commands.recv() => {
                    match command {
                        None | Some(SyncCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command),
                    }
                }
            }

            self.publish(&mut published);
        }

        self.connection.disconnect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.reconciler.abort_all();
        self.state.teardown();
        info!(event = "sync_stopped");
    }

    fn publish(&self, published: &mut u64) {
        if self.state.revision() != *published {
            *published = self.state.revision();
            self.model_tx.send_replace(self.state.model().clone());
        }
    }

    fn sample_connectivity(&mut self) {
        let open = self.connection.is_connected();
        self.state.apply(ModelEvent::Connectivity(open), Instant::now());
    }

    fn handle_command(&mut self, command: SyncCommand) {
        let now = Instant::now();
        match command {
            SyncCommand::AddSighting {
                pokemon,
                location,
                element,
            } => {
                let request = self.state.begin_sighting(&pokemon, &location, &element, now);
                self.reconciler.submit_sighting(request);
            }
            SyncCommand::SpawnAgent { name, image_num } => {
                if let Some(request) = self.state.begin_spawn(&name, image_num, now) {
                    self.reconciler.spawn_agent(request);
                }
            }
            SyncCommand::Reset => {
                self.state.begin_reset();
                self.reconciler.reset_system();
            }
            SyncCommand::Reconnect => {
                if let Err(err) = self.connection.spawn_reconnect() {
                    warn!(event = "push_reconnect_rejected", error = %err);
                }
                self.sample_connectivity();
            }
            SyncCommand::Shutdown => {}
        }
    }
}
