//! Game session state and authoritative tick loop

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::auth::IdentityPolicy;
use crate::config::Config;
use crate::util::time::{tick_duration, SimClock, Timer};

use super::authority::{Endpoint, EndpointId};
use super::command::{Command, CommandEnvelope, FailureClass};
use super::entity::{EntityId, EntityView, SpawnSpec};
use super::snapshot::{ReplicationStats, SnapshotBuilder};
use super::world::{EntityCounts, ReplicationEvent, World};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// World being built
    #[default]
    Loading,
    /// World built, tick loop not running yet
    Ready,
    /// Accepting connections and commands
    Active,
    /// Shut down
    Stopped,
}

impl SessionPhase {
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        matches!(
            (self, next),
            (SessionPhase::Loading, SessionPhase::Ready)
                | (SessionPhase::Ready, SessionPhase::Active)
                | (SessionPhase::Loading, SessionPhase::Stopped)
                | (SessionPhase::Ready, SessionPhase::Stopped)
                | (SessionPhase::Active, SessionPhase::Stopped)
        )
    }
}

/// Events produced by one flush of the world outbox
#[derive(Debug, Clone)]
pub struct ReplicationBatch {
    /// Increases by one per published batch, starting at 1
    pub seq: u64,
    pub tick: u64,
    pub events: Vec<ReplicationEvent>,
}

/// Reply to a successful connect
#[derive(Debug, Clone)]
pub struct Joined {
    pub endpoint_id: EndpointId,
    pub controller_id: EntityId,
    /// Sequence number the snapshot reflects. Batches at or below it are already included.
    pub as_of: u64,
    pub snapshot: Vec<ReplicationEvent>,
}

/// Fresh full-state sync for an observer that fell behind
#[derive(Debug, Clone)]
pub struct Resynced {
    pub as_of: u64,
    pub snapshot: Vec<ReplicationEvent>,
}

/// Messages from transport tasks into the session
#[derive(Debug)]
pub enum SessionInput {
    Connect {
        endpoint: EndpointId,
        reply: oneshot::Sender<Result<Joined, SessionError>>,
    },
    Disconnect {
        endpoint: EndpointId,
    },
    Resync {
        endpoint: EndpointId,
        reply: oneshot::Sender<Result<Resynced, SessionError>>,
    },
    Command(CommandEnvelope),
    Inspect {
        entity_id: EntityId,
        reply: oneshot::Sender<Option<EntityView>>,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RejectionCounts {
    pub authority_violation: u64,
    pub precondition_failure: u64,
    pub stale_reference: u64,
}

/// Session statistics published for the health route
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub phase: SessionPhase,
    pub tick: u64,
    pub seq: u64,
    pub entities: EntityCounts,
    pub commands_applied: u64,
    pub commands_rejected: RejectionCounts,
    pub replication: ReplicationStats,
    pub slow_ticks: u64,
}

/// Session errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is full")]
    Full,

    #[error("Session is not accepting players")]
    NotActive,

    #[error("Endpoint {0} is already connected")]
    AlreadyConnected(EndpointId),

    #[error("Endpoint {0} is not connected")]
    NotConnected(EndpointId),

    #[error("Session has shut down")]
    Closed,

    #[error("Cannot move session from {from:?} to {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

/// Handle to the running session
#[derive(Clone)]
pub struct SessionHandle {
    input_tx: mpsc::Sender<SessionInput>,
    batch_tx: broadcast::Sender<Arc<ReplicationBatch>>,
    stats: Arc<RwLock<SessionStats>>,
    endpoints: Arc<DashMap<EndpointId, EntityId>>,
}

impl SessionHandle {
    /// Subscribe to replication batches. Subscribe before `connect` so no
    /// batch after the join snapshot is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ReplicationBatch>> {
        self.batch_tx.subscribe()
    }

    pub async fn connect(&self, endpoint: EndpointId) -> Result<Joined, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(SessionInput::Connect { endpoint, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn disconnect(&self, endpoint: EndpointId) {
        let _ = self
            .input_tx
            .send(SessionInput::Disconnect { endpoint })
            .await;
    }

    /// Request a full snapshot for an endpoint whose batch stream lagged
    pub async fn resync(&self, endpoint: EndpointId) -> Result<Resynced, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(SessionInput::Resync { endpoint, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Forward a command from a connected client
    pub async fn send_command(
        &self,
        endpoint: EndpointId,
        entity_id: EntityId,
        command: Command,
    ) -> Result<(), SessionError> {
        self.input_tx
            .send(SessionInput::Command(CommandEnvelope {
                entity_id,
                sender: Endpoint::Client(endpoint),
                command,
            }))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn inspect(&self, entity_id: EntityId) -> Result<Option<EntityView>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(SessionInput::Inspect { entity_id, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    pub fn connected(&self) -> usize {
        self.endpoints.len()
    }
}

/// The authoritative game session
pub struct GameSession {
    world: World,
    phase: SessionPhase,
    clock: SimClock,
    tick_rate: u32,
    seq: u64,
    max_clients: usize,
    stats: SessionStats,
    input_rx: mpsc::Receiver<SessionInput>,
    batch_tx: broadcast::Sender<Arc<ReplicationBatch>>,
    shared_stats: Arc<RwLock<SessionStats>>,
    endpoints: Arc<DashMap<EndpointId, EntityId>>,
}

impl GameSession {
    /// Build the world and return the session in the Ready phase
    pub fn new(config: &Config) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (batch_tx, _) = broadcast::channel(config.replication_buffer.max(1));
        let shared_stats = Arc::new(RwLock::new(SessionStats::default()));
        let endpoints = Arc::new(DashMap::new());

        let handle = SessionHandle {
            input_tx,
            batch_tx: batch_tx.clone(),
            stats: shared_stats.clone(),
            endpoints: endpoints.clone(),
        };

        let seed = config.session_seed.unwrap_or_else(rand::random);
        let world = World::new(
            config.game.clone(),
            IdentityPolicy::from_secret(config.identity_secret.clone()),
            seed,
        );

        let mut session = Self {
            world,
            phase: SessionPhase::Loading,
            clock: SimClock::new(config.tick_rate),
            tick_rate: config.tick_rate,
            seq: 0,
            max_clients: config.max_clients,
            stats: SessionStats::default(),
            input_rx,
            batch_tx,
            shared_stats,
            endpoints,
        };
        session.phase = SessionPhase::Ready;
        session.publish_stats();

        debug!(seed, "Session world loaded");
        (session, handle)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    fn transition(&mut self, next: SessionPhase) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        info!(from = ?self.phase, to = ?next, "Session phase changed");
        self.phase = next;
        self.publish_stats();
        Ok(())
    }

    /// Open the session for players
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.transition(SessionPhase::Active)
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.transition(SessionPhase::Stopped)
    }

    /// Run the tick loop until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.start() {
            error!(error = %e, "Session failed to start");
            return;
        }
        info!(tick_rate = self.tick_rate, max_clients = self.max_clients, "Session started");

        let tick_duration = tick_duration(self.tick_rate);
        let budget_micros = tick_duration.as_micros() as u64;
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let timer = Timer::new();
                    self.step();

                    let elapsed = timer.elapsed_micros();
                    if elapsed > budget_micros {
                        self.stats.slow_ticks += 1;
                        warn!(tick = self.clock.tick(), elapsed_us = elapsed, "Slow tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.stop() {
            warn!(error = %e, "Session stop failed");
        }
        info!(tick = self.clock.tick(), "Session stopped");
    }

    /// One fixed tick: drain inputs in arrival order, simulate, broadcast
    pub fn step(&mut self) {
        self.process_inputs();

        if self.phase == SessionPhase::Active {
            self.clock.advance();
            self.world.tick(self.clock.dt(), self.clock.now());
        }

        self.flush();
        self.publish_stats();
    }

    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            match input {
                SessionInput::Connect { endpoint, reply } => {
                    let result = self.handle_connect(endpoint);
                    if let Err(e) = &result {
                        debug!(endpoint = %endpoint, error = %e, "Connect refused");
                    }
                    let _ = reply.send(result);
                }
                SessionInput::Disconnect { endpoint } => {
                    self.handle_disconnect(endpoint);
                }
                SessionInput::Resync { endpoint, reply } => {
                    let _ = reply.send(self.handle_resync(endpoint));
                }
                SessionInput::Command(envelope) => {
                    self.handle_command(envelope);
                }
                SessionInput::Inspect { entity_id, reply } => {
                    let _ = reply.send(self.world.view(entity_id));
                }
            }
        }
    }

    fn handle_connect(&mut self, endpoint: EndpointId) -> Result<Joined, SessionError> {
        if self.phase != SessionPhase::Active {
            return Err(SessionError::NotActive);
        }
        if self.endpoints.contains_key(&endpoint) {
            return Err(SessionError::AlreadyConnected(endpoint));
        }
        if self.endpoints.len() >= self.max_clients {
            return Err(SessionError::Full);
        }

        let Resynced { as_of, snapshot } = self.sync_snapshot();

        let controller_id = self
            .world
            .spawn(Endpoint::Client(endpoint), SpawnSpec::Controller);
        self.endpoints.insert(endpoint, controller_id);

        info!(
            endpoint = %endpoint,
            controller = %controller_id,
            connected = self.endpoints.len(),
            "Endpoint joined session"
        );

        Ok(Joined {
            endpoint_id: endpoint,
            controller_id,
            as_of,
            snapshot,
        })
    }

    fn handle_resync(&mut self, endpoint: EndpointId) -> Result<Resynced, SessionError> {
        if !self.endpoints.contains_key(&endpoint) {
            return Err(SessionError::NotConnected(endpoint));
        }

        let resynced = self.sync_snapshot();
        self.stats.replication.record_resync();
        info!(endpoint = %endpoint, as_of = resynced.as_of, "Endpoint resynced");
        Ok(resynced)
    }

    /// Full snapshot tagged with the seq it reflects
    fn sync_snapshot(&mut self) -> Resynced {
        // Publish pending changes so the snapshot is exactly the state as of `seq`
        self.flush();
        let snapshot = SnapshotBuilder::initial_sync(&self.world);
        self.stats.replication.record_snapshot();
        Resynced {
            as_of: self.seq,
            snapshot,
        }
    }

    fn handle_disconnect(&mut self, endpoint: EndpointId) {
        let Some((_, controller_id)) = self.endpoints.remove(&endpoint) else {
            return;
        };

        self.world.despawn(controller_id);

        info!(
            endpoint = %endpoint,
            controller = %controller_id,
            connected = self.endpoints.len(),
            "Endpoint left session"
        );
    }

    fn handle_command(&mut self, envelope: CommandEnvelope) {
        if self.phase != SessionPhase::Active {
            return;
        }

        let entity_id = envelope.entity_id;
        let sender = envelope.sender;
        let name = envelope.command.name();

        match self.world.handle_command(envelope) {
            Ok(()) => {
                self.stats.commands_applied += 1;
            }
            Err(rejection) => match rejection.class() {
                FailureClass::AuthorityViolation => {
                    self.stats.commands_rejected.authority_violation += 1;
                    warn!(entity_id = %entity_id, sender = %sender, command = name, "Command from non-authority rejected");
                }
                FailureClass::PreconditionFailure => {
                    self.stats.commands_rejected.precondition_failure += 1;
                    debug!(entity_id = %entity_id, sender = %sender, command = name, reason = %rejection, "Command precondition failed");
                }
                FailureClass::StaleReference => {
                    self.stats.commands_rejected.stale_reference += 1;
                    debug!(entity_id = %entity_id, sender = %sender, command = name, "Command for stale entity dropped");
                }
            },
        }
    }

    /// Publish everything in the outbox as one batch
    fn flush(&mut self) {
        if !self.world.has_pending_events() {
            return;
        }

        let events = self.world.drain_events();
        self.seq += 1;
        self.stats.replication.record_batch(events.len());

        // No subscribers is not an error
        let _ = self.batch_tx.send(Arc::new(ReplicationBatch {
            seq: self.seq,
            tick: self.clock.tick(),
            events,
        }));
    }

    fn publish_stats(&mut self) {
        self.stats.phase = self.phase;
        self.stats.tick = self.clock.tick();
        self.stats.seq = self.seq;
        self.stats.entities = self.world.counts();
        *self.shared_stats.write() = self.stats.clone();
    }
}
