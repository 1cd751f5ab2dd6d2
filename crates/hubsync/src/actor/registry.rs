//! Keyed single-writer actors.
//!
//! The registry maps each [`EntityId`] to at most one live actor task. An
//! actor owns two bounded mailboxes, interactive and background, and runs
//! one command at a time, so no two operations on the same entity ever
//! overlap. Actors are created on first use and retire once their mailboxes
//! have been empty for the configured idle timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::cache::{AccessToken, holding_slot};
use crate::collab::{Diagnostic, RemoteEntity};
use crate::dispatch::{EntityTarget, UpdateMessage};

use super::entity::{CredentialChoice, SyncContext, SyncOutcome, SyncPermit, sync_entity};
use super::error::SyncError;
use super::id::{EntityId, UserId};

/// How often a command is re-routed after finding a retired mailbox.
const MAX_ROUTING_ATTEMPTS: usize = 3;

pub type SyncResult = Result<SyncOutcome, SyncError>;

/// Lifecycle state of an entity actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Idle,
    Syncing,
    /// The entity is gone upstream. Only a pushed update revives it.
    Deleted,
}

/// Result of applying a pushed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Synced(SyncOutcome),
    /// The carried payload was stored without a remote call.
    Persisted,
    Tombstoned,
    /// The delivery was processed before; nothing was done.
    Duplicate,
}

enum Command {
    Sync {
        reply: oneshot::Sender<SyncResult>,
    },
    SyncInteractive {
        user: UserId,
        reply: oneshot::Sender<SyncResult>,
    },
    Update {
        message: Box<UpdateMessage<EntityTarget>>,
        reply: oneshot::Sender<Result<UpdateOutcome, SyncError>>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Interactive,
    Background,
}

struct Mailbox {
    interactive: mpsc::Sender<Command>,
    background: mpsc::Sender<Command>,
    state: Arc<Mutex<ActorState>>,
    generation: u64,
}

impl Mailbox {
    fn sender(&self, lane: Lane) -> &mpsc::Sender<Command> {
        match lane {
            Lane::Interactive => &self.interactive,
            Lane::Background => &self.background,
        }
    }
}

struct RegistryInner {
    actors: Mutex<HashMap<EntityId, Mailbox>>,
    context: Arc<SyncContext>,
    generations: AtomicU64,
}

impl RegistryInner {
    fn lock_actors(&self) -> MutexGuard<'_, HashMap<EntityId, Mailbox>> {
        self.actors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the entry for `id` if it still belongs to `generation`.
    fn forget(&self, id: EntityId, generation: u64) {
        let mut actors = self.lock_actors();
        if actors.get(&id).is_some_and(|m| m.generation == generation) {
            actors.remove(&id);
        }
    }
}

/// Registry of live entity actors.
#[derive(Clone)]
pub struct ActorRegistry {
    inner: Arc<RegistryInner>,
}

impl ActorRegistry {
    pub fn new(context: SyncContext) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                actors: Mutex::new(HashMap::new()),
                context: Arc::new(context),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.context
    }

    /// Handle to the actor for `id`. The actor itself starts on first use.
    #[must_use]
    pub fn get(&self, id: EntityId) -> ActorRef {
        ActorRef {
            id,
            registry: self.clone(),
        }
    }

    /// Number of live actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_actors().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// State of the live actor for `id`, if there is one.
    #[must_use]
    pub fn state(&self, id: &EntityId) -> Option<ActorState> {
        let actors = self.inner.lock_actors();
        actors
            .get(id)
            .map(|m| *m.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Start an actor task. Called with the actor map locked.
    fn spawn(&self, id: EntityId) -> Mailbox {
        let capacity = self.inner.context.config.mailbox_capacity.max(1);
        let (interactive_tx, interactive_rx) = mpsc::channel(capacity);
        let (background_tx, background_rx) = mpsc::channel(capacity);
        let state = Arc::new(Mutex::new(ActorState::Idle));
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

        let actor = Actor {
            id,
            generation,
            registry: Arc::downgrade(&self.inner),
            context: Arc::clone(&self.inner.context),
            interactive: interactive_rx,
            background: background_rx,
            state: Arc::clone(&state),
            deferred_interactive: None,
            deferred_background: None,
            retired: false,
        };
        tracing::debug!(entity = %id, generation, "Starting actor");
        tokio::spawn(actor.run());

        Mailbox {
            interactive: interactive_tx,
            background: background_tx,
            state,
            generation,
        }
    }

    /// Put `command` into the mailbox of `id`, starting the actor if needed.
    ///
    /// Waits while the mailbox is full. A mailbox found closed belongs to a
    /// retired actor; the entry is replaced and delivery retried.
    async fn deliver(&self, id: EntityId, lane: Lane, mut command: Command) -> Result<(), SyncError> {
        for _ in 0..MAX_ROUTING_ATTEMPTS {
            let (sender, generation) = {
                let mut actors = self.inner.lock_actors();
                let mailbox = actors.entry(id).or_insert_with(|| self.spawn(id));
                let sender = mailbox.sender(lane).clone();
                let generation = mailbox.generation;
                match sender.try_send(command) {
                    Ok(()) => return Ok(()),
                    Err(TrySendError::Full(returned)) => {
                        command = returned;
                        (sender, generation)
                    }
                    Err(TrySendError::Closed(returned)) => {
                        command = returned;
                        actors.remove(&id);
                        continue;
                    }
                }
            };

            tracing::debug!(entity = %id, ?lane, "Mailbox full, waiting");
            match sender.send(command).await {
                Ok(()) => return Ok(()),
                Err(SendError(returned)) => {
                    command = returned;
                    self.inner.forget(id, generation);
                }
            }
        }
        Err(SyncError::ActorStopped(id))
    }
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

/// Handle for sending commands to one entity's actor.
#[derive(Clone)]
pub struct ActorRef {
    id: EntityId,
    registry: ActorRegistry,
}

impl ActorRef {
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Background refresh with any usable credential.
    ///
    /// Calls that queue up behind a running sync share its result.
    pub async fn sync(&self) -> SyncResult {
        let (reply, rx) = oneshot::channel();
        self.registry
            .deliver(self.id, Lane::Background, Command::Sync { reply })
            .await?;
        rx.await.map_err(|_| SyncError::ActorStopped(self.id))?
    }

    /// Refresh on behalf of `user`, with that user's credential.
    ///
    /// Runs ahead of queued background work, after the running operation.
    pub async fn sync_interactive(&self, user: UserId) -> SyncResult {
        let (reply, rx) = oneshot::channel();
        self.registry
            .deliver(
                self.id,
                Lane::Interactive,
                Command::SyncInteractive { user, reply },
            )
            .await?;
        rx.await.map_err(|_| SyncError::ActorStopped(self.id))?
    }

    /// Apply a pushed update.
    pub async fn handle_update(
        &self,
        message: UpdateMessage<EntityTarget>,
    ) -> Result<UpdateOutcome, SyncError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Update {
            message: Box::new(message),
            reply,
        };
        self.registry
            .deliver(self.id, Lane::Background, command)
            .await?;
        rx.await.map_err(|_| SyncError::ActorStopped(self.id))?
    }
}

impl std::fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("id", &self.id).finish()
    }
}

struct Actor {
    id: EntityId,
    generation: u64,
    registry: Weak<RegistryInner>,
    context: Arc<SyncContext>,
    interactive: mpsc::Receiver<Command>,
    background: mpsc::Receiver<Command>,
    state: Arc<Mutex<ActorState>>,
    /// Commands taken off a mailbox while coalescing, next in line.
    deferred_interactive: Option<Command>,
    deferred_background: Option<Command>,
    retired: bool,
}

impl Actor {
    async fn run(mut self) {
        match self.context.store.is_tombstoned(&self.id).await {
            Ok(true) => self.set_state(ActorState::Deleted),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(entity = %self.id, error = %e, "Failed to read tombstone, assuming live");
            }
        }

        while let Some(command) = self.next_command().await {
            self.handle(command).await;
        }
        tracing::debug!(entity = %self.id, generation = self.generation, "Actor stopped");
    }

    fn state(&self) -> ActorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ActorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn next_command(&mut self) -> Option<Command> {
        if let Some(command) = self.deferred_interactive.take() {
            return Some(command);
        }
        if let Ok(command) = self.interactive.try_recv() {
            return Some(command);
        }
        if let Some(command) = self.deferred_background.take() {
            return Some(command);
        }

        let idle_timeout = self.context.config.idle_timeout();
        loop {
            if self.retired {
                // Drain whatever was accepted before the mailboxes closed.
                return match self.interactive.try_recv() {
                    Ok(command) => Some(command),
                    Err(_) => self.background.try_recv().ok(),
                };
            }

            tokio::select! {
                biased;

                Some(command) = self.interactive.recv() => return Some(command),
                Some(command) = self.background.recv() => return Some(command),
                () = tokio::time::sleep(idle_timeout) => {}
            }

            self.retired = self.try_retire();
        }
    }

    /// Remove this actor from the registry if both mailboxes are empty.
    fn try_retire(&mut self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            self.interactive.close();
            self.background.close();
            return true;
        };

        let mut actors = registry.lock_actors();
        if !self.interactive.is_empty() || !self.background.is_empty() {
            return false;
        }
        if actors
            .get(&self.id)
            .is_some_and(|m| m.generation == self.generation)
        {
            actors.remove(&self.id);
        }
        drop(actors);

        self.interactive.close();
        self.background.close();
        tracing::debug!(entity = %self.id, "Actor idle, retiring");
        true
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Sync { reply } => {
                let result = self.sync(CredentialChoice::Any, false).await;
                self.coalesce_background(&result);
                let _ = reply.send(result);
            }
            Command::SyncInteractive { user, reply } => {
                let result = self.sync(CredentialChoice::Principal(user), false).await;
                self.coalesce_interactive(user, &result);
                let _ = reply.send(result);
            }
            Command::Update { message, reply } => {
                let result = self.apply_update(*message).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Answer background syncs that queued up behind the one just run.
    fn coalesce_background(&mut self, result: &SyncResult) {
        let mut coalesced = 0;
        loop {
            match self.background.try_recv() {
                Ok(Command::Sync { reply }) => {
                    let _ = reply.send(result.clone());
                    coalesced += 1;
                }
                Ok(other) => {
                    self.deferred_background = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        if coalesced > 0 {
            tracing::debug!(entity = %self.id, coalesced, "Coalesced background syncs");
        }
    }

    /// Answer interactive syncs for the same user that queued up behind this one.
    fn coalesce_interactive(&mut self, user: UserId, result: &SyncResult) {
        let mut coalesced = 0;
        loop {
            match self.interactive.try_recv() {
                Ok(Command::SyncInteractive { user: next, reply }) if next == user => {
                    let _ = reply.send(result.clone());
                    coalesced += 1;
                }
                Ok(other) => {
                    self.deferred_interactive = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        if coalesced > 0 {
            tracing::debug!(entity = %self.id, %user, coalesced, "Coalesced interactive syncs");
        }
    }

    /// Run the sync procedure under a global permit.
    ///
    /// A `Deleted` actor only syncs when `revive` is set.
    async fn sync(&mut self, choice: CredentialChoice, revive: bool) -> SyncResult {
        let previous = self.state();
        if previous == ActorState::Deleted && !revive {
            tracing::debug!(entity = %self.id, "Entity is deleted upstream, not syncing");
            return Err(SyncError::Gone(self.id));
        }

        let token = match self.context.resolve_token(self.id, &choice).await {
            Ok(token) => token,
            Err(e) => {
                self.report(&e, None);
                return Err(e);
            }
        };

        self.set_state(ActorState::Syncing);
        let result = match SyncPermit::acquire(&self.context.permits).await {
            Ok(permit) => holding_slot(permit, sync_entity(&self.context, self.id, &token)).await,
            Err(e) => Err(e),
        };

        let result = match result {
            Ok(outcome) => {
                self.set_state(ActorState::Idle);
                Ok(outcome)
            }
            Err(SyncError::Gone(id)) => match self.context.store.tombstone(&id).await {
                Ok(()) => {
                    tracing::info!(entity = %id, "Entity gone upstream, tombstoned");
                    self.set_state(ActorState::Deleted);
                    Err(SyncError::Gone(id))
                }
                Err(e) => {
                    self.set_state(previous);
                    Err(e.into())
                }
            },
            Err(e) => {
                self.set_state(previous);
                Err(e)
            }
        };

        if let Err(SyncError::Unauthorized { .. }) = &result {
            self.context.credentials.revoke(&token).await;
        }
        if let Err(e) = &result {
            if e.is_permanent() {
                self.report(e, Some(&token));
            } else {
                tracing::debug!(entity = %self.id, error = %e, "Transient sync failure");
            }
        }
        result
    }

    async fn apply_update(
        &mut self,
        message: UpdateMessage<EntityTarget>,
    ) -> Result<UpdateOutcome, SyncError> {
        let delivery = message.delivery_id().map(str::to_owned);
        if let Some(delivery) = &delivery
            && self.context.deliveries.contains(self.id, delivery)
        {
            tracing::debug!(entity = %self.id, delivery = %delivery, "Duplicate delivery, acknowledging");
            return Ok(UpdateOutcome::Duplicate);
        }

        if let Some(metadata) = &message.cache_metadata
            && let Some(snapshot) = metadata.rate_limit_snapshot()
        {
            self.context
                .client
                .budgets()
                .learn(&metadata.access_token, snapshot);
        }

        let UpdateMessage {
            cache_metadata,
            value,
            ..
        } = message;

        let outcome = if value.is_deletion() {
            self.context.store.tombstone(&self.id).await?;
            self.set_state(ActorState::Deleted);
            tracing::info!(entity = %self.id, "Entity deleted by webhook, tombstoned");
            UpdateOutcome::Tombstoned
        } else if let Some(document) = value.payload {
            self.context
                .store
                .persist(RemoteEntity {
                    id: self.id,
                    document,
                    fetched_at: Utc::now(),
                })
                .await?;
            self.set_state(ActorState::Idle);
            UpdateOutcome::Persisted
        } else {
            let choice = cache_metadata
                .map_or(CredentialChoice::Any, |m| CredentialChoice::Token(m.access_token));
            UpdateOutcome::Synced(self.sync(choice, true).await?)
        };

        if let Some(delivery) = &delivery {
            self.context.deliveries.mark(self.id, delivery);
        }
        Ok(outcome)
    }

    fn report(&self, error: &SyncError, token: Option<&AccessToken>) {
        self.context.diagnostics.record(Diagnostic {
            entity: self.id,
            credential: token.map(AccessToken::fingerprint),
            error: error.to_string(),
            at: Utc::now(),
        });
    }
}
