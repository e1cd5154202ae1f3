//! Command dispatch: one handler per inbound event type.
//!
//! [`CollabCore`] replaces ambient per-process singletons: it is
//! constructed once, owns the store, session cache, presence tracker, and
//! rooms, and is passed by reference to every call site. Handlers take a
//! connection context plus a [`Command`] and return [`Effect`]s, so they
//! are testable without any transport. Broadcast effects are additionally
//! published to the document's room for the transport to fan out;
//! publication happens after persistence succeeded and outside the
//! per-document critical section.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::access::{self, Role};
use crate::broadcast::{RoomManager, RoomMessage};
use crate::commands::{Command, Effect, ErrorCode, ServerEvent};
use crate::config::CoreConfig;
use crate::presence::PresenceTracker;
use crate::session::SessionCache;
use crate::snapshot::SnapshotManager;
use crate::storage::{CollabStore, StoreError};
use crate::sync::{SyncCoordinator, SyncError};
use crate::timetravel::{HistoricalState, TimeTravel};

/// Per-connection state owned by the transport and threaded through
/// [`CollabCore::handle`].
#[derive(Debug, Clone)]
pub struct ConnectionCtx {
    /// Authenticated user (authentication itself is external)
    pub user_id: Uuid,
    /// Opaque connection id, unique per live connection
    pub connection_id: String,
    /// Document this connection has joined, if any
    pub joined: Option<Uuid>,
}

impl ConnectionCtx {
    pub fn new(user_id: Uuid, connection_id: impl Into<String>) -> Self {
        Self {
            user_id,
            connection_id: connection_id.into(),
            joined: None,
        }
    }
}

/// Core statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    pub commands_handled: u64,
    pub updates_accepted: u64,
    pub duplicates_rejected: u64,
    pub access_denied: u64,
    pub events_broadcast: u64,
}

/// Lock-free counters behind [`CoreStats`].
#[derive(Default)]
struct AtomicCoreStats {
    commands_handled: AtomicU64,
    updates_accepted: AtomicU64,
    duplicates_rejected: AtomicU64,
    access_denied: AtomicU64,
    events_broadcast: AtomicU64,
}

/// The engine's front door: owns all state, dispatches commands.
pub struct CollabCore {
    store: Arc<CollabStore>,
    sessions: Arc<SessionCache>,
    coordinator: SyncCoordinator,
    presence: PresenceTracker,
    rooms: RoomManager,
    time_travel: TimeTravel,
    stats: AtomicCoreStats,
}

impl CollabCore {
    /// Open the store and build the core. Constructed once per process.
    pub fn open(config: CoreConfig) -> Result<Self, StoreError> {
        let store = Arc::new(CollabStore::open(config.store.clone())?);
        let sessions = Arc::new(SessionCache::new(store.clone()));
        let snapshots = SnapshotManager::new(store.clone(), config.snapshot.clone());
        let coordinator = SyncCoordinator::new(store.clone(), sessions.clone(), snapshots);
        let time_travel = TimeTravel::new(store.clone());

        log::info!("Collab core opened at {}", store.path().display());

        Ok(Self {
            store,
            sessions,
            coordinator,
            presence: PresenceTracker::new(),
            rooms: RoomManager::new(config.broadcast_capacity),
            time_travel,
            stats: AtomicCoreStats::default(),
        })
    }

    /// Handle one inbound command for a connection.
    pub async fn handle(&self, ctx: &mut ConnectionCtx, command: Command) -> Vec<Effect> {
        self.stats.commands_handled.fetch_add(1, Ordering::Relaxed);

        let effects = match command {
            Command::Join { doc_id } => self.handle_join(ctx, doc_id).await,
            Command::Leave { doc_id } => self.handle_leave(ctx, doc_id).await,
            Command::Update { doc_id, payload } => self.handle_update(ctx, doc_id, &payload).await,
            Command::Cursor { doc_id, cursor } => {
                if ctx.joined != Some(doc_id) {
                    return not_joined(doc_id);
                }
                self.presence
                    .update_cursor(doc_id, ctx.user_id, cursor.from, cursor.to)
                    .await;
                vec![Effect::Broadcast(ServerEvent::CursorMoved {
                    doc_id,
                    user_id: ctx.user_id,
                    cursor,
                })]
            }
            Command::Awareness { doc_id, fields } => {
                if ctx.joined != Some(doc_id) {
                    return not_joined(doc_id);
                }
                self.presence
                    .update_awareness(doc_id, ctx.user_id, fields.clone())
                    .await;
                vec![Effect::Broadcast(ServerEvent::AwarenessChanged {
                    doc_id,
                    user_id: ctx.user_id,
                    fields,
                })]
            }
            Command::SyncRequest {
                doc_id,
                state_vector,
            } => self.handle_sync_request(ctx, doc_id, state_vector.as_deref()).await,
            Command::Disconnect => match ctx.joined {
                Some(doc_id) => self.handle_leave(ctx, doc_id).await,
                None => Vec::new(),
            },
        };

        self.publish(ctx, &effects).await;
        effects
    }

    async fn handle_join(&self, ctx: &mut ConnectionCtx, doc_id: Uuid) -> Vec<Effect> {
        let record = match self.store.load_document(doc_id) {
            Ok(record) => record,
            Err(e) => return store_error(e),
        };
        let Some(role) = access::resolve_role(&record, Some(ctx.user_id)) else {
            self.stats.access_denied.fetch_add(1, Ordering::Relaxed);
            return access_denied(Role::Viewer);
        };

        let state = match self.coordinator.state_as_update(doc_id, None).await {
            Ok(state) => state,
            Err(e) => return sync_error(e),
        };
        let state_vector = match self.coordinator.state_vector(doc_id).await {
            Ok(sv) => sv,
            Err(e) => return sync_error(e),
        };

        self.presence
            .add_user(doc_id, ctx.user_id, &ctx.connection_id)
            .await;
        ctx.joined = Some(doc_id);
        let presence = self.presence.get_presence(doc_id).await;

        log::info!(
            "User {} joined doc {doc_id} via {} ({} present)",
            ctx.user_id,
            ctx.connection_id,
            presence.len()
        );

        vec![
            Effect::Reply(ServerEvent::SyncState {
                doc_id,
                state,
                state_vector,
                presence,
                role,
            }),
            Effect::Broadcast(ServerEvent::UserJoined {
                doc_id,
                user_id: ctx.user_id,
            }),
        ]
    }

    async fn handle_leave(&self, ctx: &mut ConnectionCtx, doc_id: Uuid) -> Vec<Effect> {
        let fully_left = self
            .presence
            .remove_user(doc_id, ctx.user_id, &ctx.connection_id)
            .await;
        if ctx.joined == Some(doc_id) {
            ctx.joined = None;
        }

        if let Some(room) = self.rooms.get(doc_id).await {
            room.remove_connection(&ctx.connection_id).await;
        }

        // When the last user leaves, checkpoint and release the session so
        // a later access reloads from durable state.
        if self.presence.user_count(doc_id).await == 0 {
            self.rooms.remove_if_empty(doc_id).await;
            if self.sessions.is_loaded(doc_id).await {
                if let Err(e) = self.coordinator.create_snapshot(doc_id).await {
                    log::error!("Failed to snapshot doc {doc_id} on close: {e}");
                }
                self.sessions.unload(doc_id).await;
                log::info!("Doc {doc_id} closed (no users remain)");
            }
        }

        if fully_left {
            log::info!("User {} left doc {doc_id}", ctx.user_id);
            vec![Effect::Broadcast(ServerEvent::UserLeft {
                doc_id,
                user_id: ctx.user_id,
            })]
        } else {
            Vec::new()
        }
    }

    async fn handle_update(
        &self,
        ctx: &ConnectionCtx,
        doc_id: Uuid,
        payload: &[u8],
    ) -> Vec<Effect> {
        match self
            .coordinator
            .apply_update(doc_id, payload, ctx.user_id, &ctx.connection_id)
            .await
        {
            Ok(outcome) => {
                let mut effects = vec![Effect::Reply(ServerEvent::UpdateAck {
                    doc_id,
                    clock: outcome.clock,
                    sequence: outcome.sequence,
                    duplicate: outcome.duplicate,
                })];
                if outcome.duplicate {
                    // Nothing was written and nothing is broadcast.
                    self.stats.duplicates_rejected.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.updates_accepted.fetch_add(1, Ordering::Relaxed);
                    effects.push(Effect::Broadcast(ServerEvent::RemoteUpdate {
                        doc_id,
                        payload: payload.to_vec(),
                        clock: outcome.clock,
                        author: ctx.user_id,
                    }));
                }
                effects
            }
            Err(e) => {
                if matches!(e, SyncError::AccessDenied { .. }) {
                    self.stats.access_denied.fetch_add(1, Ordering::Relaxed);
                }
                sync_error(e)
            }
        }
    }

    async fn handle_sync_request(
        &self,
        ctx: &ConnectionCtx,
        doc_id: Uuid,
        state_vector: Option<&[u8]>,
    ) -> Vec<Effect> {
        let record = match self.store.load_document(doc_id) {
            Ok(record) => record,
            Err(e) => return store_error(e),
        };
        if !access::has_access(&record, Some(ctx.user_id), Role::Viewer) {
            self.stats.access_denied.fetch_add(1, Ordering::Relaxed);
            return access_denied(Role::Viewer);
        }

        match self.coordinator.state_as_update(doc_id, state_vector).await {
            Ok(state) => vec![Effect::Reply(ServerEvent::SyncDiff { doc_id, state })],
            Err(e) => sync_error(e),
        }
    }

    /// Fan broadcast effects out to the document's room.
    async fn publish(&self, ctx: &ConnectionCtx, effects: &[Effect]) {
        for effect in effects {
            let Effect::Broadcast(event) = effect else {
                continue;
            };
            let Some(doc_id) = event_doc_id(event) else {
                continue;
            };
            match event.encode() {
                Ok(bytes) => {
                    let room = self.rooms.get_or_create(doc_id).await;
                    room.publish(Arc::new(RoomMessage {
                        origin: ctx.connection_id.clone(),
                        bytes,
                    }));
                    self.stats.events_broadcast.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::error!("Failed to encode broadcast event: {e}"),
            }
        }
    }

    /// Subscribe a connection to a document's fan-out. Called by the
    /// transport after a successful join.
    pub async fn subscribe(
        &self,
        doc_id: Uuid,
        connection_id: &str,
    ) -> broadcast::Receiver<Arc<RoomMessage>> {
        let room = self.rooms.get_or_create(doc_id).await;
        room.add_connection(connection_id).await
    }

    /// Reconstruct historical state (viewer role required).
    pub async fn state_at_time(
        &self,
        doc_id: Uuid,
        user_id: Option<Uuid>,
        target_ms: u64,
    ) -> Result<HistoricalState, SyncError> {
        let record = self.store.load_document(doc_id)?;
        if !access::has_access(&record, user_id, Role::Viewer) {
            return Err(SyncError::AccessDenied {
                required: Role::Viewer,
            });
        }
        self.time_travel
            .state_at_time(doc_id, target_ms)
            .map_err(|e| match e {
                crate::timetravel::TimeTravelError::NotFound(id) => SyncError::NotFound(id),
                crate::timetravel::TimeTravelError::Store(e) => SyncError::Persistence(e),
                crate::timetravel::TimeTravelError::Merge(e) => SyncError::Merge(e),
            })
    }

    /// Checkpoint every loaded session and release it.
    pub async fn shutdown(&self) {
        let docs = self.sessions.loaded_docs().await;
        log::info!("Shutting down collab core ({} live sessions)", docs.len());
        for doc_id in docs {
            if let Err(e) = self.coordinator.create_snapshot(doc_id).await {
                log::error!("Failed to snapshot doc {doc_id} during shutdown: {e}");
            }
            self.sessions.unload(doc_id).await;
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CoreStats {
        CoreStats {
            commands_handled: self.stats.commands_handled.load(Ordering::Relaxed),
            updates_accepted: self.stats.updates_accepted.load(Ordering::Relaxed),
            duplicates_rejected: self.stats.duplicates_rejected.load(Ordering::Relaxed),
            access_denied: self.stats.access_denied.load(Ordering::Relaxed),
            events_broadcast: self.stats.events_broadcast.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<CollabStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }
}

/// Which document an event belongs to, for room routing.
fn event_doc_id(event: &ServerEvent) -> Option<Uuid> {
    match event {
        ServerEvent::SyncState { doc_id, .. }
        | ServerEvent::SyncDiff { doc_id, .. }
        | ServerEvent::UpdateAck { doc_id, .. }
        | ServerEvent::RemoteUpdate { doc_id, .. }
        | ServerEvent::UserJoined { doc_id, .. }
        | ServerEvent::UserLeft { doc_id, .. }
        | ServerEvent::CursorMoved { doc_id, .. }
        | ServerEvent::AwarenessChanged { doc_id, .. } => Some(*doc_id),
        ServerEvent::Error { .. } => None,
    }
}

fn access_denied(required: Role) -> Vec<Effect> {
    vec![Effect::Reply(ServerEvent::Error {
        code: ErrorCode::AccessDenied,
        message: format!("requires {required}"),
    })]
}

fn not_joined(doc_id: Uuid) -> Vec<Effect> {
    vec![Effect::Reply(ServerEvent::Error {
        code: ErrorCode::NotJoined,
        message: format!("not joined to document {doc_id}"),
    })]
}

fn store_error(e: StoreError) -> Vec<Effect> {
    let code = match e {
        StoreError::NotFound(_) => ErrorCode::NotFound,
        _ => ErrorCode::Persistence,
    };
    vec![Effect::Reply(ServerEvent::Error {
        code,
        message: e.to_string(),
    })]
}

fn sync_error(e: SyncError) -> Vec<Effect> {
    let code = match e {
        SyncError::NotFound(_) => ErrorCode::NotFound,
        SyncError::AccessDenied { .. } => ErrorCode::AccessDenied,
        SyncError::Merge(_) => ErrorCode::MergeRejected,
        SyncError::Persistence(_) => ErrorCode::Persistence,
    };
    vec![Effect::Reply(ServerEvent::Error {
        code,
        message: e.to_string(),
    })]
}
