mod conflict;
mod directory;
mod error;
mod lifecycle;
pub mod policy;
mod queries;
mod store;

pub use conflict::{has_conflict, now_ms};
pub use error::EngineError;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::error;
use ulid::Ulid;

use crate::credentials::CredentialService;
use crate::model::*;
use crate::wal::Wal;

use store::event_resource_id;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so stale bytes never join the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// The booking platform core: interval store, lifecycle rules and directory.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) credentials: Arc<dyn CredentialService>,
    /// Offset applied to timestamps sent without one.
    pub(super) local_offset: FixedOffset,
    /// Directory writes take this exclusively; booking creation shares it,
    /// so a requester or resource cannot vanish between check and insert.
    pub(super) directory_gate: RwLock<()>,
}

fn replay_error(what: &str) -> io::Error {
    io::Error::other(format!("WAL replay: {what}"))
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        credentials: Arc<dyn CredentialService>,
        local_offset: FixedOffset,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            credentials,
            local_offset,
            directory_gate: RwLock::new(()),
        };
        for event in &events {
            engine.replay_event(event)?;
        }
        Ok(engine)
    }

    /// Nothing else holds the locks during replay, so `try_write` cannot fail
    /// unless the state is corrupt.
    fn replay_event(&self, event: &Event) -> io::Result<()> {
        match event {
            Event::AccountDeleted { id } => {
                let mut guards = Vec::new();
                for (_, rs) in self.store.resources_sorted() {
                    guards.push(rs.try_write_owned().map_err(|_| replay_error("resource locked"))?);
                }
                self.store.apply_account_deleted(*id, &mut guards);
            }
            other => match event_resource_id(other) {
                Some(resource_id) => {
                    if let Some(rs) = self.store.get_resource(&resource_id) {
                        let mut guard =
                            rs.try_write().map_err(|_| replay_error("resource locked"))?;
                        self.store.apply_to_resource(&mut guard, other);
                    }
                }
                None => self.store.apply_directory(other),
            },
        }
        Ok(())
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageError(e.to_string()))
    }

    /// WAL append, then apply under the caller's resource guard.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_resource(rs, event);
        Ok(())
    }

    /// WAL append, then apply a directory event. Caller holds the gate.
    pub(super) async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_directory(event);
        Ok(())
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.store.get_resource(id)
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn local_offset(&self) -> FixedOffset {
        self.local_offset
    }

    /// Locate a booking and take its resource's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .store
            .resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = rs.write_owned().await;
        // Deleted between lookup and lock.
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok(guard)
    }

    /// Rewrite the WAL as the minimal event sequence that rebuilds the
    /// current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Every guard is held until the snapshot is installed: a mutation
        // appended after we read a resource would otherwise be lost in the swap.
        let _gate = self.directory_gate.write().await;
        let mut guards = Vec::new();
        for (_, rs) in self.store.resources_sorted() {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        let mut users = self.store.users();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserRegistered { user }));

        let mut categories = self.store.categories();
        categories.sort_by_key(|c| c.id);
        events.extend(categories.into_iter().map(|category| Event::CategoryCreated { category }));

        for guard in &guards {
            events.push(Event::ResourceCreated {
                resource: guard.info.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingRecorded { booking: b.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
