mod allocation;
mod catalog;
mod error;
mod index;
mod ledger;
mod queries;
mod rules;

pub use catalog::SweepReport;
pub use error::EngineError;

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::auth::{Principal, PrincipalResolver};
use crate::clock::Clock;
use crate::limits::DEFAULT_LOCK_TIMEOUT_MS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use index::Index;

pub type SharedEventState = Arc<RwLock<EventState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        change: Change,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        changes: Vec<Change>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Change, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { change, response } => {
                let mut batch = vec![(change, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { change, response }) => batch.push((change, response)),
                        Ok(other) => {
                            // Flush what we have before compacting or counting.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} changes failed: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (change, _) in batch {
        if let Err(e) = wal.append_buffered(change) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so buffered bytes don't leak into the
    // next batch; every caller in this one is told it failed.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { changes, response } => {
            let result = Wal::write_compact_file(wal.path(), &changes).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { change, response } => {
            let mut batch = vec![(change, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Locking ──────────────────────────────────────────────

/// Exclusive access to one event, plus a shared hold on the compaction gate
/// so the WAL can't be rewritten between this mutation's append and apply.
pub(crate) struct EventWriteGuard {
    state: OwnedRwLockWriteGuard<EventState>,
    _compaction: OwnedRwLockReadGuard<()>,
}

impl Deref for EventWriteGuard {
    type Target = EventState;

    fn deref(&self) -> &EventState {
        &self.state
    }
}

impl DerefMut for EventWriteGuard {
    fn deref_mut(&mut self) -> &mut EventState {
        &mut self.state
    }
}

/// The handles a detached commit needs, cloned out of the engine so the
/// commit can outlive the request that started it.
#[derive(Clone)]
pub(super) struct Committer {
    wal_tx: mpsc::Sender<WalCommand>,
    pub(super) state: Arc<DashMap<Ulid, SharedEventState>>,
    pub(super) index: Arc<Index>,
    pub(super) notify: Arc<NotifyHub>,
}

impl Committer {
    /// Write a change to the WAL via the background group-commit writer.
    pub(super) async fn append(&self, change: &Change) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                change: change.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify. A reservation whose record never made it
    /// to the WAL gives its code back.
    pub(super) async fn persist_and_apply(&self, st: &mut EventState, change: &Change) -> Result<(), EngineError> {
        if let Err(e) = self.append(change).await {
            if let Change::ReservationCreated { reservation } = change {
                self.index.release_code(&reservation.code, reservation.id);
            }
            return Err(e);
        }
        apply_change(st, change, &self.index);
        self.notify.send(change);
        Ok(())
    }
}

pub struct Engine {
    pub(super) state: Arc<DashMap<Ulid, SharedEventState>>,
    pub(super) index: Arc<Index>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) principals: Arc<dyn PrincipalResolver>,
    clock: Arc<dyn Clock>,
    /// Mutators hold it shared (before any event lock); compaction holds it
    /// exclusively.
    compaction: Arc<RwLock<()>>,
    lock_timeout: Duration,
}

/// Apply a change to an event's state (no locking; caller holds the lock).
fn apply_change(st: &mut EventState, change: &Change, index: &Index) {
    match change {
        Change::EventUpdated { event } => {
            st.event = event.clone();
        }
        Change::EventStatusChanged { status, at, .. } => {
            st.event.status = *status;
            st.event.updated_at = Some(*at);
        }
        Change::ReservationCreated { reservation } => {
            index.map_reservation(reservation);
            st.insert_reservation(reservation.clone());
        }
        Change::ReservationStatusChanged { id, status, at, .. } => {
            st.set_reservation_status(*id, *status, *at);
        }
        // Created/Deleted are handled at the DashMap level, not here
        Change::EventCreated { .. } | Change::EventDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        principals: Arc<dyn PrincipalResolver>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let changes = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: Arc::new(DashMap::new()),
            index: Arc::new(Index::new()),
            wal_tx,
            notify,
            principals,
            clock,
            compaction: Arc::new(RwLock::new(())),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        };

        // Nobody else holds these Arcs yet, so try_write never contends. Don't
        // use blocking_write: this runs inside the runtime.
        for change in &changes {
            match change {
                Change::EventCreated { event } => {
                    engine.index.add_organizer_event(event.organizer_id, event.id);
                    engine
                        .state
                        .insert(event.id, Arc::new(RwLock::new(EventState::new(event.clone()))));
                }
                Change::EventDeleted { id } => {
                    if let Some((_, shared)) = engine.state.remove(id)
                        && let Ok(st) = shared.try_read()
                    {
                        engine.index.remove_organizer_event(st.event.organizer_id, *id);
                    }
                }
                other => {
                    let Some(shared) = engine.get_event_state(&other.event_id()) else {
                        tracing::warn!("replay: change for unknown event {}", other.event_id());
                        continue;
                    };
                    if let Ok(mut st) = shared.try_write() {
                        apply_change(&mut st, other, &engine.index);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::EVENTS_ACTIVE).set(engine.state.len() as f64);
        if !changes.is_empty() {
            tracing::info!(
                "replayed {} changes from {}: {} events",
                changes.len(),
                wal_path.display(),
                engine.state.len()
            );
        }
        Ok(engine)
    }

    /// Bound on every lock wait; exceeding it fails with `Busy`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn event_count(&self) -> usize {
        self.state.len()
    }

    pub(super) fn get_event_state(&self, id: &Ulid) -> Option<SharedEventState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Every event handle, ordered by id.
    pub(super) fn event_handles(&self) -> Vec<(Ulid, SharedEventState)> {
        let mut handles: Vec<(Ulid, SharedEventState)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    pub(super) fn committer(&self) -> Committer {
        Committer {
            wal_tx: self.wal_tx.clone(),
            state: self.state.clone(),
            index: self.index.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Run `commit` on its own task and wait for it. Dropping the caller
    /// doesn't cancel the commit: once a record is handed to the WAL writer
    /// it is applied to memory as well.
    pub(super) async fn run_detached<T, F, Fut>(&self, commit: F) -> Result<T, EngineError>
    where
        F: FnOnce(Committer) -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(commit(self.committer()))
            .await
            .map_err(|e| EngineError::Internal(format!("commit task failed: {e}")))?
    }

    /// Persist and apply a change under the event's write guard. The guard
    /// travels with the commit and comes back once memory is updated.
    pub(super) async fn persist_and_apply(
        &self,
        guard: EventWriteGuard,
        change: Change,
    ) -> Result<EventWriteGuard, EngineError> {
        self.run_detached(move |committer| async move {
            let mut guard = guard;
            committer.persist_and_apply(&mut guard, &change).await?;
            Ok::<_, EngineError>(guard)
        })
        .await
    }

    /// Shared hold on the compaction gate, for mutations that don't go
    /// through an existing event lock (event creation).
    pub(super) async fn enter_compaction_gate(&self) -> Result<OwnedRwLockReadGuard<()>, EngineError> {
        tokio::time::timeout(self.lock_timeout, self.compaction.clone().read_owned())
            .await
            .map_err(|_| self.lock_timed_out("WAL compaction".into()))
    }

    /// Acquire an event for mutation within the lock timeout.
    pub(super) async fn lock_event_write(&self, id: Ulid) -> Result<EventWriteGuard, EngineError> {
        let shared = self.get_event_state(&id).ok_or_else(|| EngineError::event_not_found(id))?;
        let gate = self.compaction.clone();
        let acquire = async move {
            let compaction = gate.read_owned().await;
            let state = shared.write_owned().await;
            EventWriteGuard {
                state,
                _compaction: compaction,
            }
        };
        let guard = tokio::time::timeout(self.lock_timeout, acquire)
            .await
            .map_err(|_| self.lock_timed_out(format!("event {id}")))?;
        // Deleted while we were queued on the lock.
        if guard.is_removed() {
            return Err(EngineError::event_not_found(id));
        }
        Ok(guard)
    }

    pub(super) async fn lock_event_read(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<EventState>, EngineError> {
        let shared = self.get_event_state(&id).ok_or_else(|| EngineError::event_not_found(id))?;
        let guard = tokio::time::timeout(self.lock_timeout, shared.read_owned())
            .await
            .map_err(|_| self.lock_timed_out(format!("event {id}")))?;
        if guard.is_removed() {
            return Err(EngineError::event_not_found(id));
        }
        Ok(guard)
    }

    /// Lookup reservation → event, then acquire the event's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
    ) -> Result<EventWriteGuard, EngineError> {
        let event_id = self
            .index
            .event_for_reservation(&reservation_id)
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))?;
        self.lock_event_write(event_id).await
    }

    /// Read every live event, keeping what `f` maps to `Some`. Locks are
    /// taken one event at a time.
    pub(super) async fn scan_events<T>(
        &self,
        mut f: impl FnMut(&EventState) -> Option<T>,
    ) -> Result<Vec<T>, EngineError> {
        let mut out = Vec::new();
        for (id, shared) in self.event_handles() {
            let st = tokio::time::timeout(self.lock_timeout, shared.read_owned())
                .await
                .map_err(|_| self.lock_timed_out(format!("event {id}")))?;
            if st.is_removed() {
                continue;
            }
            if let Some(item) = f(&st) {
                out.push(item);
            }
        }
        Ok(out)
    }

    fn lock_timed_out(&self, what: String) -> EngineError {
        tracing::warn!("gave up waiting for {what} after {:?}", self.lock_timeout);
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::Busy(what)
    }

    /// Resolve the acting user. Unknown ids are `NotFound`, deactivated
    /// accounts `Forbidden`.
    pub(super) fn principal(&self, actor_id: Ulid) -> Result<Principal, EngineError> {
        let principal = self
            .principals
            .resolve(actor_id)
            .ok_or_else(|| EngineError::user_not_found(actor_id))?;
        if !principal.active {
            return Err(EngineError::Forbidden("account is deactivated"));
        }
        Ok(principal)
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the changes needed to recreate the current
    /// state: one `EventCreated` per live event, followed by its reservations.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = tokio::time::timeout(self.lock_timeout, self.compaction.write())
            .await
            .map_err(|_| self.lock_timed_out("WAL compaction".into()))?;

        // With the gate held exclusively no mutation is in flight, so these
        // reads only wait on other readers.
        let mut changes = Vec::new();
        for (_, shared) in self.event_handles() {
            let st = shared.read().await;
            if st.is_removed() {
                continue;
            }
            changes.push(Change::EventCreated { event: st.event.clone() });
            changes.extend(
                st.reservations
                    .iter()
                    .map(|r| Change::ReservationCreated { reservation: r.clone() }),
            );
        }
        let written = changes.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { changes, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(written)
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
