use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{EVENT_TRANSITIONS_TOTAL, EVENTS_ACTIVE, SWEEP_FAILURES_TOTAL};

use super::rules::{ensure_can_manage, validate_event_fields, validate_schedule};
use super::{Engine, EngineError, EventWriteGuard};

/// Outcome of one completion sweep. A failure on one event never stops the
/// others from being processed.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: Vec<Ulid>,
    pub failed: Vec<(Ulid, EngineError)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

fn due_for_completion(event: &Event, now: Ms) -> bool {
    event.status == EventStatus::Published && event.end < now
}

impl Engine {
    pub async fn create_event(&self, new: NewEvent, organizer_id: Ulid) -> Result<Event, EngineError> {
        let organizer = self.principal(organizer_id)?;
        if !organizer.role.can_create_events() {
            return Err(EngineError::Forbidden("role cannot create events"));
        }

        let now = self.now();
        let event = Event {
            id: Ulid::new(),
            title: new.title,
            description: new.description,
            category: new.category,
            start: new.start,
            end: new.end,
            venue: new.venue,
            city: new.city,
            capacity: new.capacity,
            unit_price: new.unit_price,
            image_url: new.image_url,
            status: EventStatus::Draft,
            organizer_id,
            created_at: now,
            updated_at: None,
        };
        validate_event_fields(&event)?;
        validate_schedule(event.start, event.end, now)?;

        let gate = self.enter_compaction_gate().await?;
        let created = event.clone();
        self.run_detached(move |c| async move {
            let _gate = gate;
            let change = Change::EventCreated { event: created.clone() };
            c.append(&change).await?;
            c.index.add_organizer_event(created.organizer_id, created.id);
            c.state
                .insert(created.id, Arc::new(RwLock::new(EventState::new(created))));
            metrics::gauge!(EVENTS_ACTIVE).set(c.state.len() as f64);
            c.notify.send(&change);
            Ok::<_, EngineError>(())
        })
        .await?;

        info!("event {} created by {organizer_id}", event.id);
        Ok(event)
    }

    pub async fn publish_event(&self, id: Ulid, actor_id: Ulid) -> Result<Event, EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.lock_event_write(id).await?;
        ensure_can_manage(&guard.event, &actor)?;

        if guard.event.status != EventStatus::Draft {
            return Err(EngineError::InvalidState(format!(
                "only draft events can be published, event is {}",
                guard.event.status.label()
            )));
        }
        let missing = guard.event.missing_required_fields();
        if !missing.is_empty() {
            return Err(EngineError::InvalidState(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        self.transition_event(guard, EventStatus::Published).await
    }

    /// Cancelling is always permitted before completion. Existing
    /// reservations are left as they are; subscribers of the event's
    /// notify channel see the status change.
    pub async fn cancel_event(&self, id: Ulid, actor_id: Ulid) -> Result<Event, EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.lock_event_write(id).await?;
        ensure_can_manage(&guard.event, &actor)?;

        match guard.event.status {
            EventStatus::Cancelled => return Ok(guard.event.clone()),
            EventStatus::Completed => {
                return Err(EngineError::InvalidState("event is already completed".into()));
            }
            EventStatus::Draft | EventStatus::Published => {}
        }

        self.transition_event(guard, EventStatus::Cancelled).await
    }

    pub async fn update_event(
        &self,
        id: Ulid,
        patch: EventPatch,
        actor_id: Ulid,
    ) -> Result<Event, EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.lock_event_write(id).await?;
        ensure_can_manage(&guard.event, &actor)?;

        if guard.event.status == EventStatus::Completed {
            return Err(EngineError::InvalidState("completed events cannot be edited".into()));
        }

        let now = self.now();
        let reschedules = patch.start.is_some() || patch.end.is_some();
        let mut updated = guard.event.clone();
        patch.apply_to(&mut updated);
        updated.updated_at = Some(now);

        validate_event_fields(&updated)?;
        if reschedules {
            validate_schedule(updated.start, updated.end, now)?;
        }
        let committed = guard.committed_seats();
        if updated.capacity < committed {
            return Err(EngineError::Conflict(format!(
                "capacity {} is below the {committed} seats already reserved",
                updated.capacity
            )));
        }

        let change = Change::EventUpdated { event: updated };
        let guard = self.persist_and_apply(guard, change).await?;
        debug!("event {id} updated by {actor_id}");
        Ok(guard.event.clone())
    }

    pub async fn delete_event(&self, id: Ulid, actor_id: Ulid) -> Result<(), EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.lock_event_write(id).await?;
        ensure_can_manage(&guard.event, &actor)?;

        if !guard.reservations.is_empty() {
            return Err(EngineError::Conflict(format!(
                "event {id} has {} reservations",
                guard.reservations.len()
            )));
        }

        self.run_detached(move |c| async move {
            let mut guard = guard;
            let change = Change::EventDeleted { id };
            c.append(&change).await?;
            guard.mark_removed();
            c.state.remove(&id);
            c.index.remove_organizer_event(guard.event.organizer_id, id);
            metrics::gauge!(EVENTS_ACTIVE).set(c.state.len() as f64);
            c.notify.send(&change);
            c.notify.remove(&id);
            Ok::<_, EngineError>(())
        })
        .await?;

        info!("event {id} deleted by {actor_id}");
        Ok(())
    }

    /// Move every published event whose end has passed to Completed.
    /// Running it again on the same state changes nothing.
    pub async fn sweep_completed(&self, now: Ms) -> SweepReport {
        let mut report = SweepReport::default();
        for (id, shared) in self.event_handles() {
            // Cheap pre-filter; contended events are checked under the lock.
            if let Ok(st) = shared.try_read()
                && !due_for_completion(&st.event, now)
            {
                continue;
            }
            match self.complete_if_ended(id, now).await {
                Ok(true) => report.completed.push(id),
                Ok(false) => {}
                // Deleted since we listed it.
                Err(EngineError::NotFound { .. }) => {}
                Err(e) => {
                    warn!("sweep: could not complete event {id}: {e}");
                    metrics::counter!(SWEEP_FAILURES_TOTAL).increment(1);
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    async fn complete_if_ended(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let guard = self.lock_event_write(id).await?;
        if !due_for_completion(&guard.event, now) {
            return Ok(false);
        }
        let change = Change::EventStatusChanged {
            id,
            status: EventStatus::Completed,
            at: now,
        };
        self.persist_and_apply(guard, change).await?;
        metrics::counter!(EVENT_TRANSITIONS_TOTAL, "status" => EventStatus::Completed.label())
            .increment(1);
        info!("event {id} completed");
        Ok(true)
    }

    async fn transition_event(&self, guard: EventWriteGuard, status: EventStatus) -> Result<Event, EngineError> {
        let id = guard.event.id;
        let change = Change::EventStatusChanged {
            id,
            status,
            at: self.now(),
        };
        let guard = self.persist_and_apply(guard, change).await?;
        metrics::counter!(EVENT_TRANSITIONS_TOTAL, "status" => status.label()).increment(1);
        info!("event {id} is now {}", status.label());
        Ok(guard.event.clone())
    }
}
