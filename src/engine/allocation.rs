use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    CODE_COLLISIONS_TOTAL, RESERVATION_TRANSITIONS_TOTAL, RESERVATIONS_CREATED_TOTAL,
    RESERVATIONS_REJECTED_TOTAL,
};

use super::rules::{check_bookable, check_cancellation_window, format_code, validate_request};
use super::{Engine, EngineError, EventWriteGuard};

impl Engine {
    /// Take `request.seats` seats of an event for `user_id`.
    ///
    /// The capacity check and the append happen under the event's write
    /// lock, so two requests against the same event are decided one after
    /// the other. Requests against different events don't contend.
    pub async fn create_reservation(
        &self,
        request: ReservationRequest,
        user_id: Ulid,
        event_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let result = self.allocate(request, user_id, event_id).await;
        if let Err(e) = &result {
            metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => e.label()).increment(1);
            debug!("reservation for event {event_id} by {user_id} refused: {e}");
        }
        result
    }

    async fn allocate(
        &self,
        request: ReservationRequest,
        user_id: Ulid,
        event_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let holder = self.principal(user_id)?;
        let guard = self.lock_event_write(event_id).await?;
        let now = self.now();

        check_bookable(&guard.event, now)?;
        validate_request(&request)?;

        let available = guard.available_seats();
        if request.seats > available {
            return Err(EngineError::Conflict(format!(
                "insufficient seats: available {available}, requested {}",
                request.seats
            )));
        }

        let total = guard
            .event
            .unit_price
            .checked_mul(Decimal::from(request.seats))
            .ok_or_else(|| EngineError::InvalidInput("reservation total out of range".into()))?;
        let id = Ulid::new();
        let code = self.claim_code(id)?;
        let reservation = Reservation {
            id,
            code,
            event_id,
            holder_id: holder.id,
            seats: request.seats,
            total,
            status: ReservationStatus::Pending,
            comment: request.comment.filter(|c| !c.trim().is_empty()),
            created_at: now,
            updated_at: None,
        };

        // The code is claimed; from here the commit runs detached and gives
        // the code back itself if the WAL write fails.
        let change = Change::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(guard, change).await?;

        metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} ({} seats) on event {event_id} for {user_id}",
            reservation.code, reservation.seats
        );
        Ok(reservation)
    }

    pub async fn confirm_reservation(
        &self,
        reservation_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.resolve_reservation_write(reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))?;

        if current.holder_id != actor.id {
            return Err(EngineError::Forbidden("only the holder can confirm a reservation"));
        }
        match current.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Confirmed => {
                return Err(EngineError::BusinessRule("reservation is already confirmed".into()));
            }
            ReservationStatus::Cancelled => {
                return Err(EngineError::BusinessRule("reservation is cancelled".into()));
            }
        }

        self.transition_reservation(guard, reservation_id, ReservationStatus::Confirmed)
            .await
    }

    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let actor = self.principal(actor_id)?;
        let guard = self.resolve_reservation_write(reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))?;

        if current.holder_id != actor.id {
            return Err(EngineError::Forbidden("only the holder can cancel a reservation"));
        }
        if current.status.is_terminal() {
            return Err(EngineError::BusinessRule("reservation is already cancelled".into()));
        }
        check_cancellation_window(guard.event.start, self.now())?;

        self.transition_reservation(guard, reservation_id, ReservationStatus::Cancelled)
            .await
    }

    pub async fn available_seats(&self, event_id: Ulid) -> Result<u32, EngineError> {
        let st = self.lock_event_read(event_id).await?;
        Ok(st.available_seats())
    }

    async fn transition_reservation(
        &self,
        guard: EventWriteGuard,
        reservation_id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let change = Change::ReservationStatusChanged {
            id: reservation_id,
            event_id: guard.event.id,
            status,
            at: self.now(),
        };
        let st = self.persist_and_apply(guard, change).await?;
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "status" => status.label()).increment(1);
        info!("reservation {reservation_id} is now {}", status.label());
        st.reservation(reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))
    }

    /// Draw codes until one is free and claim it for `reservation_id`.
    pub(super) fn claim_code(&self, reservation_id: Ulid) -> Result<String, EngineError> {
        let mut rng = rand::thread_rng();
        self.claim_code_with(reservation_id, || rng.gen_range(CODE_MIN..=CODE_MAX))
    }

    pub(super) fn claim_code_with(
        &self,
        reservation_id: Ulid,
        mut draw: impl FnMut() -> u32,
    ) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = format_code(draw());
            if self.index.try_claim_code(&code, reservation_id) {
                return Ok(code);
            }
            metrics::counter!(CODE_COLLISIONS_TOTAL).increment(1);
        }
        Err(EngineError::Internal(format!(
            "no free reservation code after {MAX_CODE_ATTEMPTS} draws"
        )))
    }
}
