use std::collections::BTreeMap;

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::rules::add_revenue;
use super::{Engine, EngineError};

impl Engine {
    /// Seats held against the event's capacity. Unknown events hold none.
    pub async fn committed_seats(&self, event_id: Ulid) -> Result<u32, EngineError> {
        match self.lock_event_read(event_id).await {
            Ok(st) => Ok(st.committed_seats()),
            Err(EngineError::NotFound { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn code_exists(&self, code: &str) -> bool {
        self.index.code_exists(code)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Reservation, EngineError> {
        let id = self
            .index
            .code_owner(code)
            .ok_or_else(|| EngineError::reservation_not_found(code))?;
        // A code claimed by an allocation still in flight has no record yet.
        match self.find_reservation(id).await {
            Err(EngineError::NotFound { .. }) => Err(EngineError::reservation_not_found(code)),
            other => other,
        }
    }

    pub async fn find_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let event_id = self
            .index
            .event_for_reservation(&id)
            .ok_or_else(|| EngineError::reservation_not_found(id))?;
        let st = self.lock_event_read(event_id).await?;
        st.reservation(id)
            .cloned()
            .ok_or_else(|| EngineError::reservation_not_found(id))
    }

    /// All reservations of a holder, oldest first.
    pub async fn find_by_user(&self, user_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let mut found: Vec<Reservation> = self
            .holder_reservations(user_id)
            .await?
            .into_iter()
            .map(|(r, _)| r)
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }

    /// Reservations made against an event, in creation order. Empty for
    /// unknown events.
    pub async fn find_by_event(&self, event_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        match self.lock_event_read(event_id).await {
            Ok(st) => Ok(st.reservations.clone()),
            Err(EngineError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_user_and_status(
        &self,
        user_id: Ulid,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut found = self.find_by_user(user_id).await?;
        found.retain(|r| r.status == status);
        Ok(found)
    }

    /// What a holder has paid across their confirmed reservations.
    pub async fn total_spent_by_user(&self, user_id: Ulid) -> Result<Decimal, EngineError> {
        self.holder_reservations(user_id)
            .await?
            .iter()
            .filter(|(r, _)| r.status == ReservationStatus::Confirmed)
            .try_fold(Decimal::ZERO, |sum, (r, _)| add_revenue(sum, r.total))
    }

    /// Every reservation in the ledger, oldest first.
    pub async fn all_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        let mut all: Vec<Reservation> = self
            .scan_events(|st| Some(st.reservations.clone()))
            .await?
            .into_iter()
            .flatten()
            .collect();
        all.sort_by_key(|r| (r.created_at, r.id));
        Ok(all)
    }

    /// Confirmed reservations of a holder for events starting after `now`,
    /// soonest event first.
    pub async fn upcoming_for_user(&self, user_id: Ulid, now: Ms) -> Result<Vec<Reservation>, EngineError> {
        let mut upcoming: Vec<(Reservation, Ms)> = self
            .holder_reservations(user_id)
            .await?
            .into_iter()
            .filter(|(r, start)| r.status == ReservationStatus::Confirmed && *start > now)
            .collect();
        upcoming.sort_by_key(|(r, start)| (*start, r.created_at));
        Ok(upcoming.into_iter().map(|(r, _)| r).collect())
    }

    /// A holder's reservations paired with their event's start, reading
    /// each event once.
    async fn holder_reservations(&self, user_id: Ulid) -> Result<Vec<(Reservation, Ms)>, EngineError> {
        let mut by_event: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        for id in self.index.reservations_of_holder(&user_id) {
            if let Some(event_id) = self.index.event_for_reservation(&id) {
                by_event.entry(event_id).or_default().push(id);
            }
        }

        let mut out = Vec::new();
        for (event_id, ids) in by_event {
            let st = match self.lock_event_read(event_id).await {
                Ok(st) => st,
                Err(EngineError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            out.extend(
                ids.iter()
                    .filter_map(|id| st.reservation(*id))
                    .map(|r| (r.clone(), st.event.start)),
            );
        }
        Ok(out)
    }
}
