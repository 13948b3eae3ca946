use ulid::Ulid;

use crate::model::*;

use super::rules::add_revenue;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_event(&self, id: Ulid) -> Result<Event, EngineError> {
        let st = self.lock_event_read(id).await?;
        Ok(st.event.clone())
    }

    /// Every event, in id order.
    pub async fn list_events(&self) -> Result<Vec<Event>, EngineError> {
        self.scan_events(|st| Some(st.event.clone())).await
    }

    pub async fn events_by_category(&self, category: EventCategory) -> Result<Vec<Event>, EngineError> {
        self.scan_events(|st| (st.event.category == category).then(|| st.event.clone()))
            .await
    }

    pub async fn events_by_status(&self, status: EventStatus) -> Result<Vec<Event>, EngineError> {
        self.scan_events(|st| (st.event.status == status).then(|| st.event.clone()))
            .await
    }

    pub async fn events_by_organizer(&self, organizer_id: Ulid) -> Result<Vec<Event>, EngineError> {
        let mut ids = self.index.events_of_organizer(&organizer_id);
        ids.sort();
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_event(id).await {
                Ok(e) => events.push(e),
                Err(EngineError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(events)
    }

    /// Published events, soonest first.
    pub async fn available_events(&self) -> Result<Vec<Event>, EngineError> {
        let mut events = self.events_by_status(EventStatus::Published).await?;
        events.sort_by_key(|e| (e.start, e.id));
        Ok(events)
    }

    /// Published events ranked by how many reservations they have drawn.
    pub async fn popular_events(&self, limit: usize) -> Result<Vec<(Event, usize)>, EngineError> {
        let mut ranked = self
            .scan_events(|st| {
                (st.event.status == EventStatus::Published)
                    .then(|| (st.event.clone(), st.reservations.len()))
            })
            .await?;
        ranked.sort_by(|(a, na), (b, nb)| nb.cmp(na).then(a.start.cmp(&b.start)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    pub async fn search_events(&self, search: &EventSearch) -> Result<Vec<Event>, EngineError> {
        let city = search.city.as_deref().map(|c| c.trim().to_lowercase());
        let mut events = self
            .scan_events(|st| {
                let e = &st.event;
                let keep = e.status == EventStatus::Published
                    && search.category.is_none_or(|c| e.category == c)
                    && search.starts_after.is_none_or(|t| e.start > t)
                    && search.starts_before.is_none_or(|t| e.start < t)
                    && city.as_deref().is_none_or(|c| e.city.to_lowercase() == c)
                    && search.min_price.is_none_or(|p| e.unit_price >= p)
                    && search.max_price.is_none_or(|p| e.unit_price <= p);
                keep.then(|| e.clone())
            })
            .await?;
        events.sort_by_key(|e| (e.start, e.id));
        Ok(events)
    }

    /// Case-insensitive substring match on title, venue and city. A blank
    /// keyword matches everything.
    pub async fn search_by_keyword(&self, keyword: &str) -> Result<Vec<Event>, EngineError> {
        let needle = keyword.trim().to_lowercase();
        self.scan_events(|st| {
            let e = &st.event;
            let hit = needle.is_empty()
                || e.title.to_lowercase().contains(&needle)
                || e.venue.to_lowercase().contains(&needle)
                || e.city.to_lowercase().contains(&needle);
            hit.then(|| e.clone())
        })
        .await
    }

    pub async fn reservation_stats(&self) -> Result<ReservationStats, EngineError> {
        let mut stats = ReservationStats::default();
        let per_event = self.scan_events(|st| Some(st.reservations.clone())).await?;
        for r in per_event.iter().flatten() {
            stats.total += 1;
            match r.status {
                ReservationStatus::Pending => stats.pending += 1,
                ReservationStatus::Confirmed => {
                    stats.confirmed += 1;
                    stats.confirmed_revenue = add_revenue(stats.confirmed_revenue, r.total)?;
                    stats.confirmed_seats += u64::from(r.seats);
                }
                ReservationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    pub async fn organizer_stats(&self, organizer_id: Ulid) -> Result<OrganizerStats, EngineError> {
        let mut stats = OrganizerStats::default();
        for id in self.index.events_of_organizer(&organizer_id) {
            let st = match self.lock_event_read(id).await {
                Ok(st) => st,
                Err(EngineError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            stats.events += 1;
            match st.event.status {
                EventStatus::Draft => stats.draft += 1,
                EventStatus::Published => stats.published += 1,
                EventStatus::Cancelled => stats.cancelled += 1,
                EventStatus::Completed => stats.completed += 1,
            }
            stats.reservations += st.reservations.len();
            stats.confirmed_revenue = st
                .reservations
                .iter()
                .filter(|r| r.status == ReservationStatus::Confirmed)
                .try_fold(stats.confirmed_revenue, |sum, r| add_revenue(sum, r.total))?;
        }
        Ok(stats)
    }

    /// Everything a confirmation page shows about one reservation.
    pub async fn reservation_summary(&self, reservation_id: Ulid) -> Result<ReservationSummary, EngineError> {
        let event_id = self
            .index
            .event_for_reservation(&reservation_id)
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))?;
        let st = self.lock_event_read(event_id).await?;
        let r = st
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::reservation_not_found(reservation_id))?;

        let holder = self.principals.describe(r.holder_id).map(|u| HolderInfo {
            id: u.id,
            display_name: u.display_name,
            email: u.email,
        });
        Ok(ReservationSummary {
            code: r.code.clone(),
            created_at: r.created_at,
            seats: r.seats,
            total: r.total,
            status: r.status,
            comment: r.comment.clone(),
            holder,
            event_title: st.event.title.clone(),
            event_start: st.event.start,
            venue: st.event.venue.clone(),
            city: st.event.city.clone(),
            unit_price: st.event.unit_price,
        })
    }
}
