use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::Reservation;

/// Lookups that cut across events. Each map is its own source of truth for
/// one relation; the per-event states stay the source of truth for records.
pub(crate) struct Index {
    reservation_to_event: DashMap<Ulid, Ulid>,
    by_holder: DashMap<Ulid, Vec<Ulid>>,
    by_organizer: DashMap<Ulid, Vec<Ulid>>,
    /// Reservation code → reservation id. Claimed before the reservation is
    /// persisted, so this is also the global uniqueness constraint.
    codes: DashMap<String, Ulid>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            reservation_to_event: DashMap::new(),
            by_holder: DashMap::new(),
            by_organizer: DashMap::new(),
            codes: DashMap::new(),
        }
    }

    // ── Reservations ─────────────────────────────────────────

    /// Record a persisted reservation. Idempotent.
    pub fn map_reservation(&self, r: &Reservation) {
        self.reservation_to_event.insert(r.id, r.event_id);
        let mut held = self.by_holder.entry(r.holder_id).or_default();
        if !held.contains(&r.id) {
            held.push(r.id);
        }
        drop(held);
        self.codes.insert(r.code.clone(), r.id);
    }

    pub fn event_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_event.get(reservation_id).map(|e| *e.value())
    }

    pub fn reservations_of_holder(&self, holder_id: &Ulid) -> Vec<Ulid> {
        self.by_holder
            .get(holder_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Organizers ───────────────────────────────────────────

    pub fn add_organizer_event(&self, organizer_id: Ulid, event_id: Ulid) {
        self.by_organizer.entry(organizer_id).or_default().push(event_id);
    }

    pub fn remove_organizer_event(&self, organizer_id: Ulid, event_id: Ulid) {
        if let Some(mut events) = self.by_organizer.get_mut(&organizer_id) {
            events.retain(|e| *e != event_id);
        }
    }

    pub fn events_of_organizer(&self, organizer_id: &Ulid) -> Vec<Ulid> {
        self.by_organizer
            .get(organizer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Codes ────────────────────────────────────────────────

    /// Insert-if-absent. Returns false when another reservation owns the code.
    pub fn try_claim_code(&self, code: &str, reservation_id: Ulid) -> bool {
        match self.codes.entry(code.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(reservation_id);
                true
            }
        }
    }

    /// Give back a code whose reservation never made it to the WAL.
    pub fn release_code(&self, code: &str, reservation_id: Ulid) {
        self.codes.remove_if(code, |_, owner| *owner == reservation_id);
    }

    pub fn code_owner(&self, code: &str) -> Option<Ulid> {
        self.codes.get(code).map(|e| *e.value())
    }

    pub fn code_exists(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }
}
