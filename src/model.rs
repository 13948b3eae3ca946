use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Concert,
    Theatre,
    Conference,
    Sport,
    Other,
}

/// Draft → Published → Cancelled | Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

impl EventStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Completed => "completed",
        }
    }
}

/// Pending → Confirmed, Pending | Confirmed → Cancelled. Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    /// Whether a reservation in this status counts against event capacity.
    pub fn holds_capacity(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Organizer,
    Client,
}

impl Role {
    pub fn can_create_events(&self) -> bool {
        matches!(self, Role::Admin | Role::Organizer)
    }
}

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub category: EventCategory,
    pub start: Ms,
    pub end: Ms,
    pub venue: String,
    pub city: String,
    pub capacity: u32,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
    pub status: EventStatus,
    pub organizer_id: Ulid,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

impl Event {
    /// Names of the fields that must be filled in before publishing.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.venue.trim().is_empty() {
            missing.push("venue");
        }
        if self.city.trim().is_empty() {
            missing.push("city");
        }
        if self.capacity == 0 {
            missing.push("capacity");
        }
        missing
    }

    pub fn is_owned_by(&self, user_id: Ulid) -> bool {
        self.organizer_id == user_id
    }
}

/// Caller-supplied fields for a new event. Identity, status and timestamps
/// are assigned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub category: EventCategory,
    pub start: Ms,
    pub end: Ms,
    pub venue: String,
    pub city: String,
    pub capacity: u32,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
}

/// Partial update; `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<EventCategory>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub venue: Option<String>,
    pub city: Option<String>,
    pub capacity: Option<u32>,
    pub unit_price: Option<Decimal>,
    pub image_url: Option<Option<String>>,
}

impl EventPatch {
    pub fn apply_to(self, event: &mut Event) {
        if let Some(v) = self.title {
            event.title = v;
        }
        if let Some(v) = self.description {
            event.description = v;
        }
        if let Some(v) = self.category {
            event.category = v;
        }
        if let Some(v) = self.start {
            event.start = v;
        }
        if let Some(v) = self.end {
            event.end = v;
        }
        if let Some(v) = self.venue {
            event.venue = v;
        }
        if let Some(v) = self.city {
            event.city = v;
        }
        if let Some(v) = self.capacity {
            event.capacity = v;
        }
        if let Some(v) = self.unit_price {
            event.unit_price = v;
        }
        if let Some(v) = self.image_url {
            event.image_url = v;
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Human-readable, globally unique: `EVT-NNNNN`.
    pub code: String,
    pub event_id: Ulid,
    pub holder_id: Ulid,
    pub seats: u32,
    /// `seats * unit_price` at creation time. Later price edits don't touch it.
    pub total: Decimal,
    pub status: ReservationStatus,
    pub comment: Option<String>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRequest {
    pub seats: u32,
    pub comment: Option<String>,
}

impl ReservationRequest {
    pub fn seats(seats: u32) -> Self {
        Self {
            seats,
            comment: None,
        }
    }
}

/// Everything the engine knows about one event: the record itself and the
/// reservations made against it, with the held-seat aggregate kept in step.
#[derive(Debug, Clone)]
pub struct EventState {
    pub event: Event,
    /// In creation order.
    pub reservations: Vec<Reservation>,
    held_seats: u32,
    /// Set under the write lock when the event is deleted, so callers that
    /// were queued on the lock see it as gone.
    removed: bool,
}

impl EventState {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            reservations: Vec::new(),
            held_seats: 0,
            removed: false,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// Seats counted against capacity (Pending + Confirmed).
    pub fn committed_seats(&self) -> u32 {
        self.held_seats
    }

    pub fn available_seats(&self) -> u32 {
        self.event.capacity.saturating_sub(self.held_seats)
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        if reservation.status.holds_capacity() {
            self.held_seats += reservation.seats;
        }
        self.reservations.push(reservation);
    }

    /// Move a reservation to `status`, keeping the aggregate consistent.
    /// Returns the previous status, or `None` if the id is unknown.
    pub fn set_reservation_status(
        &mut self,
        id: Ulid,
        status: ReservationStatus,
        at: Ms,
    ) -> Option<ReservationStatus> {
        let r = self.reservations.iter_mut().find(|r| r.id == id)?;
        let previous = r.status;
        match (previous.holds_capacity(), status.holds_capacity()) {
            (true, false) => self.held_seats -= r.seats,
            (false, true) => self.held_seats += r.seats,
            _ => {}
        }
        r.status = status;
        r.updated_at = Some(at);
        Some(previous)
    }
}

// ── WAL record ───────────────────────────────────────────────────

/// The change types, flat with no nesting. This is the WAL record format and
/// what subscribers of the notify hub receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    EventCreated {
        event: Event,
    },
    EventUpdated {
        event: Event,
    },
    EventStatusChanged {
        id: Ulid,
        status: EventStatus,
        at: Ms,
    },
    EventDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        event_id: Ulid,
        status: ReservationStatus,
        at: Ms,
    },
}

impl Change {
    /// The event this change belongs to.
    pub fn event_id(&self) -> Ulid {
        match self {
            Change::EventCreated { event } | Change::EventUpdated { event } => event.id,
            Change::EventStatusChanged { id, .. } | Change::EventDeleted { id } => *id,
            Change::ReservationCreated { reservation } => reservation.event_id,
            Change::ReservationStatusChanged { event_id, .. } => *event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::EventCreated { .. } => "event_created",
            Change::EventUpdated { .. } => "event_updated",
            Change::EventStatusChanged { .. } => "event_status",
            Change::EventDeleted { .. } => "event_deleted",
            Change::ReservationCreated { .. } => "reservation_created",
            Change::ReservationStatusChanged { .. } => "reservation_status",
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

/// Filters for `search_events`. Every field is optional; only published
/// events are ever returned. Start bounds are exclusive, price bounds
/// inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSearch {
    pub category: Option<EventCategory>,
    pub starts_after: Option<Ms>,
    pub starts_before: Option<Ms>,
    pub city: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub cancelled: usize,
    pub confirmed_revenue: Decimal,
    pub confirmed_seats: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizerStats {
    pub events: usize,
    pub draft: usize,
    pub published: usize,
    pub cancelled: usize,
    pub completed: usize,
    pub reservations: usize,
    pub confirmed_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderInfo {
    pub id: Ulid,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationSummary {
    pub code: String,
    pub created_at: Ms,
    pub seats: u32,
    pub total: Decimal,
    pub status: ReservationStatus,
    pub comment: Option<String>,
    /// `None` when the directory no longer knows the holder.
    pub holder: Option<HolderInfo>,
    pub event_title: String,
    pub event_start: Ms,
    pub venue: String,
    pub city: String,
    pub unit_price: Decimal,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn event(capacity: u32, unit_price: Decimal) -> Event {
        Event {
            id: Ulid::new(),
            title: "Jazz night".into(),
            description: None,
            category: EventCategory::Concert,
            start: 1_000_000,
            end: 2_000_000,
            venue: "Blue Room".into(),
            city: "Rabat".into(),
            capacity,
            unit_price,
            image_url: None,
            status: EventStatus::Published,
            organizer_id: Ulid::new(),
            created_at: 0,
            updated_at: None,
        }
    }

    pub fn reservation(event_id: Ulid, seats: u32, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            code: "EVT-12345".into(),
            event_id,
            holder_id: Ulid::new(),
            seats,
            total: Decimal::from(seats),
            status,
            comment: None,
            created_at: 0,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn held_seats_count_pending_and_confirmed() {
        let mut st = EventState::new(event(10, Decimal::ZERO));
        let id = st.event.id;
        st.insert_reservation(reservation(id, 3, ReservationStatus::Pending));
        st.insert_reservation(reservation(id, 2, ReservationStatus::Confirmed));
        st.insert_reservation(reservation(id, 4, ReservationStatus::Cancelled));
        assert_eq!(st.committed_seats(), 5);
        assert_eq!(st.available_seats(), 5);
    }

    #[test]
    fn cancelling_releases_seats_once() {
        let mut st = EventState::new(event(10, Decimal::ZERO));
        let r = reservation(st.event.id, 4, ReservationStatus::Pending);
        let rid = r.id;
        st.insert_reservation(r);

        let prev = st.set_reservation_status(rid, ReservationStatus::Confirmed, 10);
        assert_eq!(prev, Some(ReservationStatus::Pending));
        assert_eq!(st.committed_seats(), 4);

        st.set_reservation_status(rid, ReservationStatus::Cancelled, 20);
        assert_eq!(st.committed_seats(), 0);
        assert_eq!(st.reservation(rid).unwrap().updated_at, Some(20));
    }

    #[test]
    fn unknown_reservation_status_change_is_none() {
        let mut st = EventState::new(event(10, Decimal::ZERO));
        assert!(st
            .set_reservation_status(Ulid::new(), ReservationStatus::Cancelled, 0)
            .is_none());
    }

    #[test]
    fn available_never_underflows() {
        let mut st = EventState::new(event(2, Decimal::ZERO));
        let id = st.event.id;
        st.insert_reservation(reservation(id, 2, ReservationStatus::Confirmed));
        st.event.capacity = 1;
        assert_eq!(st.available_seats(), 0);
    }

    #[test]
    fn missing_required_fields_reports_blanks() {
        let mut e = event(10, Decimal::ZERO);
        assert!(e.missing_required_fields().is_empty());
        e.title = "   ".into();
        e.city = String::new();
        assert_eq!(e.missing_required_fields(), vec!["title", "city"]);
    }

    #[test]
    fn patch_leaves_unset_fields() {
        let mut e = event(10, Decimal::new(2000, 2));
        let before = e.clone();
        EventPatch {
            capacity: Some(20),
            description: Some(Some("late set".into())),
            ..Default::default()
        }
        .apply_to(&mut e);
        assert_eq!(e.capacity, 20);
        assert_eq!(e.description.as_deref(), Some("late set"));
        assert_eq!(e.title, before.title);
        assert_eq!(e.unit_price, before.unit_price);
    }

    #[test]
    fn status_predicates() {
        assert!(ReservationStatus::Pending.holds_capacity());
        assert!(ReservationStatus::Confirmed.holds_capacity());
        assert!(!ReservationStatus::Cancelled.holds_capacity());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(Role::Organizer.can_create_events());
        assert!(!Role::Client.can_create_events());
    }

    #[test]
    fn change_serialization_roundtrip() {
        let e = event(5, Decimal::new(1999, 2));
        let change = Change::ReservationCreated {
            reservation: reservation(e.id, 2, ReservationStatus::Pending),
        };
        let bytes = bincode::serialize(&change).unwrap();
        let decoded: Change = bincode::deserialize(&bytes).unwrap();
        assert_eq!(change, decoded);
        assert_eq!(decoded.event_id(), e.id);

        let created = Change::EventCreated { event: e.clone() };
        let bytes = bincode::serialize(&created).unwrap();
        let decoded: Change = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, created);
    }
}
