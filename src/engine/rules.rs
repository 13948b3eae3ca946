use rust_decimal::Decimal;

use crate::auth::Principal;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn check_len(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::InvalidInput(format!("{field} longer than {max} chars")));
    }
    Ok(())
}

/// Field-level checks shared by create and update. Blank required fields are
/// allowed on drafts; publishing is what insists on them.
pub(crate) fn validate_event_fields(event: &Event) -> Result<(), EngineError> {
    check_len("title", &event.title, MAX_TITLE_LEN)?;
    if let Some(d) = &event.description {
        check_len("description", d, MAX_DESCRIPTION_LEN)?;
    }
    check_len("venue", &event.venue, MAX_PLACE_LEN)?;
    check_len("city", &event.city, MAX_PLACE_LEN)?;
    if event.capacity == 0 {
        return Err(EngineError::InvalidInput("capacity must be positive".into()));
    }
    if event.capacity > MAX_CAPACITY {
        return Err(EngineError::InvalidInput(format!("capacity above {MAX_CAPACITY}")));
    }
    if event.unit_price < Decimal::ZERO {
        return Err(EngineError::InvalidInput("unit price must not be negative".into()));
    }
    if event.unit_price > Decimal::from(MAX_UNIT_PRICE) {
        return Err(EngineError::InvalidInput(format!("unit price above {MAX_UNIT_PRICE}")));
    }
    Ok(())
}

pub(crate) fn add_revenue(sum: Decimal, amount: Decimal) -> Result<Decimal, EngineError> {
    sum.checked_add(amount)
        .ok_or_else(|| EngineError::Internal("revenue total out of range".into()))
}

pub(crate) fn validate_schedule(start: Ms, end: Ms, now: Ms) -> Result<(), EngineError> {
    if start <= now {
        return Err(EngineError::InvalidInput("event must start in the future".into()));
    }
    if end <= start {
        return Err(EngineError::InvalidInput("event must end after it starts".into()));
    }
    Ok(())
}

pub(crate) fn ensure_can_manage(event: &Event, actor: &Principal) -> Result<(), EngineError> {
    if event.is_owned_by(actor.id) || actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("only the organizer or an admin can manage this event"))
    }
}

/// Whether reservations may be taken against the event right now.
pub(crate) fn check_bookable(event: &Event, now: Ms) -> Result<(), EngineError> {
    match event.status {
        EventStatus::Published => {}
        EventStatus::Completed => {
            return Err(EngineError::BusinessRule("event is completed".into()));
        }
        other => {
            return Err(EngineError::BusinessRule(format!(
                "event is not open for reservations ({})",
                other.label()
            )));
        }
    }
    if event.start <= now {
        return Err(EngineError::BusinessRule("event has already started".into()));
    }
    Ok(())
}

pub(crate) fn validate_request(request: &ReservationRequest) -> Result<(), EngineError> {
    if !(MIN_SEATS_PER_RESERVATION..=MAX_SEATS_PER_RESERVATION).contains(&request.seats) {
        return Err(EngineError::InvalidInput(format!(
            "seat count must be {MIN_SEATS_PER_RESERVATION}..={MAX_SEATS_PER_RESERVATION}, got {}",
            request.seats
        )));
    }
    if let Some(c) = &request.comment {
        check_len("comment", c, MAX_COMMENT_LEN)?;
    }
    Ok(())
}

pub(crate) fn check_cancellation_window(event_start: Ms, now: Ms) -> Result<(), EngineError> {
    if event_start - now < CANCELLATION_WINDOW_MS {
        return Err(EngineError::BusinessRule(
            "cancellation window closed (less than 48h before the event)".into(),
        ));
    }
    Ok(())
}

pub(crate) fn format_code(n: u32) -> String {
    format!("{CODE_PREFIX}{n:05}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::event;
    use ulid::Ulid;

    const M: Ms = 60_000;

    #[test]
    fn schedule_must_be_future_and_ordered() {
        let now = 10 * HOUR_MS;
        assert!(validate_schedule(now + HOUR_MS, now + 2 * HOUR_MS, now).is_ok());
        assert!(matches!(
            validate_schedule(now - HOUR_MS, now + HOUR_MS, now),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_schedule(now, now + HOUR_MS, now),
            Err(EngineError::InvalidInput(_))
        ));
        let start = now + HOUR_MS;
        assert!(matches!(
            validate_schedule(start, start - HOUR_MS, now),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(validate_schedule(start, start, now).is_err());
    }

    #[test]
    fn revenue_sum_overflow_is_an_error() {
        assert_eq!(add_revenue(Decimal::ONE, Decimal::TWO).unwrap(), Decimal::from(3));
        assert!(matches!(
            add_revenue(Decimal::MAX, Decimal::MAX),
            Err(EngineError::Internal(_))
        ));
    }

    #[test]
    fn event_fields() {
        let mut e = event(10, Decimal::new(2000, 2));
        assert!(validate_event_fields(&e).is_ok());

        e.unit_price = Decimal::ZERO;
        assert!(validate_event_fields(&e).is_ok());

        e.unit_price = Decimal::new(-1, 2);
        assert!(matches!(validate_event_fields(&e), Err(EngineError::InvalidInput(_))));

        e.unit_price = Decimal::from(MAX_UNIT_PRICE);
        assert!(validate_event_fields(&e).is_ok());
        e.unit_price = Decimal::MAX;
        assert!(matches!(validate_event_fields(&e), Err(EngineError::InvalidInput(_))));

        let mut e = event(0, Decimal::ZERO);
        assert!(matches!(validate_event_fields(&e), Err(EngineError::InvalidInput(_))));
        e.capacity = MAX_CAPACITY + 1;
        assert!(validate_event_fields(&e).is_err());

        let mut e = event(1, Decimal::ZERO);
        e.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(validate_event_fields(&e).is_err());
        e.title = "é".repeat(MAX_TITLE_LEN);
        assert!(validate_event_fields(&e).is_ok());
    }

    #[test]
    fn bookable_only_when_published_and_future() {
        let mut e = event(10, Decimal::ZERO);
        assert!(check_bookable(&e, e.start - 1).is_ok());
        assert!(matches!(check_bookable(&e, e.start), Err(EngineError::BusinessRule(_))));

        for status in [EventStatus::Draft, EventStatus::Cancelled, EventStatus::Completed] {
            e.status = status;
            assert!(matches!(check_bookable(&e, 0), Err(EngineError::BusinessRule(_))));
        }
    }

    #[test]
    fn seat_bounds() {
        for seats in [0, 11, 100] {
            let err = validate_request(&ReservationRequest::seats(seats)).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{seats} accepted");
        }
        for seats in [1, 5, 10] {
            assert!(validate_request(&ReservationRequest::seats(seats)).is_ok());
        }
    }

    #[test]
    fn comment_limit() {
        let mut req = ReservationRequest::seats(1);
        req.comment = Some("a".repeat(MAX_COMMENT_LEN));
        assert!(validate_request(&req).is_ok());
        req.comment = Some("a".repeat(MAX_COMMENT_LEN + 1));
        assert!(matches!(validate_request(&req), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn cancellation_window_boundary() {
        let start = 100 * HOUR_MS;
        assert!(check_cancellation_window(start, start - 48 * HOUR_MS).is_ok());
        assert!(check_cancellation_window(start, start - 72 * HOUR_MS).is_ok());
        let err = check_cancellation_window(start, start - (47 * HOUR_MS + 59 * M)).unwrap_err();
        assert!(matches!(err, EngineError::BusinessRule(_)));
        assert!(check_cancellation_window(start, start + HOUR_MS).is_err());
    }

    #[test]
    fn manage_rights() {
        let e = event(10, Decimal::ZERO);
        let owner = Principal { id: e.organizer_id, role: Role::Organizer, active: true };
        let admin = Principal { id: Ulid::new(), role: Role::Admin, active: true };
        let other = Principal { id: Ulid::new(), role: Role::Organizer, active: true };
        assert!(ensure_can_manage(&e, &owner).is_ok());
        assert!(ensure_can_manage(&e, &admin).is_ok());
        assert!(matches!(ensure_can_manage(&e, &other), Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn code_format() {
        assert_eq!(format_code(10_000), "EVT-10000");
        assert_eq!(format_code(99_999), "EVT-99999");
        assert_eq!(format_code(42), "EVT-00042");
    }
}
