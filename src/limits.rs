use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;

// ── Reservations ─────────────────────────────────────────

pub const MIN_SEATS_PER_RESERVATION: u32 = 1;
pub const MAX_SEATS_PER_RESERVATION: u32 = 10;
pub const MAX_COMMENT_LEN: usize = 500;

/// Cancellation is refused once the event starts in less than this.
pub const CANCELLATION_WINDOW_MS: Ms = 48 * HOUR_MS;

// ── Reservation codes ────────────────────────────────────

pub const CODE_PREFIX: &str = "EVT-";
pub const CODE_MIN: u32 = 10_000;
pub const CODE_MAX: u32 = 99_999;
/// Draws before code generation gives up with `Internal`.
pub const MAX_CODE_ATTEMPTS: usize = 50;

// ── Events ───────────────────────────────────────────────

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_PLACE_LEN: usize = 200;
pub const MAX_CAPACITY: u32 = 1_000_000;
/// Whole currency units.
pub const MAX_UNIT_PRICE: i64 = 1_000_000_000;

// ── Users ────────────────────────────────────────────────

pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_DISPLAY_NAME_LEN: usize = 100;

// ── Concurrency ──────────────────────────────────────────

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
