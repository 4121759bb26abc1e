//! Adaptive polling interval
//!
//! The sync engine sleeps between cycles. The delay grows quickly while the
//! node has nothing new for us and shrinks slowly once blocks are flowing again.
//! All values are milliseconds.

/// Smallest delay the controller will produce.
pub const MIN_SYNC_DELAY: u64 = 0;

/// Exclusive upper bound on any delay the controller will produce.
pub const MAX_SYNC_DELAY: u64 = 3000;

/// Starting delay for targets configured without one.
pub const DEFAULT_SYNC_DELAY: u64 = 1000;

/// Step used to decide whether there is headroom, and the decrease step.
const STEP_DOWN: u64 = 100;

/// Increase step applied after a miss.
const STEP_UP: u64 = 500;

/// Back off after a miss.
///
/// Grows by 500ms while there is at least 100ms of headroom below the
/// ceiling, capped just below `MAX_SYNC_DELAY`. Otherwise the delay is held.
pub fn increase(delay: u64) -> u64 {
    if delay.saturating_add(STEP_DOWN) < MAX_SYNC_DELAY {
        delay.saturating_add(STEP_UP).min(MAX_SYNC_DELAY - 1)
    } else {
        delay
    }
}

/// Speed up after a block was found.
///
/// Shrinks by 100ms unless that would go below `MIN_SYNC_DELAY`.
pub fn decrease(delay: u64) -> u64 {
    match delay.checked_sub(STEP_DOWN) {
        Some(d) if d >= MIN_SYNC_DELAY => d,
        _ => delay,
    }
}

/// Bring an externally supplied delay into `[MIN_SYNC_DELAY, MAX_SYNC_DELAY)`.
pub fn clamp(delay: u64) -> u64 {
    delay.clamp(MIN_SYNC_DELAY, MAX_SYNC_DELAY - 1)
}
