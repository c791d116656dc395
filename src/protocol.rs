//! GATT UUIDs, the trigger payload, and the fixed timings of the reveal rig.
//!
//! The Notification Source (an iPad acting as a BLE peripheral) advertises
//! under [`TARGET_NAME`] and notifies a single byte on
//! [`TRIGGER_CHARACTERISTIC`] whenever the proximity event fires.

use std::time::Duration;

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service exposed by the Notification Source.
pub const TRIGGER_SERVICE_UUID: Uuid = Uuid::from_u128(0xe44b9ddb_630f_9052_9f2c_1b764b52ce72);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Notify characteristic carrying the trigger byte.
///
/// Payloads are opaque except for [`TRIGGER_PAYLOAD`]; anything else is
/// forwarded to the Event Queue but never starts an animation.
pub const TRIGGER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xebe9db63_5705_8280_37d5_808d4f5a35fb);

/// Advertised local name the listener matches (exactly, after trimming
/// surrounding whitespace) during a scan.
pub const TARGET_NAME: &str = "IPAD_SYNC";

/// The only payload with meaning: "start the reveal".
pub const TRIGGER_PAYLOAD: [u8; 1] = [0x01];

// ── Timings ───────────────────────────────────────────────────────────────────

/// Wait between a failed / empty scan (or a dropped link) and the next scan.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded wait used by the Dispatch Loop on each Event Queue poll.
pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

// ── Image geometry ────────────────────────────────────────────────────────────

/// Rows copied from the source image per reveal block.
pub const DEFAULT_BLOCK_ROWS: usize = 10;

/// Source images taller than this are scaled down (aspect preserved).
pub const MAX_IMAGE_HEIGHT: u32 = 800;

/// Returns `true` when `payload` is exactly the trigger byte.
///
/// ```
/// # use reveal_rs::protocol::is_trigger;
/// assert!(is_trigger(&[0x01]));
/// assert!(!is_trigger(&[0x00]));
/// assert!(!is_trigger(&[0x01, 0x01]));
/// ```
pub fn is_trigger(payload: &[u8]) -> bool {
    payload == TRIGGER_PAYLOAD
}

/// Match an advertised local name against the configured target.
///
/// Peripherals occasionally advertise with trailing whitespace or padding,
/// so both sides are trimmed before comparison.
pub fn name_matches(advertised: &str, target: &str) -> bool {
    advertised.trim() == target.trim()
}
