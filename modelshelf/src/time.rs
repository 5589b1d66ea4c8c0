//! Time-related utility functions.
//!
//! The persistent store and freshness tokens both work in integer
//! milliseconds since the Unix epoch, so conversions live here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a `SystemTime` to milliseconds since the Unix epoch.
///
/// Times before the epoch clamp to zero; filesystems that report such
/// mtimes are broken in ways a cache cannot fix.
pub fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis_now() -> u64 {
    system_time_to_millis(SystemTime::now())
}
