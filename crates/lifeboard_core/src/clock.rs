//! Wall-clock helper used for server-stamped and client-stamped times.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
