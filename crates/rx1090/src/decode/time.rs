/**
 * Timestamps are exchanged as seconds since the Unix epoch, possibly with a
 * fractional part. std::time::SystemTime is the single source of truth.
 */
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_in_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before unix epoch")
        .as_nanos()
}

pub fn now_in_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before unix epoch")
        .as_secs()
}

/// Seconds since the Unix epoch as f64, the timestamp unit of the pipeline
pub fn now() -> f64 {
    now_in_ns() as f64 * 1e-9
}
