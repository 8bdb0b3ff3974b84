//! Collision-resistant call identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates call identifiers unique within one connection.
///
/// Identifiers are `{epoch}-{counter}`: the epoch is the generator's creation
/// time in hex milliseconds and distinguishes connections (including quick
/// reconnects), the counter distinguishes calls within one. No randomness, so
/// no collision window while a call is outstanding.
#[derive(Debug)]
pub struct CallIdGen {
    epoch: u64,
    next: AtomicU64,
}

impl CallIdGen {
    pub fn new() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            epoch,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:x}-{n}", self.epoch)
    }
}

impl Default for CallIdGen {
    fn default() -> Self {
        Self::new()
    }
}
