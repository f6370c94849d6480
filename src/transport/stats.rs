//! Counters at the retry and reconnect boundaries
//!
//! Poll failures never reach the caller, so these are the only way to tell a
//! healthy receive loop from one that keeps failing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one transport instance
#[derive(Debug, Default)]
pub struct TransportStats {
    chunks_sent: AtomicU64,
    send_retries: AtomicU64,
    send_failures: AtomicU64,
    discover_failures: AtomicU64,
    fetch_failures: AtomicU64,
    snapshots_received: AtomicU64,
    snapshots_filtered: AtomicU64,
    sessions_superseded: AtomicU64,
    reconnects: AtomicU64,
    keepalive_timeouts: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub chunks_sent: u64,
    pub send_retries: u64,
    pub send_failures: u64,
    pub discover_failures: u64,
    pub fetch_failures: u64,
    pub snapshots_received: u64,
    pub snapshots_filtered: u64,
    pub sessions_superseded: u64,
    pub reconnects: u64,
    pub keepalive_timeouts: u64,
}

macro_rules! counters {
    ($($field:ident => $inc:ident),* $(,)?) => {
        impl TransportStats {
            $(
                pub(crate) fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy the current values
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    chunks_sent => chunk_sent,
    send_retries => send_retried,
    send_failures => send_failed,
    discover_failures => discover_failed,
    fetch_failures => fetch_failed,
    snapshots_received => snapshot_received,
    snapshots_filtered => snapshot_filtered,
    sessions_superseded => session_superseded,
    reconnects => reconnected,
    keepalive_timeouts => keepalive_timed_out,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = TransportStats::default();
        stats.chunk_sent();
        stats.chunk_sent();
        stats.reconnected();

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_sent, 2);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.send_failures, 0);
    }
}
