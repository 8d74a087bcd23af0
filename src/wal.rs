use std::sync::atomic::{AtomicU64, Ordering};

/// Log sequence number.
pub type Lsn = u64;

/// Write-ahead log manager. Recovery lives outside the page cache core;
/// the buffer pool only keeps a handle so callers can wire one through,
/// it never blocks on the log itself.
#[derive(Debug, Default)]
pub struct LogManager {
    next_lsn: AtomicU64,
}

impl LogManager {
    pub fn new() -> LogManager {
        LogManager { next_lsn: AtomicU64::new(0) }
    }

    /// Hand out the next log sequence number.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    /// The lsn the next record will get.
    pub fn current_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }
}
