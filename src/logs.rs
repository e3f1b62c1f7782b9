use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::time::SystemTime;

use tokio::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 1000;

/// One ingested line. `seq` increases by one per append across all sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: u64,
    pub tag: String,
    pub message: String,
}

/// Receives every buffered entry, oldest first, while the buffer is locked.
pub trait EntryVisitor {
    fn visit(&mut self, entry: &LogEntry) -> impl Future<Output = io::Result<()>> + Send;
}

#[derive(Debug)]
struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    last_seq: u64,
}

impl LogRing {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_seq: 0,
        }
    }

    fn push(&mut self, tag: String, message: String) -> LogEntry {
        self.last_seq += 1;
        let entry = LogEntry {
            seq: self.last_seq,
            timestamp: current_timestamp(),
            tag,
            message,
        };
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }
}

/// Fixed-capacity FIFO of the most recent entries, shared by every worker.
///
/// Exports go through [`LogBuffer::snapshot_iterate`], which keeps the lock for
/// the whole traversal. Appends issued during an export wait for it to finish.
#[derive(Debug)]
pub struct LogBuffer {
    ring: Mutex<LogRing>,
}

impl LogBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(LogRing::new(capacity.max(1))),
        }
    }

    pub async fn append(&self, tag: impl Into<String>, message: impl Into<String>) -> LogEntry {
        let (tag, message) = (tag.into(), message.into());
        let mut ring = self.ring.lock().await;
        ring.push(tag, message)
    }

    /// Visits every entry in arrival order under the lock and returns the
    /// sequence number of the newest entry appended so far (0 if none).
    pub async fn snapshot_iterate<V: EntryVisitor + Send>(
        &self,
        visitor: &mut V,
    ) -> io::Result<u64> {
        let ring = self.ring.lock().await;
        for entry in ring.entries.iter() {
            visitor.visit(entry).await?;
        }
        Ok(ring.last_seq)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
