use crate::node::log::{Entry, Index};
use std::io;

/// LogStorage is the durability adapter for the replicated log. The engine reads
/// from its own in-memory view; this trait only has to make mutations durable and
/// hand the full log back on recovery. A purely in-memory implementation is valid,
/// it just forfeits durability across restarts.
pub trait LogStorage: Send + 'static {
    /// Persist `entry` at the tail of the log.
    fn append(&mut self, entry: &Entry) -> Result<(), io::Error>;

    /// Discard every persisted entry with index greater than `index`.
    fn truncate_after(&mut self, index: Index) -> Result<(), io::Error>;

    /// Read the entire persisted log in index order.
    fn read_all(&self) -> Result<Vec<Entry>, io::Error>;
}

/// The default storage adapter: the log lives in memory only.
pub struct InMemoryLogStorage {
    entries: Vec<Entry>,
}

impl InMemoryLogStorage {
    pub fn new() -> Self {
        InMemoryLogStorage { entries: Vec::new() }
    }
}

impl Default for InMemoryLogStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStorage for InMemoryLogStorage {
    fn append(&mut self, entry: &Entry) -> Result<(), io::Error> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn truncate_after(&mut self, index: Index) -> Result<(), io::Error> {
        self.entries.truncate(index.as_u64() as usize);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Entry>, io::Error> {
        Ok(self.entries.clone())
    }
}
