mod jsonl;

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use thiserror::Error;

use crate::tracking::PositionSample;

pub use jsonl::JsonLinesStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Append-only buffer of captured samples.
///
/// `append` and `drain_all` may be called from different tasks; an
/// implementation must never hand out a partially written record.
pub trait LocationStore: Send + Sync {
    fn append(&self, sample: PositionSample) -> Result<(), StoreError>;

    /// Removes and returns every buffered sample, oldest first.
    fn drain_all(&self) -> Result<Vec<PositionSample>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: StdMutex<VecDeque<PositionSample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationStore for MemoryStore {
    fn append(&self, sample: PositionSample) -> Result<(), StoreError> {
        self.samples.lock().unwrap().push_back(sample);
        Ok(())
    }

    fn drain_all(&self) -> Result<Vec<PositionSample>, StoreError> {
        Ok(self.samples.lock().unwrap().drain(..).collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.samples.lock().unwrap().len())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::sample;
    use super::*;

    #[test]
    fn drain_is_destructive_and_ordered() {
        let store = MemoryStore::new();
        store.append(sample(1.0)).unwrap();
        store.append(sample(2.0)).unwrap();

        let drained = store.drain_all().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].latitude, 1.0);
        assert_eq!(drained[1].latitude, 2.0);
        assert!(store.is_empty().unwrap());
        assert!(store.drain_all().unwrap().is_empty());
    }
}
