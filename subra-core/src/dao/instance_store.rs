use dashmap::DashMap;
use subra_common::prelude::*;

/// Byte-blob persistence for dehydrated process instances. The runtime never
/// interprets the payload; a store only has to load and save opaque snapshots
/// keyed by process-instance id.
pub trait InstanceStore: Send + Sync {
    fn save_snapshot(&self, instance_id: &str, snapshot: &[u8]) -> SubResult<()>;

    fn load_snapshot(&self, instance_id: &str) -> SubResult<Option<Vec<u8>>>;

    /// Removes the snapshot for a completed or terminated instance. Removing
    /// an absent snapshot is not an error.
    fn delete_snapshot(&self, instance_id: &str) -> SubResult<()>;
}

/// In-memory store used by tests and embedded deployments.
#[derive(Default)]
pub struct MemoryInstanceStore {
    snapshots: DashMap<InlineStr, Vec<u8>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl InstanceStore for MemoryInstanceStore {
    fn save_snapshot(&self, instance_id: &str, snapshot: &[u8]) -> SubResult<()> {
        debug!(
            "saving snapshot for instance {} ({} bytes)",
            instance_id,
            snapshot.len()
        );
        self.snapshots.insert(instance_id.into(), snapshot.to_vec());
        Ok(())
    }

    fn load_snapshot(&self, instance_id: &str) -> SubResult<Option<Vec<u8>>> {
        Ok(self
            .snapshots
            .get(&InlineStr::from(instance_id))
            .map(|entry| entry.value().clone()))
    }

    fn delete_snapshot(&self, instance_id: &str) -> SubResult<()> {
        self.snapshots.remove(&InlineStr::from(instance_id));
        Ok(())
    }
}
