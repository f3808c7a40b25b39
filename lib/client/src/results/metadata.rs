use parking_lot::{Condvar, Mutex};
use rdf_fusion_protocol::ProtocolError;

#[derive(Debug)]
enum Slot<M> {
    Pending,
    Ready(M),
    Failed(ProtocolError),
}

/// A write-once cell for the metadata of a streaming result, e.g. the variables of a solution
/// sequence.
///
/// Readers block until the producer has either published the metadata or failed.
#[derive(Debug)]
pub(crate) struct MetadataCell<M> {
    slot: Mutex<Slot<M>>,
    ready: Condvar,
}

impl<M> MetadataCell<M> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Publishes the metadata. Returns `false` if the cell was already resolved.
    pub(crate) fn set(&self, metadata: M) -> bool {
        self.resolve(Slot::Ready(metadata))
    }

    /// Fails all current and future readers. Returns `false` if the cell was already resolved.
    pub(crate) fn fail(&self, error: ProtocolError) -> bool {
        self.resolve(Slot::Failed(error))
    }

    fn resolve(&self, resolved: Slot<M>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = resolved;
        self.ready.notify_all();
        true
    }

    /// Blocks until the metadata is known.
    pub(crate) fn wait(&self) -> Result<M, ProtocolError>
    where
        M: Clone,
    {
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(metadata) => return Ok(metadata.clone()),
                Slot::Failed(error) => return Err(error.clone()),
                Slot::Pending => (),
            }
            self.ready.wait(&mut slot);
        }
    }
}

impl<M> Default for MetadataCell<M> {
    fn default() -> Self {
        Self::new()
    }
}
