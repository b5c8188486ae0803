use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use footscan_model::{ModelResult, Scan, ScanId, ScanStatus};
use tokio::sync::watch;

use crate::error::{PipelineError, Result};

/// Live scan records, one watch channel per identifier.
///
/// Each channel is the single write path for its scan; readers clone the
/// latest value and never wait on a running pipeline.
#[derive(Debug, Default)]
pub(crate) struct ScanRegistry {
    slots: DashMap<ScanId, Arc<watch::Sender<Scan>>>,
}

impl ScanRegistry {
    /// Register `scan` as the identifier's current run.
    ///
    /// Rejected while a run is in flight or after one completed; a failed
    /// record is replaced by the fresh one.
    pub(crate) fn claim(&self, scan: Scan) -> Result<()> {
        match self.slots.entry(scan.id.clone()) {
            Entry::Occupied(slot) => {
                let status = slot.get().borrow().status;
                match status {
                    ScanStatus::Failed => {
                        slot.get().send_replace(scan);
                        Ok(())
                    }
                    ScanStatus::Completed => {
                        Err(PipelineError::AlreadyCompleted(scan.id))
                    }
                    ScanStatus::Uploading | ScanStatus::Processing => {
                        Err(PipelineError::Concurrency(scan.id))
                    }
                }
            }
            Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(scan);
                slot.insert(Arc::new(tx));
                Ok(())
            }
        }
    }

    pub(crate) fn contains(&self, scan_id: &ScanId) -> bool {
        self.slots.contains_key(scan_id)
    }

    pub(crate) fn snapshot(&self, scan_id: &ScanId) -> Option<Scan> {
        self.slots.get(scan_id).map(|slot| slot.borrow().clone())
    }

    pub(crate) fn watch(&self, scan_id: &ScanId) -> Option<watch::Receiver<Scan>> {
        self.slots.get(scan_id).map(|slot| slot.subscribe())
    }

    /// Apply a model transition and return the updated record. Nothing is
    /// published when the transition is rejected.
    pub(crate) fn update<F>(&self, scan_id: &ScanId, apply: F) -> Result<Scan>
    where
        F: FnOnce(&mut Scan) -> ModelResult<()>,
    {
        let sender = self
            .slots
            .get(scan_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| PipelineError::NotFound(scan_id.clone()))?;

        let mut outcome = Ok(());
        sender.send_if_modified(|scan| {
            outcome = apply(scan);
            outcome.is_ok()
        });
        outcome?;

        Ok(sender.borrow().clone())
    }
}
