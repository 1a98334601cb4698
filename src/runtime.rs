//! The process-wide `Runtime` value (spec.md §9): owns `running`, the
//! attr-spec handover, the index handover and the current-index slot.
//! Constructed once in `main`, lent by reference to every worker — no
//! worker holds its own copy of shared mutable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::claims::AttrSpecClaim;
use crate::handover::Handover;
use crate::index::AttrIndexDb;
use crate::model::BlobRef;

/// What the watch-specs worker hands to build-index: the winning
/// attr-spec claim, the blob ref of the claim-set that carried it, and
/// its `created` timestamp (spec.md §4.5 step 3).
#[derive(Debug, Clone)]
pub struct SpecHandoff {
    pub spec: AttrSpecClaim,
    pub spec_blob_ref: BlobRef,
    pub created: DateTime<Utc>,
}

/// Everything the sync worker needs to adopt a freshly built index
/// (spec.md §4.6 step 5, §4.7 step 1): just the blob reference, since
/// the sync worker reopens the index and refetches the spec itself.
pub type IndexHandoff = BlobRef;

/// The "current index" published for query-server readers: the open DB
/// handle plus the spec and stylesheet needed to interpret it. Readers
/// only ever take a non-destructive peek (spec.md §4.7 step 2, §4.8).
pub struct CurrentIndex {
    pub db: Arc<AttrIndexDb>,
    pub spec_blob_ref: BlobRef,
}

pub struct Runtime {
    pub running: Arc<AtomicBool>,
    pub spec_handover: Handover<SpecHandoff>,
    pub index_handover: Handover<IndexHandoff>,
    pub current_index: Handover<Arc<CurrentIndex>>,
}

impl Runtime {
    pub fn new() -> Self {
        let running = Arc::new(AtomicBool::new(true));
        Runtime {
            spec_handover: Handover::new(Arc::clone(&running)),
            index_handover: Handover::new(Arc::clone(&running)),
            current_index: Handover::new(Arc::clone(&running)),
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown (spec.md §5): flips `running` false and
    /// wakes every waiter on every handover so blocked workers observe
    /// the flag and exit.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.spec_handover.stop();
        self.index_handover.stop();
        self.current_index.stop();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
