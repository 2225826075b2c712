//! In-flight bookkeeping for one root unit.

use crate::error::Error;
use crate::metadata::MetadataRecord;
use crate::types::{Identity, TaskId};
use std::collections::HashSet;

/// How a finished root unit is registered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RootOutcome {
    /// Every task finished without error
    Processed,
    /// At least one task reported a failure
    Failed,
    /// At least one task was cancelled before it started
    Cancelled,
}

/// Driver-local state of one root unit while it is being processed
///
/// Created when the root download is dispatched and dropped once
/// `files_to_process` runs empty.
#[derive(Debug)]
pub(crate) struct RootProgress {
    pub(crate) root: Identity,
    /// Last known copy of the root's metadata record
    pub(crate) metadata: MetadataRecord,
    pub(crate) futures: HashSet<TaskId>,
    pub(crate) errors: Vec<Error>,
    pub(crate) files_to_process: HashSet<Identity>,
    pub(crate) cancelled: bool,
    /// Set by the first download or extraction failure; follow-up extractions
    /// are no longer submitted
    pub(crate) halted: bool,
}

impl RootProgress {
    pub(crate) fn new(root: Identity, metadata: MetadataRecord) -> Self {
        let files_to_process = HashSet::from([root.clone()]);
        Self {
            root,
            metadata,
            futures: HashSet::new(),
            errors: Vec::new(),
            files_to_process,
            cancelled: false,
            halted: false,
        }
    }

    /// Record a submitted task for `identity`
    pub(crate) fn track(&mut self, task: TaskId, identity: Identity) {
        self.futures.insert(task);
        self.files_to_process.insert(identity);
    }

    /// Forget a finished or cancelled task
    pub(crate) fn complete(&mut self, task: TaskId, identity: &Identity) {
        self.futures.remove(&task);
        self.files_to_process.remove(identity);
    }

    /// Whether no work remains for the root unit
    pub(crate) fn is_complete(&self) -> bool {
        self.files_to_process.is_empty()
    }

    /// Whether follow-up work should still be submitted
    pub(crate) fn accepts_follow_up(&self) -> bool {
        !self.cancelled && !self.halted
    }

    pub(crate) fn outcome(&self) -> RootOutcome {
        if self.cancelled {
            RootOutcome::Cancelled
        } else if self.errors.is_empty() {
            RootOutcome::Processed
        } else {
            RootOutcome::Failed
        }
    }
}
