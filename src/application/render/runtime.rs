use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::domain::{
    error::JobError,
    location::{LocationIndex, SourceRange},
    types::DocumentId,
};

/// Per-document state reachable from render jobs.
#[derive(Debug, Default)]
struct DocumentSlot {
    index: LocationIndex,
    errors: HashMap<SourceRange, JobError>,
}

/// Registry through which asynchronous job results find their document.
///
/// Jobs and completion gates hold a registry handle plus a [`DocumentId`],
/// never the document itself; dropping the document's [`Registration`]
/// removes its slot so late results are discarded.
#[derive(Default, Clone)]
pub struct DocumentRegistry {
    slots: Arc<DashMap<DocumentId, DocumentSlot>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Register a document and obtain the guard that keeps it registered.
    pub fn register(&self, id: DocumentId, index: LocationIndex) -> Registration {
        self.slots.insert(
            id,
            DocumentSlot {
                index,
                errors: HashMap::new(),
            },
        );
        Registration {
            id,
            slots: Arc::clone(&self.slots),
        }
    }

    pub fn is_registered(&self, id: DocumentId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Record the outcome of one job: a failure sets the location's error,
    /// a success clears any earlier one. Returns `false` when the result was
    /// discarded.
    pub fn record(&self, id: DocumentId, location: &str, error: Option<JobError>) -> bool {
        let Some(mut slot) = self.slots.get_mut(&id) else {
            debug!(
                target = "application::render::runtime",
                document = %id,
                location,
                "Discarding result for unregistered document"
            );
            return false;
        };

        let Some(range) = slot.index.lookup(location) else {
            warn!(
                target = "application::render::runtime",
                document = %id,
                location,
                "Discarding result for unknown location"
            );
            return false;
        };

        match error {
            Some(error) => {
                slot.errors.insert(range, error);
            }
            None => {
                slot.errors.remove(&range);
            }
        }
        true
    }

    pub fn error(&self, id: DocumentId, range: &SourceRange) -> Option<JobError> {
        self.slots.get(&id)?.errors.get(range).cloned()
    }

    /// Snapshot of a document's error table in document order.
    pub fn errors(&self, id: DocumentId) -> Vec<(SourceRange, JobError)> {
        let Some(slot) = self.slots.get(&id) else {
            return Vec::new();
        };
        let mut errors: Vec<(SourceRange, JobError)> = slot
            .errors
            .iter()
            .map(|(range, error)| (*range, error.clone()))
            .collect();
        errors.sort_by_key(|(range, _)| *range);
        errors
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Keeps a document registered until dropped.
pub struct Registration {
    id: DocumentId,
    slots: Arc<DashMap<DocumentId, DocumentSlot>>,
}

impl Registration {
    pub fn id(&self) -> DocumentId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.slots.remove(&self.id);
    }
}
