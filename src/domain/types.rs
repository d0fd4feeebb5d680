//! Identifiers shared across documents and the process-wide cache.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique identity of one loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key under which a rendered bitmap is stored in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub document: DocumentId,
    pub location: String,
}

impl RenderKey {
    pub fn new(document: DocumentId, location: impl Into<String>) -> Self {
        Self {
            document,
            location: location.into(),
        }
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.location)
    }
}
