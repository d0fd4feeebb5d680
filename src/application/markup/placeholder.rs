use std::collections::HashMap;

use uuid::Uuid;

/// Math source text parked behind an inline-code placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderEntry {
    pub latex: String,
    /// Byte offset of the original span, kept for diagnostics.
    pub offset: usize,
}

/// Identifiers minted during reformatting, each standing for one inline math
/// span until the extractor claims it.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderTable {
    entries: HashMap<Uuid, PlaceholderEntry>,
}

impl PlaceholderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh identifier for `latex` and remember it.
    pub fn mint(&mut self, latex: impl Into<String>, offset: usize) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(
            id,
            PlaceholderEntry {
                latex: latex.into(),
                offset,
            },
        );
        id
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove and return the entry for `id`; a second call yields `None`.
    pub fn take(&mut self, id: &Uuid) -> Option<PlaceholderEntry> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sources still waiting to be claimed, in original document order.
    pub fn remaining_sources(&self) -> Vec<String> {
        let mut pending: Vec<&PlaceholderEntry> = self.entries.values().collect();
        pending.sort_by_key(|entry| entry.offset);
        pending.into_iter().map(|entry| entry.latex.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_exactly_once() {
        let mut table = PlaceholderTable::new();
        let id = table.mint("x^2", 0);
        assert!(table.contains(&id));
        assert_eq!(table.take(&id).map(|entry| entry.latex), Some("x^2".into()));
        assert!(table.take(&id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn remaining_sources_follow_document_order() {
        let mut table = PlaceholderTable::new();
        table.mint("b", 20);
        table.mint("a", 3);
        assert_eq!(table.remaining_sources(), vec!["a", "b"]);
    }
}
