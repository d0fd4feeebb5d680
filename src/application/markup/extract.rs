use std::collections::{BTreeMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use super::{
    placeholder::PlaceholderTable,
    tree::{DocumentTree, NodeKind},
};
use crate::domain::{
    entries::{ImageEntry, ImageReference, MathEntry, MathStyle},
    error::ConsistencyError,
    location::{LocationIndex, SourceRange},
};

const MATH_LANGUAGE: &str = "math";

/// Range-keyed results of extraction. Map iteration follows document order.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub math: BTreeMap<SourceRange, MathEntry>,
    pub images: BTreeMap<SourceRange, ImageEntry>,
    pub index: LocationIndex,
}

impl Extraction {
    pub fn job_count(&self) -> usize {
        self.math.len() + self.images.len()
    }
}

/// Collects math blocks, placeholder tokens and image references from a
/// parsed tree in one pass, then reunites placeholders with their source.
#[derive(Debug, Default)]
pub struct Extractor {
    blocks: Vec<MathEntry>,
    pending: Vec<(SourceRange, Uuid)>,
    images: Vec<ImageEntry>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit(&mut self, tree: &DocumentTree) {
        tree.walk(&mut |node| match &node.kind {
            NodeKind::CodeBlock { literal, .. } if node.kind.language() == Some(MATH_LANGUAGE) => {
                self.blocks.push(MathEntry {
                    range: node.range,
                    latex: literal.trim().to_string(),
                    style: MathStyle::Display,
                });
            }
            NodeKind::InlineCode { literal } => {
                if let Ok(id) = Uuid::parse_str(literal) {
                    self.pending.push((node.range, id));
                }
            }
            NodeKind::Image { source, .. } if !source.trim().is_empty() => {
                self.images.push(ImageEntry {
                    range: node.range,
                    reference: ImageReference::classify(source.trim()),
                });
            }
            _ => {}
        });
    }

    /// Resolve every pending placeholder against `placeholders`.
    ///
    /// The table must be fully drained afterwards; any residue means the
    /// parser lost inline code that the reformatted text contained.
    pub fn convert(
        self,
        mut placeholders: PlaceholderTable,
    ) -> Result<Extraction, ConsistencyError> {
        let total = placeholders.len();
        let mut extraction = Extraction::default();
        let mut consumed = HashSet::new();

        for (range, id) in self.pending {
            match placeholders.take(&id) {
                Some(entry) => {
                    consumed.insert(id);
                    insert_math(
                        &mut extraction,
                        MathEntry {
                            range,
                            latex: entry.latex,
                            style: MathStyle::Inline,
                        },
                    )?;
                }
                None if consumed.contains(&id) => {
                    return Err(ConsistencyError::Duplicated { id });
                }
                None => {
                    debug!(
                        target = "application::markup::extract",
                        range = %range,
                        "Inline code looks like a placeholder but was never minted; keeping it as code"
                    );
                }
            }
        }

        if !placeholders.is_empty() {
            return Err(ConsistencyError::Unresolved {
                missing: placeholders.len(),
                total,
                sources: placeholders.remaining_sources(),
            });
        }

        for entry in self.blocks {
            insert_math(&mut extraction, entry)?;
        }
        for entry in self.images {
            if !extraction.index.insert(entry.range) {
                return Err(ConsistencyError::LocationCollision { range: entry.range });
            }
            extraction.images.insert(entry.range, entry);
        }

        Ok(extraction)
    }
}

fn insert_math(extraction: &mut Extraction, entry: MathEntry) -> Result<(), ConsistencyError> {
    if !extraction.index.insert(entry.range) {
        return Err(ConsistencyError::LocationCollision { range: entry.range });
    }
    extraction.math.insert(entry.range, entry);
    Ok(())
}
