use std::collections::BTreeMap;

use serde::Serialize;

use super::tree::{DocumentTree, Node, NodeKind};
use crate::domain::{entries::MathEntry, location::SourceRange};

/// One heading of the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocItem {
    /// Heading level, starting from 1.
    pub level: u8,
    pub range: SourceRange,
    pub plain_text: String,
}

impl TocItem {
    /// Markdown outline line: three spaces of indent per level below the
    /// first, then the heading marker.
    pub fn markdown(&self) -> String {
        let depth = usize::from(self.level.max(1));
        format!(
            "{}{} {}",
            "   ".repeat(depth - 1),
            "#".repeat(depth),
            self.plain_text
        )
    }
}

/// Collect every heading in document order. Inline math placeholders inside
/// headings are shown as their `$…$` source.
pub fn table_of_contents(
    tree: &DocumentTree,
    math: &BTreeMap<SourceRange, MathEntry>,
) -> Vec<TocItem> {
    let mut items = Vec::new();
    tree.walk(&mut |node| {
        if let NodeKind::Heading { level } = node.kind {
            items.push(TocItem {
                level,
                range: node.range,
                plain_text: heading_text(node, math),
            });
        }
    });
    items
}

fn heading_text(heading: &Node, math: &BTreeMap<SourceRange, MathEntry>) -> String {
    let mut buffer = String::new();
    for child in &heading.children {
        child.walk(&mut |node| match &node.kind {
            NodeKind::InlineCode { literal } => match math.get(&node.range) {
                Some(entry) => {
                    buffer.push('$');
                    buffer.push_str(&entry.latex);
                    buffer.push('$');
                }
                None => buffer.push_str(literal),
            },
            NodeKind::Text { literal } => buffer.push_str(literal),
            NodeKind::Break => buffer.push(' '),
            _ => {}
        });
    }
    buffer.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_line_indents_by_level() {
        let item = TocItem {
            level: 3,
            range: SourceRange::from_coords(4, 1, 4, 12),
            plain_text: "Results".into(),
        };
        assert_eq!(item.markdown(), "      ### Results");
    }

    #[test]
    fn first_level_has_no_indent() {
        let item = TocItem {
            level: 1,
            range: SourceRange::from_coords(1, 1, 1, 7),
            plain_text: "Intro".into(),
        };
        assert_eq!(item.markdown(), "# Intro");
    }
}
