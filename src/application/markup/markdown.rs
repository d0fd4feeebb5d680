use comrak::{
    Arena,
    nodes::{AstNode, NodeValue},
    options::Options,
    parse_document,
};

use super::tree::{DocumentParser, DocumentTree, Node, NodeKind};
use crate::domain::location::SourceRange;

/// CommonMark + GFM parser backed by comrak.
pub struct ComrakParser {
    options: Options<'static>,
}

impl ComrakParser {
    pub fn new() -> Self {
        Self {
            options: default_options(),
        }
    }
}

impl Default for ComrakParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for ComrakParser {
    fn parse(&self, text: &str) -> DocumentTree {
        let arena = Arena::new();
        let root = parse_document(&arena, text, &self.options);
        DocumentTree::new(convert_node(root))
    }
}

pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();
    configure_extensions(&mut options);
    options
}

// Dollar math stays off: every `$` that survives reformatting is prose.
fn configure_extensions(options: &mut Options<'static>) {
    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.multiline_block_quotes = true;
    ext.alerts = true;
    ext.math_dollars = false;
    ext.math_code = false;
    ext.underline = true;
    ext.subscript = true;
}

fn convert_node<'a>(node: &'a AstNode<'a>) -> Node {
    let (kind, range) = {
        let data = node.data.borrow();
        let start = data.sourcepos.start;
        let end = data.sourcepos.end;
        let range = SourceRange::from_coords(start.line, start.column, end.line, end.column);
        let kind = match &data.value {
            NodeValue::CodeBlock(block) => NodeKind::CodeBlock {
                info: block.info.trim().to_string(),
                literal: block.literal.clone(),
            },
            NodeValue::Code(code) => NodeKind::InlineCode {
                literal: code.literal.clone(),
            },
            NodeValue::Image(link) => NodeKind::Image {
                source: link.url.clone(),
                title: link.title.clone(),
            },
            NodeValue::Text(text) => NodeKind::Text {
                literal: text.to_string(),
            },
            NodeValue::Heading(heading) => NodeKind::Heading {
                level: heading.level,
            },
            NodeValue::SoftBreak | NodeValue::LineBreak => NodeKind::Break,
            _ if node.first_child().is_some() => NodeKind::Container,
            _ => NodeKind::Other,
        };
        (kind, range)
    };

    let mut children = Vec::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        children.push(convert_node(next));
        child = next.next_sibling();
    }

    Node::new(kind, range).with_children(children)
}
