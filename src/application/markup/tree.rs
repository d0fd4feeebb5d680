use crate::domain::location::SourceRange;

/// Closed set of node shapes the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Fenced or indented code block; `info` is the full info string.
    CodeBlock { info: String, literal: String },
    InlineCode { literal: String },
    Image { source: String, title: String },
    Text { literal: String },
    Heading { level: u8 },
    /// Any structural node that may hold children (document, paragraph,
    /// list, emphasis, link, table, ...).
    Container,
    /// Soft or hard line break.
    Break,
    Other,
}

impl NodeKind {
    /// First word of a code block's info string.
    pub fn language(&self) -> Option<&str> {
        match self {
            NodeKind::CodeBlock { info, .. } => info.split_whitespace().next(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub range: SourceRange,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, range: SourceRange) -> Self {
        Self {
            kind,
            range,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Depth-first, pre-order traversal.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Concatenated inline text of the descendants, breaks folded to spaces.
    pub fn plain_text(&self) -> String {
        let mut buffer = String::new();
        for child in &self.children {
            child.walk(&mut |node| match &node.kind {
                NodeKind::Text { literal } | NodeKind::InlineCode { literal } => {
                    buffer.push_str(literal)
                }
                NodeKind::Break => buffer.push(' '),
                _ => {}
            });
        }
        buffer
    }
}

/// Owned parse tree handed over by a [`DocumentParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTree {
    pub root: Node,
}

impl DocumentTree {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        self.root.walk(visit);
    }
}

/// Structural markup parser the pipeline delegates to.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, text: &str) -> DocumentTree;
}
