//! Lexical segmentation of math spans.
//!
//! The scanner does not understand markdown. It recognises three delimiter
//! shapes with one ordered alternation, tried at each position in priority
//! order: `$$…$$` blocks (may span lines), `` $`…`$ `` quoted inline spans and
//! plain `$…$` inline spans. Everything else is plain text, so the emitted
//! segments always tile the input exactly.

use std::{borrow::Cow, ops::Range};

use fancy_regex::Regex;
use once_cell::sync::Lazy;
use tracing::warn;

use super::placeholder::PlaceholderTable;
use crate::domain::entries::MathStyle;

static MATH_SPANS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<block>(?s:\$\$.*?\$\$))",
        r"|(?P<quoted>(?<![`$])\$`.+?`\$(?![`$]))",
        r"|(?P<inline>(?<![`$])\$(?![`$]).+?(?<![`$])\$(?![`$]))",
    ))
    .expect("math span pattern compiles")
});

/// One classified run of the input. `raw` is the exact input slice,
/// delimiters included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    PlainText { range: Range<usize>, raw: &'a str },
    BlockMath { range: Range<usize>, raw: &'a str },
    QuotedInlineMath { range: Range<usize>, raw: &'a str },
    InlineMath { range: Range<usize>, raw: &'a str },
}

impl<'a> Segment<'a> {
    pub fn range(&self) -> Range<usize> {
        match self {
            Segment::PlainText { range, .. }
            | Segment::BlockMath { range, .. }
            | Segment::QuotedInlineMath { range, .. }
            | Segment::InlineMath { range, .. } => range.clone(),
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            Segment::PlainText { raw, .. }
            | Segment::BlockMath { raw, .. }
            | Segment::QuotedInlineMath { raw, .. }
            | Segment::InlineMath { raw, .. } => raw,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Segment::PlainText { .. } => "plain_text",
            Segment::BlockMath { .. } => "block_math",
            Segment::QuotedInlineMath { .. } => "quoted_inline_math",
            Segment::InlineMath { .. } => "inline_math",
        }
    }

    pub fn style(&self) -> Option<MathStyle> {
        match self {
            Segment::PlainText { .. } => None,
            Segment::BlockMath { .. } => Some(MathStyle::Display),
            Segment::QuotedInlineMath { .. } | Segment::InlineMath { .. } => {
                Some(MathStyle::Inline)
            }
        }
    }

    /// Math source with delimiters stripped and surrounding whitespace
    /// trimmed. `None` for plain text.
    pub fn latex(&self) -> Option<&'a str> {
        let (raw, overhead) = match self {
            Segment::PlainText { .. } => return None,
            Segment::BlockMath { raw, .. } | Segment::QuotedInlineMath { raw, .. } => (*raw, 2),
            Segment::InlineMath { raw, .. } => (*raw, 1),
        };
        raw.get(overhead..raw.len() - overhead).map(str::trim)
    }
}

/// Split `text` into left-to-right, non-overlapping segments covering every
/// byte exactly once.
pub fn segment(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for captures in MATH_SPANS.captures_iter(text) {
        let captures = match captures {
            Ok(captures) => captures,
            Err(err) => {
                warn!(
                    target = "application::markup::segment",
                    op = "segment",
                    result = "scan_aborted",
                    offset = cursor,
                    error = %err,
                    "Math span scan aborted; remaining input treated as plain text"
                );
                break;
            }
        };

        let (kind, found) = if let Some(found) = captures.name("block") {
            (SpanKind::Block, found)
        } else if let Some(found) = captures.name("quoted") {
            (SpanKind::Quoted, found)
        } else if let Some(found) = captures.name("inline") {
            (SpanKind::Inline, found)
        } else {
            continue;
        };

        let range = found.start()..found.end();
        if range.start > cursor {
            segments.push(Segment::PlainText {
                range: cursor..range.start,
                raw: &text[cursor..range.start],
            });
        }

        let raw = found.as_str();
        let segment = if raw.len() <= kind.overhead() {
            Segment::PlainText {
                range: range.clone(),
                raw,
            }
        } else {
            match kind {
                SpanKind::Block => Segment::BlockMath {
                    range: range.clone(),
                    raw,
                },
                SpanKind::Quoted => Segment::QuotedInlineMath {
                    range: range.clone(),
                    raw,
                },
                SpanKind::Inline => Segment::InlineMath {
                    range: range.clone(),
                    raw,
                },
            }
        };
        segments.push(segment);
        cursor = range.end;
    }

    if cursor < text.len() {
        segments.push(Segment::PlainText {
            range: cursor..text.len(),
            raw: &text[cursor..],
        });
    }

    segments
}

#[derive(Debug, Clone, Copy)]
enum SpanKind {
    Block,
    Quoted,
    Inline,
}

impl SpanKind {
    /// Total delimiter length; a match no longer than this carries no content.
    fn overhead(self) -> usize {
        match self {
            SpanKind::Block | SpanKind::Quoted => 4,
            SpanKind::Inline => 2,
        }
    }
}

/// Output of [`reformat`]: parser-safe text plus the placeholders it refers to.
#[derive(Debug, Clone)]
pub struct Reformatted<'a> {
    pub placeholders: PlaceholderTable,
    pub fragments: Vec<Cow<'a, str>>,
    pub blocks: usize,
}

impl Reformatted<'_> {
    pub fn text(&self) -> String {
        self.fragments.concat()
    }
}

/// Replace math spans with constructs a markdown parser keeps opaque.
///
/// Block math becomes a fenced code block tagged `math`; inline and quoted
/// inline math become a single inline-code token holding a fresh placeholder
/// identifier. Plain text passes through untouched.
pub fn reformat(text: &str) -> Reformatted<'_> {
    let mut placeholders = PlaceholderTable::new();
    let mut fragments: Vec<Cow<'_, str>> = Vec::new();
    let mut blocks = 0;

    for segment in segment(text) {
        let range = segment.range();
        match segment {
            Segment::PlainText { raw, .. } => fragments.push(Cow::Borrowed(raw)),
            Segment::BlockMath { .. } => {
                let content = segment.latex().unwrap_or_default();
                let leading_break = !at_line_start(&fragments);
                let rest = &text[range.end..];
                let trailing_break = !rest.is_empty() && !rest.starts_with(['\n', '\r']);
                fragments.push(Cow::Owned(fence_math_block(
                    content,
                    leading_break,
                    trailing_break,
                )));
                blocks += 1;
            }
            Segment::QuotedInlineMath { .. } | Segment::InlineMath { .. } => {
                let content = segment.latex().unwrap_or_default();
                let id = placeholders.mint(content, range.start);
                fragments.push(Cow::Owned(format!("`{}`", id.hyphenated())));
            }
        }
    }

    Reformatted {
        placeholders,
        fragments,
        blocks,
    }
}

fn at_line_start(fragments: &[Cow<'_, str>]) -> bool {
    fragments
        .iter()
        .rev()
        .find(|fragment| !fragment.is_empty())
        .is_none_or(|fragment| fragment.ends_with('\n'))
}

fn fence_math_block(content: &str, leading_break: bool, trailing_break: bool) -> String {
    let fence = "`".repeat(longest_backtick_run(content).max(2) + 1);
    let mut block = String::with_capacity(content.len() + fence.len() * 2 + 8);
    if leading_break {
        block.push('\n');
    }
    block.push_str(&fence);
    block.push_str("math\n");
    block.push_str(content);
    block.push('\n');
    block.push_str(&fence);
    if trailing_break {
        block.push('\n');
    }
    block
}

fn longest_backtick_run(content: &str) -> usize {
    content
        .split(|ch: char| ch != '`')
        .map(str::len)
        .max()
        .unwrap_or(0)
}
