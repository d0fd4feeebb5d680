//! Segmentation and placeholder round trip through the real markdown parser.

use std::sync::Arc;

use mathmark::application::markup::{
    ComrakParser, DocumentParser, DocumentTree, Extractor, Node, NodeKind, Segment, reformat,
    segment,
};
use mathmark::application::render::{
    HttpFetcher, HttpResponse, MathRenderer, MathRequest, RenderServices,
};
use mathmark::cache::RenderCache;
use mathmark::domain::{
    bitmap::Bitmap,
    entries::MathStyle,
    error::{ConsistencyError, DocumentError, JobError},
};
use mathmark::Engine;
use proptest::prelude::*;
use tokio::runtime::Handle;
use url::Url;

fn extract(text: &str) -> Result<mathmark::application::markup::Extraction, ConsistencyError> {
    let reformatted = reformat(text);
    let tree = ComrakParser::new().parse(&reformatted.text());
    let mut extractor = Extractor::new();
    extractor.visit(&tree);
    extractor.convert(reformatted.placeholders)
}

#[test]
fn single_inline_span_becomes_one_entry() {
    let text = "$x^2$";
    let segments = segment(text);
    assert_eq!(segments.len(), 1);
    assert!(matches!(segments[0], Segment::InlineMath { .. }));
    assert_eq!(segments[0].range(), 0..5);

    let reformatted = reformat(text);
    assert_eq!(reformatted.placeholders.len(), 1);
    assert_eq!(reformatted.text().matches('`').count(), 2);

    let extraction = extract(text).expect("lossless");
    assert_eq!(extraction.math.len(), 1);
    let entry = extraction.math.values().next().expect("entry");
    assert_eq!(entry.latex, "x^2");
    assert_eq!(entry.style, MathStyle::Inline);
}

#[test]
fn block_delimiters_win_over_inline() {
    let text = "$$ x $$ then $ y $";
    let segments = segment(text);
    let kinds: Vec<&str> = segments.iter().map(Segment::kind).collect();
    assert_eq!(kinds, vec!["block_math", "plain_text", "inline_math"]);
    assert_eq!(segments[0].as_str(), "$$ x $$");
    assert_eq!(segments[0].latex(), Some("x"));
    assert_eq!(segments[2].latex(), Some("y"));
}

#[test]
fn unterminated_span_is_plain_text() {
    let text = "costs $x^2 and nothing else";
    let segments = segment(text);
    assert!(segments
        .iter()
        .all(|segment| matches!(segment, Segment::PlainText { .. })));

    let extraction = extract(text).expect("lossless");
    assert!(extraction.math.is_empty());
}

#[test]
fn every_placeholder_comes_back_from_the_parser() {
    let text = "# Heading with $a$\n\n\
                Para $b$ and $`c`$ and `code`.\n\n\
                - item $d$\n- item ![img](pic.png)\n\n\
                > quoted $e$\n\n\
                $$\n\\int_0^1 f\n$$\n\n\
                | col | $f$ |\n|-----|-----|\n| $g$ | x |\n";
    let reformatted = reformat(text);
    let minted = reformatted.placeholders.len();
    assert_eq!(minted, 7);
    assert_eq!(reformatted.blocks, 1);

    let extraction = extract(text).expect("lossless");
    let inline = extraction
        .math
        .values()
        .filter(|entry| entry.style == MathStyle::Inline)
        .count();
    assert_eq!(inline, minted);
    assert_eq!(extraction.math.len(), minted + 1);
    assert_eq!(extraction.images.len(), 1);
    assert_eq!(extraction.index.len(), minted + 2);
}

#[test]
fn dollars_touching_backticks_stay_code() {
    let text = "Use `$not math$` literally.";
    assert_eq!(segment(text).len(), 1);
    let extraction = extract(text).expect("lossless");
    assert!(extraction.math.is_empty());
}

proptest! {
    #[test]
    fn segments_tile_the_input(text in "[a-z $`\\\\\n]{0,64}") {
        let segments = segment(&text);
        let mut cursor = 0;
        for segment in &segments {
            let range = segment.range();
            prop_assert_eq!(range.start, cursor);
            prop_assert!(range.end > range.start);
            prop_assert_eq!(segment.as_str(), &text[range.clone()]);
            cursor = range.end;
        }
        prop_assert_eq!(cursor, text.len());
    }

    #[test]
    fn extraction_is_lossless_for_prose_with_math(
        words in proptest::collection::vec("[a-z]{1,6}", 1..12),
        math in proptest::collection::vec("[a-z0-9+^]{1,6}", 0..6),
    ) {
        let mut text = String::new();
        for (i, word) in words.iter().enumerate() {
            text.push_str(word);
            text.push(' ');
            if let Some(latex) = math.get(i) {
                text.push('$');
                text.push_str(latex);
                text.push_str("$ ");
            }
        }
        let expected = math.len().min(words.len());
        let extraction = extract(&text).expect("lossless");
        prop_assert_eq!(extraction.math.len(), expected);
    }
}

/// Wraps the real parser and mangles inline code nodes.
struct Mangling {
    mode: Mangle,
}

enum Mangle {
    Drop,
    Duplicate,
}

fn is_inline_code(node: &Node) -> bool {
    matches!(node.kind, NodeKind::InlineCode { .. })
}

fn mangle(node: &mut Node, mode: &Mangle) -> bool {
    if let Some(index) = node.children.iter().position(is_inline_code) {
        match mode {
            Mangle::Drop => {
                node.children.remove(index);
            }
            Mangle::Duplicate => {
                let copy = node.children[index].clone();
                node.children.push(copy);
            }
        }
        return true;
    }
    node.children.iter_mut().any(|child| mangle(child, mode))
}

impl DocumentParser for Mangling {
    fn parse(&self, text: &str) -> DocumentTree {
        let mut tree = ComrakParser::new().parse(text);
        mangle(&mut tree.root, &self.mode);
        tree
    }
}

struct Offline;

#[async_trait::async_trait]
impl HttpFetcher for Offline {
    async fn get(&self, _url: &Url) -> Result<HttpResponse, JobError> {
        Err(JobError::transport("offline"))
    }
}

struct Never;

impl MathRenderer for Never {
    fn render(&self, _request: &MathRequest) -> Result<Bitmap, JobError> {
        Err(JobError::render("unused"))
    }
}

fn engine(mode: Mangle) -> Engine {
    Engine::new(RenderServices::new(
        Arc::new(Offline),
        Arc::new(Never),
        Arc::new(RenderCache::default()),
        Handle::current(),
    ))
    .with_parser(Arc::new(Mangling { mode }))
}

#[tokio::test]
async fn dropped_placeholder_fails_the_load() {
    let err = engine(Mangle::Drop)
        .load("keep $a$ and $b$")
        .expect_err("parser lost a placeholder");
    match err {
        DocumentError::InternalConsistency(ConsistencyError::Unresolved {
            missing,
            total,
            sources,
        }) => {
            assert_eq!((missing, total), (1, 2));
            assert_eq!(sources, vec!["a".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn duplicated_placeholder_fails_the_load() {
    let err = engine(Mangle::Duplicate)
        .load("only $a$ here")
        .expect_err("parser duplicated a placeholder");
    assert!(matches!(
        err,
        DocumentError::InternalConsistency(ConsistencyError::Duplicated { .. })
    ));
}
