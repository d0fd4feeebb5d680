use std::fmt;

use serde::Serialize;
use url::Url;

use super::location::SourceRange;

/// How a math span is laid out by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MathStyle {
    /// `$…$` and `` $`…`$ `` spans.
    Inline,
    /// `$$…$$` blocks.
    Display,
}

impl MathStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            MathStyle::Inline => "inline",
            MathStyle::Display => "display",
        }
    }
}

/// One math span reunited with the location the parser assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathEntry {
    pub range: SourceRange,
    pub latex: String,
    pub style: MathStyle,
}

/// Where the bytes behind an image node come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Remote(Url),
    Local(String),
}

impl ImageReference {
    /// `http`/`https` URLs are fetched; anything else is handed to the
    /// resource locator verbatim.
    pub fn classify(source: &str) -> Self {
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => ImageReference::Remote(url),
            _ => ImageReference::Local(source.to_string()),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageReference::Remote(_))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Remote(url) => f.write_str(url.as_str()),
            ImageReference::Local(name) => f.write_str(name),
        }
    }
}

/// Image reference keyed by location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub range: SourceRange,
    pub reference: ImageReference,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_and_https_as_remote() {
        assert!(ImageReference::classify("https://example.com/a.png").is_remote());
        assert!(ImageReference::classify("http://example.com/a.png").is_remote());
    }

    #[test]
    fn everything_else_is_local() {
        assert_eq!(
            ImageReference::classify("images/figure.png"),
            ImageReference::Local("images/figure.png".into())
        );
        assert_eq!(
            ImageReference::classify("file:///tmp/figure.png"),
            ImageReference::Local("file:///tmp/figure.png".into())
        );
        assert!(!ImageReference::classify("ftp://example.com/a.png").is_remote());
    }
}
