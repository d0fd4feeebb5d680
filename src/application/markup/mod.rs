//! Math-aware markup handling: segmentation, placeholder round trip through
//! an external markdown parser, and extraction of renderable entries.

mod extract;
mod markdown;
mod placeholder;
mod segment;
mod toc;
mod tree;

pub use extract::{Extraction, Extractor};
pub use markdown::ComrakParser;
pub use placeholder::{PlaceholderEntry, PlaceholderTable};
pub use segment::{Reformatted, Segment, reformat, segment};
pub use toc::{TocItem, table_of_contents};
pub use tree::{DocumentParser, DocumentTree, Node, NodeKind};
