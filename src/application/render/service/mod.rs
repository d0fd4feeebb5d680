//! Concrete render collaborators: the CLI math renderer and image decoding.

mod decode;
mod math;

pub(crate) use decode::decode_image;
pub use decode::PngRoundTrip;
pub use math::{CliMathRenderer, MathRenderError, UnavailableMathRenderer};
