use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, ImageReader, Limits};
#[cfg(feature = "svg")]
use resvg::{tiny_skia::Pixmap, usvg};
use tracing::warn;

use crate::application::render::types::BitmapPostProcess;
use crate::domain::{bitmap::Bitmap, error::JobError};

/// Upper bound on one decoded RGBA buffer when no cache budget applies.
pub const DEFAULT_DECODE_LIMIT: usize = 100 * 1024 * 1024;

/// Decode fetched or loaded bytes into a bitmap. Raster formats are sniffed
/// by `image`; SVG documents are rasterised at their intrinsic size.
///
/// Images whose decoded RGBA buffer would exceed `max_bytes` are rejected
/// before any pixel memory is allocated.
pub(crate) fn decode_image(bytes: &[u8], max_bytes: usize) -> Result<Bitmap, JobError> {
    if looks_like_svg(bytes) {
        return rasterize_svg(bytes, 1.0, max_bytes);
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| JobError::decode(err.to_string()))?;
    if reader.format().is_none() {
        return Err(JobError::decode("unrecognised image format"));
    }
    let mut limits = Limits::default();
    limits.max_alloc = Some(max_bytes as u64);
    reader.limits(limits);
    let image = reader
        .decode()
        .map_err(|err| JobError::decode(err.to_string()))?;
    Ok(Bitmap::from_dynamic(image))
}

pub(crate) fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

#[cfg(feature = "svg")]
pub(crate) fn rasterize_svg(
    data: &[u8],
    scale: f32,
    max_bytes: usize,
) -> Result<Bitmap, JobError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|err| JobError::decode(format!("invalid SVG: {err}")))?;
    let size = tree.size().to_int_size();
    let scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };
    let width = (size.width() as f32 * scale).ceil() as u32;
    let height = (size.height() as f32 * scale).ceil() as u32;
    check_raster_size(width, height, max_bytes)?;

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| JobError::decode(format!("SVG has invalid size {width}x{height}")))?;
    let transform = resvg::tiny_skia::Transform::from_scale(scale, scale);
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    let mut rgba = pixmap.data().to_vec();
    unpremultiply_rgba(&mut rgba);
    let buffer = ImageBuffer::from_raw(width, height, rgba)
        .ok_or_else(|| JobError::decode("SVG raster buffer size mismatch"))?;
    Ok(Bitmap::new(buffer))
}

#[cfg(not(feature = "svg"))]
pub(crate) fn rasterize_svg(
    _data: &[u8],
    _scale: f32,
    _max_bytes: usize,
) -> Result<Bitmap, JobError> {
    warn!(
        target = "application::render::decode",
        op = "rasterize_svg",
        result = "unsupported",
        "SVG support disabled; enable feature \"svg\""
    );
    Err(JobError::decode("SVG support is disabled"))
}

#[cfg(feature = "svg")]
fn check_raster_size(width: u32, height: u32, max_bytes: usize) -> Result<(), JobError> {
    let needed = u64::from(width) * u64::from(height) * 4;
    if needed > max_bytes as u64 {
        return Err(JobError::decode(format!(
            "SVG raster {width}x{height} needs {needed} bytes, limit is {max_bytes}"
        )));
    }
    Ok(())
}

#[cfg(feature = "svg")]
fn unpremultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }
        let a = alpha as u32;
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Re-encodes rendered math through PNG so the cached raster carries plain
/// straight-alpha RGBA regardless of what the renderer produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngRoundTrip;

impl BitmapPostProcess for PngRoundTrip {
    fn process(&self, bitmap: Bitmap) -> Result<Bitmap, JobError> {
        let png = bitmap.encode_png().map_err(|err| {
            warn!(
                target = "application::render::decode",
                op = "png_round_trip",
                result = "error",
                error = %err,
                "PNG re-encode failed"
            );
            JobError::render(format!("PNG re-encode failed: {err}"))
        })?;
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|err| JobError::render(format!("PNG re-decode failed: {err}")))?;
        Ok(Bitmap::from_dynamic(image))
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    #[test]
    fn decodes_png_bytes() {
        let bitmap = Bitmap::new(RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255])));
        let png = bitmap.encode_png().expect("encode");
        assert_eq!(decode_image(&png, DEFAULT_DECODE_LIMIT), Ok(bitmap));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_image(b"definitely not an image", DEFAULT_DECODE_LIMIT).expect_err("should fail");
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn sniffs_svg_documents() {
        assert!(looks_like_svg(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"));
        assert!(looks_like_svg(b"  <?xml version=\"1.0\"?>\n<svg></svg>"));
        assert!(!looks_like_svg(b"\x89PNG\r\n"));
    }

    #[cfg(feature = "svg")]
    #[test]
    fn rasterizes_svg_at_intrinsic_size() {
        let svg = br##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="3"><rect width="4" height="3" fill="#ff0000"/></svg>"##;
        let bitmap = decode_image(svg, DEFAULT_DECODE_LIMIT).expect("svg decodes");
        assert_eq!((bitmap.width(), bitmap.height()), (4, 3));
        assert_eq!(bitmap.as_image().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[cfg(feature = "svg")]
    #[test]
    fn oversized_svg_is_rejected_before_rasterising() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="100000" height="100000"/>"#;
        let err = decode_image(svg, 1024 * 1024).expect_err("too large");
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn raster_beyond_the_limit_is_a_decode_error() {
        let bitmap = Bitmap::new(RgbaImage::from_pixel(64, 64, Rgba([1, 2, 3, 255])));
        let png = bitmap.encode_png().expect("encode");
        let err = decode_image(&png, 1024).expect_err("limit exceeded");
        assert_eq!(err.kind(), "decode");
        assert!(decode_image(&png, DEFAULT_DECODE_LIMIT).is_ok());
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let bitmap = Bitmap::new(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])));
        let processed = PngRoundTrip.process(bitmap.clone()).expect("round trip");
        assert_eq!(processed, bitmap);
    }
}
