use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

/// Images with either dimension under this are rejected outright.
pub const MIN_ACCEPTABLE_PX: u32 = 50;
/// Originals at or under this width keep their dimensions untouched.
pub const NO_UPSCALE_THRESHOLD_PX: u32 = 300;
/// Originals wider than this are downscaled to exactly this width.
pub const TARGET_WIDTH_PX: u32 = 800;
pub const JPEG_QUALITY: u8 = 85;

/// How many grid samples may share one color before the flat-color screen
/// rejects the image, per mille.
const FLAT_COLOR_THRESHOLD_PER_MILLE: u32 = 980;

/// Why normalization refused an image.
#[derive(Debug)]
pub enum ProcessingError {
    /// The decoder could not make sense of the bytes, or reported zero
    /// dimensions.
    UnsupportedOrCorrupt(String),
    /// Decoded fine but is too small to be a usable cover.
    TooSmall { width: u32, height: u32 },
    /// The content screen rejected the image (e.g. a flat color block).
    ContentRejected(String),
    /// Re-encoding failed.
    Encode(String),
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingError::UnsupportedOrCorrupt(e) => {
                write!(f, "unsupported or corrupt image: {e}")
            }
            ProcessingError::TooSmall { width, height } => {
                write!(f, "image too small: {width}x{height}")
            }
            ProcessingError::ContentRejected(reason) => write!(f, "content rejected: {reason}"),
            ProcessingError::Encode(e) => write!(f, "encode failed: {e}"),
        }
    }
}
impl std::error::Error for ProcessingError {}

impl ProcessingError {
    pub fn is_content_rejection(&self) -> bool {
        matches!(self, ProcessingError::ContentRejected(_))
    }
}

/// The result of a successful normalization pass: JPEG bytes plus the
/// dimensions that were actually encoded.
#[derive(Debug)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decode, optionally downscale, re-encode as JPEG. Also the authority on
/// actual pixel dimensions before an upload.
pub struct Normalizer {
    reject_flat_color: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            reject_flat_color: false,
        }
    }

    /// Enable the flat-color content screen.
    pub fn with_flat_color_screen() -> Self {
        Self {
            reject_flat_color: true,
        }
    }

    pub fn normalize(&self, bytes: &[u8], book_tag: &str) -> Result<NormalizedImage, ProcessingError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ProcessingError::UnsupportedOrCorrupt(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(ProcessingError::UnsupportedOrCorrupt(
                "decoder reported zero dimensions".to_string(),
            ));
        }
        if width < MIN_ACCEPTABLE_PX || height < MIN_ACCEPTABLE_PX {
            return Err(ProcessingError::TooSmall { width, height });
        }

        if self.reject_flat_color && is_flat_color(&decoded) {
            return Err(ProcessingError::ContentRejected(
                "image is a single flat color".to_string(),
            ));
        }

        let resized = if width <= NO_UPSCALE_THRESHOLD_PX {
            decoded
        } else if width > TARGET_WIDTH_PX {
            let target_height =
                (height as f64 * TARGET_WIDTH_PX as f64 / width as f64).round() as u32;
            tracing::debug!(
                "downscaling cover for {book_tag} from {width}x{height} to {TARGET_WIDTH_PX}x{target_height}"
            );
            decoded.resize_exact(TARGET_WIDTH_PX, target_height, FilterType::Triangle)
        } else {
            decoded
        };

        let rgb = resized.to_rgb8();
        let (out_width, out_height) = rgb.dimensions();
        let mut buffer = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
            .encode_image(&rgb)
            .map_err(|e| ProcessingError::Encode(e.to_string()))?;

        Ok(NormalizedImage {
            bytes: buffer.into_inner(),
            extension: ".jpg",
            content_type: "image/jpeg",
            width: out_width,
            height: out_height,
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode just far enough to learn the pixel dimensions.
pub fn decode_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let dims = (decoded.width(), decoded.height());
    (dims.0 > 0 && dims.1 > 0).then_some(dims)
}

/// Sample the image on a coarse grid and report whether nearly every sample
/// lands on the same color.
fn is_flat_color(image: &image::DynamicImage) -> bool {
    const GRID: u32 = 16;

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut counts = std::collections::HashMap::new();
    let mut total = 0u32;
    for gy in 0..GRID {
        for gx in 0..GRID {
            let x = gx * (width - 1) / (GRID - 1);
            let y = gy * (height - 1) / (GRID - 1);
            let pixel = rgb.get_pixel(x, y);
            // Quantize so JPEG noise around a flat color still counts as one.
            let key = (pixel[0] >> 3, pixel[1] >> 3, pixel[2] >> 3);
            *counts.entry(key).or_insert(0u32) += 1;
            total += 1;
        }
    }

    counts
        .values()
        .max()
        .is_some_and(|&max| max * 1000 >= total * FLAT_COLOR_THRESHOLD_PER_MILLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = Normalizer::new()
            .normalize(b"definitely not an image", "b1")
            .unwrap_err();
        assert!(matches!(err, ProcessingError::UnsupportedOrCorrupt(_)));
    }

    #[test]
    fn rejects_tiny_images() {
        let err = Normalizer::new()
            .normalize(&gradient_png(40, 60), "b1")
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::TooSmall {
                width: 40,
                height: 60
            }
        ));
    }

    #[test]
    fn keeps_small_originals_as_is() {
        let normalized = Normalizer::new()
            .normalize(&gradient_png(200, 300), "b1")
            .unwrap();
        assert_eq!((normalized.width, normalized.height), (200, 300));
        assert_eq!(normalized.extension, ".jpg");
        assert_eq!(normalized.content_type, "image/jpeg");
    }

    #[test]
    fn keeps_mid_size_originals_as_is() {
        let normalized = Normalizer::new()
            .normalize(&gradient_png(600, 900), "b1")
            .unwrap();
        assert_eq!((normalized.width, normalized.height), (600, 900));
    }

    #[test]
    fn downscales_wide_originals_to_target_width() {
        let normalized = Normalizer::new()
            .normalize(&gradient_png(1600, 2400), "b1")
            .unwrap();
        assert_eq!((normalized.width, normalized.height), (800, 1200));
    }

    #[test]
    fn downscale_rounds_the_height() {
        // 1000x667 -> 800x533.6 -> 800x534.
        let normalized = Normalizer::new()
            .normalize(&gradient_png(1000, 667), "b1")
            .unwrap();
        assert_eq!((normalized.width, normalized.height), (800, 534));
    }

    #[test]
    fn output_decodes_as_jpeg() {
        let normalized = Normalizer::new()
            .normalize(&gradient_png(200, 300), "b1")
            .unwrap();
        let reloaded = image::load_from_memory(&normalized.bytes).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (200, 300));
    }

    #[test]
    fn flat_color_screen_is_opt_in() {
        let flat = png_bytes(200, 300, [200, 10, 10]);
        assert!(Normalizer::new().normalize(&flat, "b1").is_ok());

        let err = Normalizer::with_flat_color_screen()
            .normalize(&flat, "b1")
            .unwrap_err();
        assert!(err.is_content_rejection());

        assert!(
            Normalizer::with_flat_color_screen()
                .normalize(&gradient_png(200, 300), "b1")
                .is_ok()
        );
    }

    #[test]
    fn decode_dimensions_reports_pixels() {
        assert_eq!(decode_dimensions(&gradient_png(123, 45)), Some((123, 45)));
        assert_eq!(decode_dimensions(b"nope"), None);
    }
}
