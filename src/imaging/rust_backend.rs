//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Dimensions | `image::image_dimensions` (header only) |
//! | Animation check | `GifDecoder` frames, `PngDecoder::is_apng`, `WebPDecoder::has_animation` |
//! | Resize | `image::imageops` with `Lanczos3` filter |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Encode → native | `JpegEncoder` with quality, otherwise `DynamicImage::write_to` |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{calculate_fill_dimensions, center_crop_offset, target_dimensions};
use super::params::{FillMode, OutputFormat, ResizeParams};
use crate::node::ImageInfo;
use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Extensions whose decoders are compiled in.
const IMAGE_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

/// Whether `path` has an extension this backend can decode.
pub fn is_supported_image(path: &Path) -> bool {
    format_of(path).is_some()
}

/// Mime type for a supported image path.
pub fn mime_type(path: &Path) -> Option<&'static str> {
    format_of(path).map(|f| f.to_mime_type())
}

fn format_of(path: &Path) -> Option<ImageFormat> {
    let ext = path.extension()?.to_str()?;
    IMAGE_CANDIDATES
        .iter()
        .find(|(candidate, fmt)| ext.eq_ignore_ascii_case(candidate) && fmt.reading_enabled())
        .map(|(_, fmt)| *fmt)
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

fn processing(path: &Path, what: &str, e: impl std::fmt::Display) -> BackendError {
    BackendError::ProcessingFailed(format!("Failed to {what} {}: {e}", path.display()))
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| processing(path, "decode", e))
}

fn is_animated(path: &Path) -> Result<bool, BackendError> {
    let reader =
        || -> Result<BufReader<File>, BackendError> { Ok(BufReader::new(File::open(path)?)) };
    match format_of(path) {
        Some(ImageFormat::Gif) => {
            let decoder = GifDecoder::new(reader()?).map_err(|e| processing(path, "read", e))?;
            Ok(decoder.into_frames().take(2).count() > 1)
        }
        Some(ImageFormat::Png) => {
            let decoder = PngDecoder::new(reader()?).map_err(|e| processing(path, "read", e))?;
            decoder.is_apng().map_err(|e| processing(path, "read", e))
        }
        Some(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(reader()?).map_err(|e| processing(path, "read", e))?;
            Ok(decoder.has_animation())
        }
        _ => Ok(false),
    }
}

/// Apply the fill mode; the result has exactly the dimensions
/// [`target_dimensions`] reports.
fn apply_fill(img: DynamicImage, params: &ResizeParams) -> DynamicImage {
    let source = (img.width(), img.height());
    let (width, height) = target_dimensions(source, (params.width, params.height), params.fill);
    match params.fill {
        FillMode::NoResize => img,
        FillMode::Fit | FillMode::Transform => {
            if (width, height) == source {
                img
            } else {
                img.resize_exact(width, height, FilterType::Lanczos3)
            }
        }
        FillMode::Cover => {
            let (fill_w, fill_h) = calculate_fill_dimensions(source, (width, height));
            let filled = img.resize_exact(fill_w, fill_h, FilterType::Lanczos3);
            let (x, y) = center_crop_offset((fill_w, fill_h), (width, height));
            filled.crop_imm(x, y, width, height)
        }
    }
}

impl RustBackend {
    fn save(img: &DynamicImage, params: &ResizeParams) -> Result<(), BackendError> {
        let writer = BufWriter::new(File::create(&params.output)?);
        let output = &params.output;
        match params.format {
            OutputFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(writer))
                .map_err(|e| processing(output, "encode WebP", e)),
            OutputFormat::Native => {
                let format = format_of(&params.source).ok_or_else(|| {
                    BackendError::ProcessingFailed(format!(
                        "Unsupported output format: {}",
                        params.source.display()
                    ))
                })?;
                if format == ImageFormat::Jpeg {
                    DynamicImage::ImageRgb8(img.to_rgb8())
                        .write_with_encoder(JpegEncoder::new_with_quality(
                            writer,
                            params.quality.value(),
                        ))
                        .map_err(|e| processing(output, "encode JPEG", e))
                } else {
                    let mut writer = writer;
                    img.write_to(&mut writer, format)
                        .map_err(|e| processing(output, "encode", e))
                }
            }
        }
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<ImageInfo, BackendError> {
        let (width, height) =
            image::image_dimensions(path).map_err(|e| processing(path, "read dimensions of", e))?;
        Ok(ImageInfo {
            width,
            height,
            is_animated: is_animated(path)?,
        })
    }

    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
        let img = load_image(&params.source)?;
        let resized = apply_fill(img, params);
        Self::save(&resized, params)?;
        Ok(Dimensions {
            width: resized.width(),
            height: resized.height(),
        })
    }
}
