use image::{DynamicImage, GrayImage};
use ocrmode_core::{Transform, VariantSpec};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::filters;

/// Inputs larger than this on either side are scaled down before any variant
/// is produced (recognizers work best around 300 DPI / ~2000 px).
pub const MAX_DIMENSION: u32 = 2800;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("Variant '{variant}' received an empty image")]
    EmptyInput { variant: String },
    #[error("Variant '{variant}' has invalid parameters: {message}")]
    InvalidParameter { variant: String, message: String },
    #[error("Variant '{variant}' needs at least {needed}px per side, image is {width}x{height}")]
    ImageTooSmall { variant: String, needed: u32, width: u32, height: u32 },
}

/// File extensions accepted as receipt images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Outcome of running the whole menu over one image, in menu order.
#[derive(Debug)]
pub struct GeneratedVariants {
    pub entries: Vec<(String, Result<GrayImage, TransformError>)>,
}

pub fn load_image(path: &Path) -> Result<DynamicImage, PreprocessError> {
    Ok(image::open(path)?)
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …).
pub fn load_image_from_bytes(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    Ok(image::load_from_memory(data)?)
}

/// Reject zero-size inputs and scale very large ones down.
pub fn prepare_input(img: DynamicImage) -> Result<DynamicImage, PreprocessError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(PreprocessError::EmptyImage { width: img.width(), height: img.height() });
    }
    if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        Ok(img.resize(MAX_DIMENSION, MAX_DIMENSION, image::imageops::FilterType::Lanczos3))
    } else {
        Ok(img)
    }
}

/// Produce one grayscale image for a menu entry: grayscale conversion, then
/// each step in order.
pub fn apply_variant(img: &DynamicImage, variant: &VariantSpec) -> Result<GrayImage, TransformError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(TransformError::EmptyInput { variant: variant.name.clone() });
    }
    let mut gray = img.to_luma8();
    for step in &variant.steps {
        step.validate().map_err(|e| TransformError::InvalidParameter {
            variant: variant.name.clone(),
            message: e.to_string(),
        })?;
        let needed = min_side(step).ok_or_else(|| TransformError::InvalidParameter {
            variant: variant.name.clone(),
            message: "window radius too large".to_string(),
        })?;
        if gray.width() < needed || gray.height() < needed {
            return Err(TransformError::ImageTooSmall {
                variant: variant.name.clone(),
                needed,
                width: gray.width(),
                height: gray.height(),
            });
        }
        gray = apply_step(&gray, step);
    }
    Ok(gray)
}

/// Smallest image side on which a windowed step is meaningful, `None` when
/// the window width does not fit in a `u32`.
fn min_side(step: &Transform) -> Option<u32> {
    let window = |radius: u32| radius.checked_mul(2)?.checked_add(1);
    match *step {
        Transform::Denoise { radius } => window(radius),
        Transform::AdaptiveThreshold { block_radius, .. } => window(block_radius),
        Transform::Close { radius } => window(radius as u32),
        Transform::Clahe { .. } | Transform::GaussianBlur { .. } | Transform::Otsu => Some(1),
    }
}

fn apply_step(gray: &GrayImage, step: &Transform) -> GrayImage {
    match *step {
        Transform::Clahe { clip_limit, tile_grid } => filters::clahe(gray, clip_limit, tile_grid),
        Transform::Denoise { radius } => filters::denoise(gray, radius),
        Transform::GaussianBlur { sigma } => filters::gaussian_blur(gray, sigma),
        Transform::AdaptiveThreshold { block_radius, offset } => {
            filters::adaptive_threshold(gray, block_radius, offset)
        }
        Transform::Otsu => filters::otsu(gray),
        Transform::Close { radius } => filters::close(gray, radius),
    }
}

/// Run every menu entry over `img`. Entries that fail are kept as errors so
/// callers can skip them without losing menu positions.
pub fn generate_variants(
    img: &DynamicImage,
    menu: &[VariantSpec],
) -> Result<GeneratedVariants, PreprocessError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(PreprocessError::EmptyImage { width: img.width(), height: img.height() });
    }
    let entries = menu
        .iter()
        .map(|variant| {
            let outcome = apply_variant(img, variant);
            if let Err(e) = &outcome {
                tracing::warn!(variant = %variant.name, error = %e, "Skipping variant");
            }
            (variant.name.clone(), outcome)
        })
        .collect();
    Ok(GeneratedVariants { entries })
}

pub fn encode_as_png(img: &GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
