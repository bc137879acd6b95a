//! Pure grayscale filters backing the variant menu.
//!
//! Every function here takes an image by reference and returns a new one;
//! the same input and parameters always produce the same pixels.

use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::definitions::Image;
use imageproc::distance_transform::Norm;
use imageproc::integral_image::{integral_image, sum_image_pixels};

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `tile_grid × tile_grid` grid (fewer tiles when the
/// image is smaller than the grid). Each tile gets a clipped, equalized
/// lookup table and pixels are mapped by bilinear interpolation between the
/// four nearest tile centers, which avoids visible tile seams.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let tile_w = width.div_ceil(tile_grid.min(width).max(1));
    let tile_h = height.div_ceil(tile_grid.min(height).max(1));
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y as u32 {
        for tx in 0..tiles_x as u32 {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(gray, x0, y0, x1, y1, clip_limit));
        }
    }

    let mapped = |tx: usize, ty: usize, p: usize| luts[ty * tiles_x + tx][p] as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, ax) = interpolation_axis(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = interpolation_axis(y, tile_h, tiles_y);
        let p = gray.get_pixel(x, y)[0] as usize;

        let top = mapped(tx0, ty0, p) * (1.0 - ax) + mapped(tx1, ty0, p) * ax;
        let bottom = mapped(tx0, ty1, p) * (1.0 - ax) + mapped(tx1, ty1, p) * ax;
        let v = top * (1.0 - ay) + bottom * ay;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Neighbouring tile indices and the weight of the second one for a pixel
/// coordinate along one axis.
fn interpolation_axis(coord: u32, tile_len: u32, tiles: usize) -> (usize, usize, f32) {
    let pos = (coord as f32 + 0.5) / tile_len as f32 - 0.5;
    let max = (tiles - 1) as f32;
    let pos = pos.clamp(0.0, max);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(tiles - 1);
    (lo, hi, pos - lo as f32)
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);

    // Clip and redistribute the excess uniformly.
    let limit = ((clip_limit * area as f32 / 256.0).round() as u32).max(1);
    let mut excess = 0u32;
    for count in histogram.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let increment = excess / 256;
    let mut remainder = excess % 256;
    for count in histogram.iter_mut() {
        *count += increment;
        if remainder > 0 {
            *count += 1;
            remainder -= 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u64;
    for (i, count) in histogram.iter().enumerate() {
        cumulative += *count as u64;
        lut[i] = ((cumulative * 255 + area as u64 / 2) / area as u64).min(255) as u8;
    }
    lut
}

/// Median filter with a square window of side `2 * radius + 1`.
pub fn denoise(gray: &GrayImage, radius: u32) -> GrayImage {
    imageproc::filter::median_filter(gray, radius, radius)
}

pub fn gaussian_blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    imageproc::filter::gaussian_blur_f32(gray, sigma)
}

/// Binarize against the mean of the surrounding `(2r+1)²` block minus `offset`.
/// Blocks are clipped at the image border.
pub fn adaptive_threshold(gray: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let integral: Image<Luma<u64>> = integral_image(gray);

    GrayImage::from_fn(width, height, |x, y| {
        let left = x.saturating_sub(block_radius);
        let top = y.saturating_sub(block_radius);
        let right = x.saturating_add(block_radius).min(width - 1);
        let bottom = y.saturating_add(block_radius).min(height - 1);

        let sum = sum_image_pixels(&integral, left, top, right, bottom)[0] as i64;
        let count = ((right - left + 1) as i64) * ((bottom - top + 1) as i64);

        let p = gray.get_pixel(x, y)[0] as i64;
        if (p + offset as i64) * count > sum {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Global binarization at the Otsu level.
pub fn otsu(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    threshold(gray, level, ThresholdType::Binary)
}

/// Morphological closing with a square structuring element.
pub fn close(gray: &GrayImage, radius: u8) -> GrayImage {
    imageproc::morphology::close(gray, Norm::LInf, radius)
}
