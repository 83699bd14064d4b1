//! Image preprocessing filters for text recognition
//!
//! Label text on packaging is small, glossy and low-contrast. These filters
//! binarize and upscale container crops before they reach the OCR engine.

use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use tracing::debug;

/// Regions smaller than this on either side are scaled up to reach it
pub const MIN_RECOGNITION_DIMENSION: u32 = 100;
/// Scale factor applied to regions that are already large enough
pub const RECOGNITION_UPSCALE: f64 = 1.2;

/// Sigma equivalent to a 3x3 gaussian kernel
const LIGHT_BLUR_SIGMA: f32 = 0.8;
/// Sigma equivalent to an 11x11 gaussian kernel
const THRESHOLD_BLOCK_SIGMA: f32 = 2.0;
const THRESHOLD_OFFSET: f32 = 2.0;
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_GRID: u32 = 8;

/// Full preprocessing chain run before recognition:
/// grayscale, light blur, CLAHE, adaptive threshold, then upscale
pub fn prepare_for_recognition(image: &RgbImage) -> GrayImage {
    let gray = to_grayscale(image);
    let blurred = gaussian_blur_f32(&gray, LIGHT_BLUR_SIGMA);
    let enhanced = apply_clahe(&blurred, CLAHE_CLIP_LIMIT, CLAHE_GRID);
    let binary = adaptive_threshold(&enhanced, THRESHOLD_BLOCK_SIGMA, THRESHOLD_OFFSET);
    let result = upscale_for_recognition(&binary);

    debug!(
        "Recognition preprocessing {}x{} -> {}x{}",
        image.width(),
        image.height(),
        result.width(),
        result.height()
    );

    result
}

/// Convert RGB to grayscale with standard luminance weights
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let value = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8;
        gray.put_pixel(x, y, Luma([value]));
    }

    gray
}

/// Contrast limited adaptive histogram equalization.
/// `grid` tiles per side; each tile histogram is clipped at
/// `clip_limit` times the uniform bin height before equalization.
pub fn apply_clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = grid.clamp(1, width);
    let tiles_y = grid.clamp(1, height);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let y0 = ty * height / tiles_y;
        let y1 = (ty + 1) * height / tiles_y;
        for tx in 0..tiles_x {
            let x0 = tx * width / tiles_x;
            let x1 = (tx + 1) * width / tiles_x;

            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[image.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts.push(clipped_equalization(&mut histogram, count, clip_limit));
        }
    }

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;
    let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    let mut result = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let value = pixel.0[0] as usize;

        // Position relative to tile centers
        let gx = ((x as f32 + 0.5) / tile_w - 0.5).max(0.0);
        let gy = ((y as f32 + 0.5) / tile_h - 0.5).max(0.0);
        let tx0 = (gx.floor() as u32).min(tiles_x - 1);
        let ty0 = (gy.floor() as u32).min(tiles_y - 1);
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let top = lut(tx0, ty0)[value] as f32 * (1.0 - fx) + lut(tx1, ty0)[value] as f32 * fx;
        let bottom = lut(tx0, ty1)[value] as f32 * (1.0 - fx) + lut(tx1, ty1)[value] as f32 * fx;
        let mapped = top * (1.0 - fy) + bottom * fy;

        result.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
    }

    result
}

/// Clip a tile histogram, spread the excess evenly, and build the CDF lookup table
fn clipped_equalization(histogram: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if count == 0 {
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let bonus = excess / 256;
    let remainder = excess % 256;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += bonus + u32::from((i as u32) < remainder);
    }

    let mut cdf = 0u64;
    for (i, bin) in histogram.iter().enumerate() {
        cdf += *bin as u64;
        lut[i] = ((cdf * 255) / count as u64).min(255) as u8;
    }

    lut
}

/// Binarize against a gaussian-weighted local mean: a pixel turns white when
/// it is brighter than the neighbourhood mean minus `offset`
pub fn adaptive_threshold(image: &GrayImage, sigma: f32, offset: f32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let local_mean = gaussian_blur_f32(image, sigma);
    let mut result = GrayImage::new(image.width(), image.height());

    for (x, y, pixel) in image.enumerate_pixels() {
        let threshold = local_mean.get_pixel(x, y).0[0] as f32 - offset;
        let value = if pixel.0[0] as f32 > threshold { 255 } else { 0 };
        result.put_pixel(x, y, Luma([value]));
    }

    result
}

/// Remove speckle noise with a 3x3 median
pub fn denoise(image: &GrayImage) -> GrayImage {
    median_filter(image, 1, 1)
}

/// Sharpen with the 3x3 kernel [-1 -1 -1; -1 9 -1; -1 -1 -1].
/// Border pixels are copied unchanged.
pub fn sharpen(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut result = image.clone();
    if width < 3 || height < 3 {
        return result;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sum = 0.0f32;
            for dy in 0..3 {
                for dx in 0..3 {
                    let value = image.get_pixel(x + dx - 1, y + dy - 1).0[0] as f32;
                    sum += if dx == 1 && dy == 1 { 9.0 * value } else { -value };
                }
            }
            result.put_pixel(x, y, Luma([sum.clamp(0.0, 255.0) as u8]));
        }
    }

    result
}

/// Scale small regions up to at least 100px per side, enlarge the rest by 1.2x
pub fn upscale_for_recognition(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let min_dim = MIN_RECOGNITION_DIMENSION as f64;
    let scale = if width < MIN_RECOGNITION_DIMENSION || height < MIN_RECOGNITION_DIMENSION {
        (min_dim / height as f64).max(min_dim / width as f64)
    } else {
        RECOGNITION_UPSCALE
    };

    let new_width = ((width as f64 * scale) as u32).max(1);
    let new_height = ((height as f64 * scale) as u32).max(1);

    image::imageops::resize(image, new_width, new_height, FilterType::CatmullRom)
}
