//! Image preparation before OCR: decode, grayscale, binarise, re-encode.
//!
//! Tesseract's own thresholding is tuned for scanned pages. Phone photos of
//! thermal receipts have faded print and lighting gradients, and a global
//! Otsu threshold computed on the grayscale image recovers noticeably more
//! digits. The output is always PNG so the engine sees one lossless format
//! regardless of what was uploaded.

use crate::config::OcrSettings;
use crate::error::RecognitionError;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Decode `bytes` and produce the PNG handed to the OCR engine.
pub fn prepare_for_ocr(bytes: &[u8], settings: &OcrSettings) -> Result<Vec<u8>, RecognitionError> {
    let img = image::load_from_memory(bytes).map_err(|e| RecognitionError::Decode(e.to_string()))?;
    debug!("Decoded {}x{} image for OCR", img.width(), img.height());

    let prepared = if settings.binarize {
        let gray = img.to_luma8();
        let threshold = settings
            .threshold
            .unwrap_or_else(|| otsu_threshold(&histogram(&gray)));
        debug!("Binarising at threshold {}", threshold);
        DynamicImage::ImageLuma8(binarize(gray, threshold))
    } else {
        img
    };

    let mut buf = Vec::new();
    prepared
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| RecognitionError::Io(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

/// Luminance histogram.
pub fn histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    hist
}

/// Otsu's method: the threshold maximising between-class variance.
pub fn otsu_threshold(hist: &[u64; 256]) -> u8 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 127;
    }
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0f64;
    let mut best = 0u8;
    let mut best_var = -1f64;

    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let var = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if var > best_var {
            best_var = var;
            best = t as u8;
        }
    }
    best
}

/// Pixels above `threshold` become white, the rest black.
pub fn binarize(mut img: GrayImage, threshold: u8) -> GrayImage {
    for p in img.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
    img
}
