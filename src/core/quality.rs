use crate::common::config::QualityConfig;
use image::GrayImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub sharpness: f64,
    pub brightness: f64,
    pub passed: bool,
}

/// Variance of the 4-neighbour Laplacian over the interior pixels.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            count += 1.0;
        }
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

pub fn mean_brightness(gray: &GrayImage) -> f64 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64
}

/// Sharpness floor plus a brightness window for stored face crops.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: &QualityConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn assess(&self, crop: &GrayImage) -> QualityReport {
        let sharpness = laplacian_variance(crop);
        let brightness = mean_brightness(crop);
        let passed = sharpness >= self.config.quality_min_sharpness
            && brightness >= self.config.quality_min_brightness
            && brightness <= self.config.quality_max_brightness;
        QualityReport { sharpness, brightness, passed }
    }
}
