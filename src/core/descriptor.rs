use std::sync::OnceLock;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; 32]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

const PATCH_RADIUS: i32 = 15;
const PATTERN_EXTENT: i32 = 13;
// Rotated pattern points stay within extent * sqrt(2).
const BORDER: u32 = 20;
const PATTERN_SEED: u64 = 0x0A1C_06A7_E5EE_D001;

type TestPair = ((f32, f32), (f32, f32));

fn pattern() -> &'static [TestPair; 256] {
    static PATTERN: OnceLock<[TestPair; 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = || {
            (
                rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT) as f32,
                rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT) as f32,
            )
        };
        let mut pairs = [((0.0, 0.0), (0.0, 0.0)); 256];
        for pair in pairs.iter_mut() {
            *pair = (point(), point());
        }
        pairs
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub score: f32,
    /// Radians, from the intensity centroid.
    pub angle: f32,
}

/// FAST-9 keypoints with oriented BRIEF descriptors.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    pub max_features: usize,
    pub fast_threshold: u8,
}

impl OrbExtractor {
    pub fn new(max_features: usize, fast_threshold: u8) -> Self {
        Self { max_features, fast_threshold }
    }

    pub fn keypoints(&self, gray: &GrayImage) -> Vec<Keypoint> {
        if gray.width() <= 2 * BORDER || gray.height() <= 2 * BORDER {
            return Vec::new();
        }

        let mut corners: Vec<_> = corners_fast9(gray, self.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= BORDER && c.y >= BORDER
                    && c.x < gray.width() - BORDER
                    && c.y < gray.height() - BORDER
            })
            .collect();
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(self.max_features);

        corners
            .into_iter()
            .map(|c| Keypoint {
                x: c.x,
                y: c.y,
                score: c.score,
                angle: intensity_centroid_angle(gray, c.x, c.y),
            })
            .collect()
    }

    pub fn extract(&self, gray: &GrayImage) -> Vec<Descriptor> {
        let keypoints = self.keypoints(gray);
        if keypoints.is_empty() {
            return Vec::new();
        }
        let smoothed = gaussian_blur_f32(gray, 2.0);
        keypoints
            .iter()
            .map(|kp| describe(&smoothed, kp))
            .collect()
    }
}

fn intensity_centroid_angle(gray: &GrayImage, cx: u32, cy: u32) -> f32 {
    let mut m01 = 0.0f64;
    let mut m10 = 0.0f64;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let value = gray.get_pixel((cx as i32 + dx) as u32, (cy as i32 + dy) as u32)[0] as f64;
            m10 += dx as f64 * value;
            m01 += dy as f64 * value;
        }
    }
    m01.atan2(m10) as f32
}

fn describe(smoothed: &GrayImage, kp: &Keypoint) -> Descriptor {
    let (sin, cos) = kp.angle.sin_cos();
    let sample = |(px, py): (f32, f32)| -> u8 {
        let x = (kp.x as f32 + px * cos - py * sin).round() as i64;
        let y = (kp.y as f32 + px * sin + py * cos).round() as i64;
        let x = x.clamp(0, smoothed.width() as i64 - 1) as u32;
        let y = y.clamp(0, smoothed.height() as i64 - 1) as u32;
        smoothed.get_pixel(x, y)[0]
    };

    let mut bits = [0u8; 32];
    for (i, &(a, b)) in pattern().iter().enumerate() {
        if sample(a) < sample(b) {
            bits[i / 8] |= 1 << (i % 8);
        }
    }
    Descriptor(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::textured;
    use image::Luma;

    #[test]
    fn test_hamming() {
        let a = Descriptor([0u8; 32]);
        let mut b = Descriptor([0u8; 32]);
        b.0[0] = 0b1011;
        b.0[31] = 0xFF;
        assert_eq!(a.hamming(&b), 11);
        assert_eq!(b.hamming(&b), 0);
    }

    #[test]
    fn test_flat_image_has_no_descriptors() {
        let extractor = OrbExtractor::new(500, 20);
        let gray = GrayImage::from_pixel(240, 240, Luma([90]));
        assert!(extractor.extract(&gray).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = OrbExtractor::new(200, 20);
        let gray = textured(3);
        let first = extractor.extract(&gray);
        assert!(!first.is_empty());
        assert!(first.len() <= 200);
        assert_eq!(first, extractor.extract(&gray));
    }

    #[test]
    fn test_tiny_image_is_empty() {
        let extractor = OrbExtractor::new(500, 20);
        assert!(extractor.extract(&GrayImage::new(30, 30)).is_empty());
    }
}
