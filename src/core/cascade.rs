//! Haar-feature cascade face detector over integral images.
//!
//! Cascade definitions are JSON:
//!
//! ```json
//! {
//!   "window_width": 24, "window_height": 24,
//!   "stages": [{
//!     "threshold": 0.5,
//!     "classifiers": [{
//!       "rects": [{"x": 0, "y": 0, "w": 24, "h": 12, "weight": 1.0}],
//!       "threshold": 0.5, "left": 0.0, "right": 1.0
//!     }]
//!   }]
//! }
//! ```
//!
//! A classifier's feature value is the weighted rectangle sum divided by the
//! window area; it votes `left` when below `threshold` times the window's
//! standard deviation, else `right`. A stage passes when its votes reach the
//! stage threshold.

use std::path::Path;

use image::GrayImage;
use imageproc::integral_image::integral_image;
use serde::Deserialize;

use crate::common::error::{KioskError, Result};
use crate::core::detector::FaceBox;

#[derive(Debug, Clone, Deserialize)]
pub struct HaarRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeakClassifier {
    pub rects: Vec<HaarRect>,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeDefinition {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

/// Summed-area tables for pixel values and squared pixel values.
struct Integrals {
    sum: image::ImageBuffer<image::Luma<u32>, Vec<u32>>,
    squared: Vec<u64>,
    stride: usize,
}

impl Integrals {
    fn new(gray: &GrayImage) -> Self {
        let sum = integral_image::<_, u32>(gray);
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut squared = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                let v = gray.get_pixel(x as u32, y as u32)[0] as u64;
                row += v * v;
                squared[(y + 1) * stride + x + 1] = squared[y * stride + x + 1] + row;
            }
        }
        Self { sum, squared, stride }
    }

    /// Sum over `[x, x+w) x [y, y+h)`.
    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let a = self.sum.get_pixel(x, y)[0] as i64;
        let b = self.sum.get_pixel(x + w, y)[0] as i64;
        let c = self.sum.get_pixel(x, y + h)[0] as i64;
        let d = self.sum.get_pixel(x + w, y + h)[0] as i64;
        (d - b - c + a) as f64
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let at = |x: u32, y: u32| self.squared[y as usize * self.stride + x as usize] as i128;
        (at(x + w, y + h) - at(x + w, y) - at(x, y + h) + at(x, y)) as f64
    }
}

pub struct CascadeDetector {
    definition: CascadeDefinition,
    scale_factor: f32,
    min_neighbors: usize,
}

impl CascadeDetector {
    pub fn new(definition: CascadeDefinition, scale_factor: f32, min_neighbors: usize) -> Result<Self> {
        if definition.window_width == 0 || definition.window_height == 0 {
            return Err(KioskError::Model("Cascade window must be non-empty".to_string()));
        }
        if definition.stages.is_empty() {
            return Err(KioskError::Model("Cascade has no stages".to_string()));
        }
        for stage in &definition.stages {
            for classifier in &stage.classifiers {
                for rect in &classifier.rects {
                    if rect.x + rect.w > definition.window_width || rect.y + rect.h > definition.window_height {
                        return Err(KioskError::Model(format!(
                            "Cascade rectangle {:?} exceeds the {}x{} window",
                            rect, definition.window_width, definition.window_height
                        )));
                    }
                }
            }
        }
        Ok(Self {
            definition,
            scale_factor: scale_factor.max(1.01),
            min_neighbors,
        })
    }

    pub fn from_path(path: &Path, scale_factor: f32, min_neighbors: usize) -> Result<Self> {
        if !path.exists() {
            return Err(KioskError::Model(format!("Cascade not found at: {:?}", path)));
        }
        let contents = std::fs::read_to_string(path)?;
        let definition: CascadeDefinition = serde_json::from_str(&contents)?;
        tracing::info!(stages = definition.stages.len(), "cascade_loaded");
        Self::new(definition, scale_factor, min_neighbors)
    }

    fn window_passes(&self, integrals: &Integrals, x: u32, y: u32, scale: f32) -> bool {
        let win_w = (self.definition.window_width as f32 * scale) as u32;
        let win_h = (self.definition.window_height as f32 * scale) as u32;
        let area = (win_w * win_h) as f64;

        let mean = integrals.rect_sum(x, y, win_w, win_h) / area;
        let variance = integrals.rect_sq_sum(x, y, win_w, win_h) / area - mean * mean;
        let std_dev = variance.max(0.0).sqrt().max(1.0);

        for stage in &self.definition.stages {
            let mut votes = 0.0f32;
            for classifier in &stage.classifiers {
                let mut value = 0.0f64;
                for rect in &classifier.rects {
                    let rx = x + (rect.x as f32 * scale) as u32;
                    let ry = y + (rect.y as f32 * scale) as u32;
                    let rw = ((rect.w as f32 * scale) as u32).max(1);
                    let rh = ((rect.h as f32 * scale) as u32).max(1);
                    value += rect.weight as f64 * integrals.rect_sum(rx, ry, rw, rh);
                }
                value /= area;
                votes += if value < classifier.threshold as f64 * std_dev {
                    classifier.left
                } else {
                    classifier.right
                };
            }
            if votes < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Raw window hits across all scales, before grouping.
    fn scan(&self, gray: &GrayImage) -> Vec<FaceBox> {
        let integrals = Integrals::new(gray);
        let mut hits = Vec::new();
        let mut scale = 1.0f32;

        loop {
            let win_w = (self.definition.window_width as f32 * scale) as u32;
            let win_h = (self.definition.window_height as f32 * scale) as u32;
            if win_w > gray.width() || win_h > gray.height() {
                break;
            }
            let step = ((scale * 2.0) as u32).max(1);

            let mut y = 0;
            while y + win_h <= gray.height() {
                let mut x = 0;
                while x + win_w <= gray.width() {
                    if self.window_passes(&integrals, x, y, scale) {
                        hits.push(FaceBox {
                            x1: x as f32,
                            y1: y as f32,
                            x2: (x + win_w) as f32,
                            y2: (y + win_h) as f32,
                            confidence: 1.0,
                        });
                    }
                    x += step;
                }
                y += step;
            }
            scale *= self.scale_factor;
        }
        hits
    }

    pub fn detect_gray(&self, gray: &GrayImage) -> Vec<FaceBox> {
        group_rectangles(self.scan(gray), self.min_neighbors)
    }
}

fn similar(a: &FaceBox, b: &FaceBox) -> bool {
    let eps = 0.2;
    let delta = eps * (a.width().min(b.width()) + a.height().min(b.height())) * 0.5;
    (a.x1 - b.x1).abs() <= delta
        && (a.y1 - b.y1).abs() <= delta
        && (a.x2 - b.x2).abs() <= delta
        && (a.y2 - b.y2).abs() <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Clusters overlapping hits; clusters with at least `min_neighbors` members
/// become one averaged box whose confidence grows with the member count.
pub fn group_rectangles(hits: Vec<FaceBox>, min_neighbors: usize) -> Vec<FaceBox> {
    let n = hits.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut clusters: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(i);
    }

    let required = min_neighbors.max(1);
    clusters
        .values()
        .filter(|members| members.len() >= required)
        .map(|members| {
            let count = members.len() as f32;
            let sum = members.iter().fold([0.0f32; 4], |mut acc, &i| {
                acc[0] += hits[i].x1;
                acc[1] += hits[i].y1;
                acc[2] += hits[i].x2;
                acc[3] += hits[i].y2;
                acc
            });
            FaceBox {
                x1: sum[0] / count,
                y1: sum[1] / count,
                x2: sum[2] / count,
                y2: sum[3] / count,
                confidence: count / (count + required as f32),
            }
        })
        .collect()
}
