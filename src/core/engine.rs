use std::collections::HashMap;

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage};
use parking_lot::{Mutex, RwLock};

use crate::common::config::Config;
use crate::common::error::Result;
use crate::core::descriptor::{Descriptor, OrbExtractor};
use crate::core::detector::{largest, DetectorChain, FaceBox};
use crate::core::index::FaceIndex;
use crate::core::matcher::{employee_score, MatchOutcome, MatchPolicy};
use crate::core::quality::{QualityGate, QualityReport};
use crate::storage::descriptor_store::{DescriptorBatch, DescriptorStore};

/// What one frame says about who is in front of the camera.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recognition {
    pub employee_id: Option<String>,
    pub display_name: Option<String>,
    pub confidence: f32,
    pub bbox: Option<FaceBox>,
}

impl Recognition {
    pub fn no_face() -> Self {
        Self::default()
    }

    fn from_outcome(outcome: MatchOutcome, bbox: FaceBox) -> Self {
        Self {
            employee_id: outcome.employee_id,
            display_name: None,
            confidence: outcome.confidence,
            bbox: Some(bbox),
        }
    }
}

/// Result of one enrollment capture attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ShotOutcome {
    NoFace,
    TooSmall { span: f32 },
    PoorQuality { sharpness: f64, brightness: f64 },
    Accepted(GrayImage),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReindexSummary {
    pub employees: usize,
    pub batches: usize,
    pub skipped_crops: usize,
}

pub struct FaceEngine {
    detectors: DetectorChain,
    extractor: OrbExtractor,
    policy: MatchPolicy,
    quality: QualityGate,
    store: DescriptorStore,
    index: RwLock<FaceIndex>,
    /// Held by enrollment and re-index; online learning skips while taken.
    training: Mutex<()>,
    face_size: u32,
    face_min_size: u32,
    max_samples: usize,
    required_shots: usize,
}

impl FaceEngine {
    pub fn new(detectors: DetectorChain, config: &Config, store: DescriptorStore) -> Self {
        let recognition = &config.recognition;
        let index = FaceIndex::load(&store, recognition.online_max_samples_per_emp);
        Self {
            detectors,
            extractor: OrbExtractor::new(recognition.max_features, recognition.fast_threshold),
            policy: MatchPolicy::from_config(recognition),
            quality: QualityGate::new(&config.quality),
            store,
            index: RwLock::new(index),
            training: Mutex::new(()),
            face_size: recognition.face_size,
            face_min_size: recognition.face_min_size,
            max_samples: recognition.online_max_samples_per_emp,
            required_shots: config.enrollment.train_required_shots,
        }
    }

    pub fn from_config(config: &Config, store: DescriptorStore) -> Self {
        Self::new(DetectorChain::from_config(&config.detector), config, store)
    }

    pub fn face_min_size(&self) -> u32 {
        self.face_min_size
    }

    pub fn detect_largest(&self, frame: &DynamicImage) -> Option<FaceBox> {
        largest(&self.detectors.detect(frame))
    }

    /// Grayscale crop of `bbox`, clamped to the frame and resized to the
    /// square face size.
    pub fn normalized_crop(&self, frame: &DynamicImage, bbox: &FaceBox) -> GrayImage {
        let gray = frame.to_luma8();
        self.normalize_region(&gray, bbox)
    }

    fn normalize_region(&self, gray: &GrayImage, bbox: &FaceBox) -> GrayImage {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return GrayImage::new(self.face_size, self.face_size);
        }
        let x = (bbox.x1.max(0.0) as u32).min(w.saturating_sub(1));
        let y = (bbox.y1.max(0.0) as u32).min(h.saturating_sub(1));
        let cw = (bbox.width() as u32).clamp(1, w - x);
        let ch = (bbox.height() as u32).clamp(1, h - y);
        let region = imageops::crop_imm(gray, x, y, cw, ch).to_image();
        imageops::resize(&region, self.face_size, self.face_size, FilterType::Triangle)
    }

    pub fn assess(&self, crop: &GrayImage) -> QualityReport {
        self.quality.assess(crop)
    }

    pub fn extract(&self, crop: &GrayImage) -> Vec<Descriptor> {
        self.extractor.extract(crop)
    }

    fn scores(&self, probe: &[Descriptor]) -> HashMap<String, u32> {
        let index = self.index.read();
        index
            .iter()
            .map(|(id, set)| (id.clone(), employee_score(probe, set.batches(), self.policy.ratio)))
            .collect()
    }

    /// Open-set recognition of the largest face in `frame`.
    pub fn recognize(&self, frame: &DynamicImage) -> Recognition {
        let Some(bbox) = self.detect_largest(frame) else {
            return Recognition::no_face();
        };
        let probe = self.extract(&self.normalized_crop(frame, &bbox));
        if probe.is_empty() {
            return Recognition::from_outcome(MatchOutcome::none(), bbox);
        }

        let outcome = self.policy.identify(&self.scores(&probe));
        tracing::debug!(
            candidate = ?outcome.employee_id,
            best = outcome.best_score,
            runner_up = outcome.runner_up,
            confidence = outcome.confidence,
            "recognize"
        );
        Recognition::from_outcome(outcome, bbox)
    }

    /// Recognition restricted to confirming `target`.
    pub fn verify(&self, frame: &DynamicImage, target: &str) -> Recognition {
        let Some(bbox) = self.detect_largest(frame) else {
            return Recognition::no_face();
        };
        let probe = self.extract(&self.normalized_crop(frame, &bbox));
        if probe.is_empty() {
            return Recognition::from_outcome(MatchOutcome::none(), bbox);
        }

        let outcome = self.policy.verify(target, &self.scores(&probe));
        tracing::debug!(
            target_id = target,
            score = outcome.best_score,
            best_other = outcome.runner_up,
            accepted = outcome.employee_id.is_some(),
            "verify"
        );
        Recognition::from_outcome(outcome, bbox)
    }

    /// One enrollment capture: largest face, size check, quality gate.
    pub fn capture_shot(&self, frame: &DynamicImage) -> ShotOutcome {
        let Some(bbox) = self.detect_largest(frame) else {
            return ShotOutcome::NoFace;
        };
        if bbox.span() < self.face_min_size as f32 {
            return ShotOutcome::TooSmall { span: bbox.span() };
        }
        let crop = self.normalized_crop(frame, &bbox);
        let report = self.assess(&crop);
        if !report.passed {
            return ShotOutcome::PoorQuality {
                sharpness: report.sharpness,
                brightness: report.brightness,
            };
        }
        ShotOutcome::Accepted(crop)
    }

    pub fn batch_count(&self, employee_id: &str) -> usize {
        self.index.read().batch_count(employee_id)
    }

    pub fn is_trained(&self, employee_id: &str) -> bool {
        self.batch_count(employee_id) >= self.required_shots
    }

    /// Adds one batch from a confirmed sighting. Returns whether anything was
    /// learned; skipped while a training job holds the lock.
    pub fn learn_online(&self, employee_id: &str, frame: &DynamicImage, bbox: &FaceBox) -> Result<bool> {
        let Some(_guard) = self.training.try_lock() else {
            tracing::debug!(employee_id, "online learning skipped, training in progress");
            return Ok(false);
        };

        let crop = self.normalized_crop(frame, bbox);
        let report = self.assess(&crop);
        if !report.passed {
            tracing::debug!(employee_id, sharpness = report.sharpness, brightness = report.brightness, "online sample rejected");
            return Ok(false);
        }
        let descriptors = self.extract(&crop);
        if descriptors.is_empty() {
            return Ok(false);
        }

        self.store.save_crop(employee_id, &crop)?;
        self.store.enforce_crop_limit(employee_id, self.max_samples)?;

        let snapshot = {
            let mut index = self.index.write();
            index.push(employee_id, descriptors).to_vec()
        };
        self.store.save(employee_id, &snapshot)?;
        tracing::info!(employee_id, batches = snapshot.len(), "online_learned");
        Ok(true)
    }

    /// Persists enrollment crops. Descriptors are derived by the re-index
    /// that follows.
    pub fn enroll(&self, employee_id: &str, shots: &[GrayImage]) -> Result<usize> {
        let _guard = self.training.lock();
        for shot in shots {
            self.store.save_crop(employee_id, shot)?;
        }
        self.store.enforce_crop_limit(employee_id, self.max_samples)?;
        tracing::info!(employee_id, shots = shots.len(), "enrollment_saved");
        Ok(shots.len())
    }

    fn crop_descriptors(&self, path: &std::path::Path) -> Option<DescriptorBatch> {
        let gray = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!("Skipping unreadable crop {}: {}", path.display(), e);
                return None;
            }
        };

        let face = self
            .detectors
            .cascade()
            .and_then(|cascade| largest(&cascade.detect_gray(&gray)));
        let normalized = match face {
            Some(bbox) => self.normalize_region(&gray, &bbox),
            None => imageops::resize(&gray, self.face_size, self.face_size, FilterType::Triangle),
        };

        let descriptors = self.extract(&normalized);
        if descriptors.is_empty() {
            None
        } else {
            Some(descriptors)
        }
    }

    /// Rebuilds every employee's descriptor set from their stored crops.
    /// `progress` receives `(completed, total)` after each employee.
    pub fn reindex(&self, mut progress: impl FnMut(usize, usize)) -> Result<ReindexSummary> {
        let _guard = self.training.lock();
        let ids = self.store.crop_ids();
        let total = ids.len();
        let mut summary = ReindexSummary::default();

        for (done, id) in ids.iter().enumerate() {
            let crops = self.store.list_crops(id);
            let mut batches = Vec::with_capacity(crops.len());
            for path in &crops {
                match self.crop_descriptors(path) {
                    Some(batch) => batches.push(batch),
                    None => summary.skipped_crops += 1,
                }
            }
            if batches.len() > self.max_samples {
                batches.drain(..batches.len() - self.max_samples);
            }

            self.store.save(id, &batches)?;
            summary.batches += batches.len();
            self.index.write().replace(id, batches);
            summary.employees += 1;

            progress(done + 1, total);
        }

        tracing::info!(
            employees = summary.employees,
            batches = summary.batches,
            skipped = summary.skipped_crops,
            "reindex_complete"
        );
        Ok(summary)
    }
}
