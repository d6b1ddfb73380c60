use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::common::error::{KioskError, Result};
use crate::common::paths::DataLayout;
use crate::core::descriptor::Descriptor;

const STORAGE_VERSION: u32 = 1;

/// One enrollment or online-learning shot worth of descriptors.
pub type DescriptorBatch = Vec<Descriptor>;

#[derive(Serialize, Deserialize)]
pub struct StoredDescriptors {
    pub version: u32,
    pub employee_id: String,
    pub batches: Vec<DescriptorBatch>,
}

/// Per-employee descriptor blobs plus the face crops they were derived from.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    index_dir: PathBuf,
    faces_dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            index_dir: layout.index_dir.clone(),
            faces_dir: layout.faces_dir.clone(),
        }
    }

    fn index_file(&self, employee_id: &str) -> PathBuf {
        self.index_dir.join(format!("{}.bincode", employee_id))
    }

    fn crops_dir(&self, employee_id: &str) -> PathBuf {
        self.faces_dir.join(employee_id)
    }

    /// Missing or unreadable blobs load as an empty set.
    pub fn load(&self, employee_id: &str) -> Vec<DescriptorBatch> {
        let path = self.index_file(employee_id);
        if !path.exists() {
            return Vec::new();
        }

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        match bincode::deserialize::<StoredDescriptors>(&data) {
            Ok(stored) if stored.version <= STORAGE_VERSION => stored.batches,
            Ok(stored) => {
                tracing::warn!(
                    "Descriptor file {} has unknown version {}, ignoring",
                    path.display(),
                    stored.version
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Corrupt descriptor file {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, employee_id: &str, batches: &[DescriptorBatch]) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        let stored = StoredDescriptors {
            version: STORAGE_VERSION,
            employee_id: employee_id.to_string(),
            batches: batches.to_vec(),
        };
        let encoded = bincode::serialize(&stored)
            .map_err(|e| KioskError::Storage(format!("Failed to serialize: {}", e)))?;

        let path = self.index_file(employee_id);
        let tmp = path.with_extension("bincode.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Employee ids with a persisted descriptor blob.
    pub fn indexed_ids(&self) -> Vec<String> {
        list_stems(&self.index_dir, |p| p.extension().map_or(false, |ext| ext == "bincode"))
    }

    /// Employee ids with a crop directory.
    pub fn crop_ids(&self) -> Vec<String> {
        list_stems(&self.faces_dir, |p| p.is_dir())
    }

    pub fn save_crop(&self, employee_id: &str, crop: &GrayImage) -> Result<PathBuf> {
        let dir = self.crops_dir(employee_id);
        fs::create_dir_all(&dir)?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut path = dir.join(format!("{}.png", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}.png", stamp, suffix));
            suffix += 1;
        }

        crop.save(&path)?;
        Ok(path)
    }

    /// Crop files for an employee, oldest first.
    pub fn list_crops(&self, employee_id: &str) -> Vec<PathBuf> {
        let dir = self.crops_dir(employee_id);
        let mut crops: Vec<PathBuf> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_image_file(p))
                .collect(),
            Err(_) => return Vec::new(),
        };
        // Timestamped names sort chronologically.
        crops.sort();
        crops
    }

    /// Deletes the oldest crops beyond `max`. Returns how many were removed.
    pub fn enforce_crop_limit(&self, employee_id: &str, max: usize) -> Result<usize> {
        let crops = self.list_crops(employee_id);
        if crops.len() <= max {
            return Ok(0);
        }
        let excess = crops.len() - max;
        for path in &crops[..excess] {
            fs::remove_file(path)?;
        }
        tracing::debug!(employee_id = %employee_id, removed = excess, "crop_trim");
        Ok(excess)
    }
}

fn is_image_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"),
        None => false,
    }
}

fn list_stems(dir: &Path, keep: impl Fn(&Path) -> bool) -> Vec<String> {
    let mut ids: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| keep(p))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    ids.sort();
    ids
}
