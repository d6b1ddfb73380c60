use std::path::PathBuf;
use std::time::SystemTime;

use image::DynamicImage;
use parking_lot::Mutex;

use crate::camera::FrameSource;
use crate::common::error::{KioskError, Result};

/// Frames from an image file that an external capture process keeps
/// overwriting. Decoding is skipped while the file is unchanged.
pub struct SnapshotCamera {
    path: PathBuf,
    cached: Mutex<Option<(SystemTime, DynamicImage)>>,
}

impl SnapshotCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }
}

impl FrameSource for SnapshotCamera {
    fn frame(&self) -> Result<DynamicImage> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| KioskError::Camera(format!("{}: {}", self.path.display(), e)))?;

        let mut cached = self.cached.lock();
        if let Some((stamp, frame)) = cached.as_ref() {
            if *stamp == modified {
                return Ok(frame.clone());
            }
        }

        let frame = image::open(&self.path)
            .map_err(|e| KioskError::Camera(format!("Failed to decode {}: {}", self.path.display(), e)))?;
        *cached = Some((modified, frame.clone()));
        Ok(frame)
    }
}
