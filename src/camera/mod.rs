pub mod snapshot;

use image::DynamicImage;

use crate::common::error::Result;

pub use snapshot::SnapshotCamera;

pub trait FrameSource: Send + Sync {
    fn frame(&self) -> Result<DynamicImage>;
}
