pub mod cascade;
pub mod descriptor;
pub mod detector;
pub mod engine;
pub mod index;
pub mod matcher;
pub mod quality;

pub use cascade::CascadeDetector;
pub use descriptor::{Descriptor, OrbExtractor};
pub use detector::{DetectorChain, FaceBox, FaceDetector, OnnxFaceDetector};
pub use engine::{FaceEngine, Recognition, ReindexSummary, ShotOutcome};
pub use index::{DescriptorSet, FaceIndex};
pub use matcher::{MatchOutcome, MatchPolicy};
pub use quality::{QualityGate, QualityReport};
