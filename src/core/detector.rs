use crate::common::config::DetectorConfig;
use crate::common::error::{KioskError, Result};
use crate::core::cascade::CascadeDetector;
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Longer side in pixels, compared against `face_min_size`.
    pub fn span(&self) -> f32 {
        self.width().max(self.height())
    }
}

pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>>;
}

/// Largest-area candidate, if any.
pub fn largest(boxes: &[FaceBox]) -> Option<FaceBox> {
    boxes
        .iter()
        .copied()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
}

pub fn iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = box1.area() + box2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// YOLO-style single-class face detector run through ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl OnnxFaceDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| KioskError::Model(format!("Failed to create environment: {}", e)))?
        );

        let model_path = &config.model_path;
        if !model_path.exists() {
            return Err(KioskError::Model(
                format!("Detector model not found at: {:?}", model_path)
            ));
        }

        let opt_level = match config.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };
        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(opt_level)?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = value;
            array[[0, 1, y, x]] = value;
            array[[0, 2, y, x]] = value;
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceBox>> {
        let mut faces = Vec::new();
        let Some(first) = outputs.first() else {
            return Ok(faces);
        };

        // [1, N, 5] or transposed [1, 5, N]; each row is cx, cy, w, h, score.
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let values = output
            .as_slice()
            .ok_or_else(|| KioskError::Model("Detector output is not contiguous".to_string()))?;

        let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        } else if shape.len() == 2 {
            (shape[0], shape[1], false)
        } else {
            tracing::warn!("Unexpected output shape: {:?}", shape);
            return Ok(faces);
        };
        if prediction_length < 5 {
            tracing::warn!("Detector output rows too short: {:?}", shape);
            return Ok(faces);
        }

        let input_w = self.config.input_width as f32;
        let input_h = self.config.input_height as f32;

        for i in 0..num_predictions {
            let at = |field: usize| {
                if is_transposed {
                    values[field * num_predictions + i]
                } else {
                    values[i * prediction_length + field]
                }
            };
            let confidence = at(4);
            if confidence < self.config.score_threshold {
                continue;
            }

            let (mut cx, mut cy, mut w, mut h) = (at(0), at(1), at(2), at(3));
            // Normalized coordinates
            if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
                cx *= input_w;
                cy *= input_h;
                w *= input_w;
                h *= input_h;
            }

            let x1 = (cx - w / 2.0).max(0.0);
            let y1 = (cy - h / 2.0).max(0.0);
            let x2 = (cx + w / 2.0).min(input_w);
            let y2 = (cy + h / 2.0).min(input_h);
            if x2 - x1 > 10.0 && y2 - y1 > 10.0 {
                faces.push(FaceBox { x1, y1, x2, y2, confidence });
            }
        }

        faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        faces.truncate(self.config.top_k);
        Ok(nms(faces, self.config.nms_threshold))
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.config.input_width
            && image.height() == self.config.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Nearest,
            );
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        let scale_x = orig_width / self.config.input_width as f32;
        let scale_y = orig_height / self.config.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Primary learned detector with the cascade as fallback. The cascade runs
/// when the primary is missing, fails, or finds nothing.
pub struct DetectorChain {
    primary: Option<Box<dyn FaceDetector>>,
    cascade: Option<CascadeDetector>,
}

impl DetectorChain {
    pub fn new(primary: Option<Box<dyn FaceDetector>>, cascade: Option<CascadeDetector>) -> Self {
        Self { primary, cascade }
    }

    /// Initialization failures are logged and leave that detector out.
    pub fn from_config(config: &DetectorConfig) -> Self {
        let primary = match OnnxFaceDetector::new(config) {
            Ok(detector) => Some(Box::new(detector) as Box<dyn FaceDetector>),
            Err(e) => {
                tracing::warn!("Primary face detector unavailable, using cascade: {}", e);
                None
            }
        };
        let cascade = match CascadeDetector::from_path(
            &config.cascade_path,
            config.cascade_scale_factor,
            config.cascade_min_neighbors,
        ) {
            Ok(cascade) => Some(cascade),
            Err(e) => {
                tracing::warn!("Cascade detector unavailable: {}", e);
                None
            }
        };
        if primary.is_none() && cascade.is_none() {
            tracing::error!("No face detector available; recognition will never see a face");
        }
        Self { primary, cascade }
    }

    pub fn cascade(&self) -> Option<&CascadeDetector> {
        self.cascade.as_ref()
    }

    pub fn detect(&self, image: &DynamicImage) -> Vec<FaceBox> {
        if let Some(primary) = &self.primary {
            match primary.detect(image) {
                Ok(faces) if !faces.is_empty() => return faces,
                Ok(_) => {}
                Err(e) => tracing::debug!("primary detector failed: {}", e),
            }
        }
        match &self.cascade {
            Some(cascade) => cascade.detect_gray(&image.to_luma8()),
            None => Vec::new(),
        }
    }
}
