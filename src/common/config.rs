use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{KioskError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default = "default_bootstrap")]
    pub bootstrap: Option<BootstrapEmployee>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// Snapshot written by the external capture process.
    #[serde(default = "default_frame_path")]
    pub frame_path: PathBuf,
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

fn default_frame_path() -> PathBuf { PathBuf::from("/run/alcogate/frame.jpg") }
fn default_camera_fps() -> u32 { 10 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_path: default_frame_path(),
            fps: default_camera_fps(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
    #[serde(default = "default_cascade_path")]
    pub cascade_path: PathBuf,
    #[serde(default = "default_cascade_scale")]
    pub cascade_scale_factor: f32,
    #[serde(default = "default_min_neighbors")]
    pub cascade_min_neighbors: usize,
}

fn default_model_path() -> PathBuf { PathBuf::from("models/face_detector.onnx") }
fn default_detector_input() -> u32 { 640 }
fn default_score_threshold() -> f32 { 0.85 }
fn default_nms_threshold() -> f32 { 0.3 }
fn default_top_k() -> usize { 5000 }
fn default_optimization_level() -> u32 { 3 }
fn default_cascade_path() -> PathBuf { PathBuf::from("models/frontalface_cascade.json") }
fn default_cascade_scale() -> f32 { 1.2 }
fn default_min_neighbors() -> usize { 5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            score_threshold: default_score_threshold(),
            nms_threshold: default_nms_threshold(),
            top_k: default_top_k(),
            optimization_level: default_optimization_level(),
            cascade_path: default_cascade_path(),
            cascade_scale_factor: default_cascade_scale(),
            cascade_min_neighbors: default_min_neighbors(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    #[serde(default = "default_face_interval")]
    pub face_detect_interval_ms: u64,
    #[serde(default = "default_face_min_size")]
    pub face_min_size: u32,
    #[serde(default = "default_conf_ok")]
    pub recognition_conf_ok: f32,
    #[serde(default = "default_conf_low")]
    pub recognition_conf_low: f32,
    #[serde(default = "default_fail_limit")]
    pub detect_fail_limit: u32,
    #[serde(default = "default_retry_limit")]
    pub detect_retry_limit: u32,
    #[serde(default = "default_lost_ticks")]
    pub detect_lost_ticks: u32,
    #[serde(default = "default_min_match")]
    pub recognition_min_match: u32,
    #[serde(default = "default_ratio")]
    pub recognition_ratio_thresh: f32,
    #[serde(default = "default_min_margin")]
    pub recognition_min_margin: u32,
    #[serde(default = "default_stable_ticks")]
    pub recognition_stable_ticks: u32,
    #[serde(default = "default_online_max")]
    pub online_max_samples_per_emp: usize,
    #[serde(default = "default_face_size")]
    pub face_size: u32,
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u8,
}

fn default_face_interval() -> u64 { 1000 }
fn default_face_min_size() -> u32 { 120 }
fn default_conf_ok() -> f32 { 55.0 }
fn default_conf_low() -> f32 { 20.0 }
fn default_fail_limit() -> u32 { 5 }
fn default_retry_limit() -> u32 { 3 }
fn default_lost_ticks() -> u32 { 5 }
fn default_min_match() -> u32 { 65 }
fn default_ratio() -> f32 { 0.75 }
fn default_min_margin() -> u32 { 10 }
fn default_stable_ticks() -> u32 { 2 }
fn default_online_max() -> usize { 40 }
fn default_face_size() -> u32 { 240 }
fn default_max_features() -> usize { 500 }
fn default_fast_threshold() -> u8 { 20 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            face_detect_interval_ms: default_face_interval(),
            face_min_size: default_face_min_size(),
            recognition_conf_ok: default_conf_ok(),
            recognition_conf_low: default_conf_low(),
            detect_fail_limit: default_fail_limit(),
            detect_retry_limit: default_retry_limit(),
            detect_lost_ticks: default_lost_ticks(),
            recognition_min_match: default_min_match(),
            recognition_ratio_thresh: default_ratio(),
            recognition_min_margin: default_min_margin(),
            recognition_stable_ticks: default_stable_ticks(),
            online_max_samples_per_emp: default_online_max(),
            face_size: default_face_size(),
            max_features: default_max_features(),
            fast_threshold: default_fast_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_required_shots")]
    pub train_required_shots: usize,
    #[serde(default = "default_train_timeout")]
    pub train_timeout_sec: u64,
    /// Longest wait for the re-index that follows an enrollment.
    #[serde(default = "default_training_deadline")]
    pub training_deadline_sec: u64,
}

fn default_required_shots() -> usize { 10 }
fn default_train_timeout() -> u64 { 15 }
fn default_training_deadline() -> u64 { 120 }

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            train_required_shots: default_required_shots(),
            train_timeout_sec: default_train_timeout(),
            training_deadline_sec: default_training_deadline(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_sharpness")]
    pub quality_min_sharpness: f64,
    #[serde(default = "default_min_brightness")]
    pub quality_min_brightness: f64,
    #[serde(default = "default_max_brightness")]
    pub quality_max_brightness: f64,
}

fn default_min_sharpness() -> f64 { 60.0 }
fn default_min_brightness() -> f64 { 40.0 }
fn default_max_brightness() -> f64 { 210.0 }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            quality_min_sharpness: default_min_sharpness(),
            quality_min_brightness: default_min_brightness(),
            quality_max_brightness: default_max_brightness(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SensorConfig {
    /// IIO device exposing the MCP3008 channels as `in_voltageN_raw`.
    #[serde(default = "default_adc_device")]
    pub adc_device: PathBuf,
    #[serde(default)]
    pub mq3_channel: u8,
    #[serde(default = "default_distance_channel")]
    pub distance_channel: u8,
    #[serde(default = "default_mic_channel")]
    pub mic_channel: u8,
    #[serde(default = "default_baseline_samples")]
    pub baseline_samples: usize,
    #[serde(default = "default_promille_scale")]
    pub promille_scale: f64,
    #[serde(default = "default_mic_samples")]
    pub mic_amp_samples: usize,
}

fn default_adc_device() -> PathBuf { PathBuf::from("/sys/bus/iio/devices/iio:device0") }
fn default_distance_channel() -> u8 { 1 }
fn default_mic_channel() -> u8 { 2 }
fn default_baseline_samples() -> usize { 150 }
fn default_promille_scale() -> f64 { 220.0 }
fn default_mic_samples() -> usize { 32 }

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            adc_device: default_adc_device(),
            mq3_channel: 0,
            distance_channel: default_distance_channel(),
            mic_channel: default_mic_channel(),
            baseline_samples: default_baseline_samples(),
            promille_scale: default_promille_scale(),
            mic_amp_samples: default_mic_samples(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MeasurementConfig {
    #[serde(default = "default_measure_seconds")]
    pub measure_seconds: f64,
    #[serde(default = "default_distance_min")]
    pub distance_min_cm: f64,
    #[serde(default = "default_distance_max")]
    pub distance_max_cm: f64,
    #[serde(default = "default_mic_threshold")]
    pub mic_threshold: u16,
    #[serde(default = "default_measure_timeout")]
    pub measure_timeout_sec: u64,
    #[serde(default = "default_identified_timeout")]
    pub identified_wait_timeout_sec: u64,
    /// Longest wait for the promille result once the samples are handed off.
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_sec: u64,
}

fn default_measure_seconds() -> f64 { 3.0 }
fn default_distance_min() -> f64 { 8.0 }
fn default_distance_max() -> f64 { 20.0 }
fn default_mic_threshold() -> u16 { 150 }
fn default_measure_timeout() -> u64 { 20 }
fn default_identified_timeout() -> u64 { 30 }
fn default_analysis_timeout() -> u64 { 10 }

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            measure_seconds: default_measure_seconds(),
            distance_min_cm: default_distance_min(),
            distance_max_cm: default_distance_max(),
            mic_threshold: default_mic_threshold(),
            measure_timeout_sec: default_measure_timeout(),
            identified_wait_timeout_sec: default_identified_timeout(),
            analysis_timeout_sec: default_analysis_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecisionConfig {
    #[serde(default = "default_threshold_pass")]
    pub threshold_pass: f64,
    #[serde(default = "default_threshold_deny")]
    pub threshold_deny: f64,
    #[serde(default = "default_pass_display")]
    pub pass_display_ms: u64,
    #[serde(default = "default_deny_display")]
    pub deny_display_ms: u64,
    #[serde(default = "default_short_display")]
    pub retry_deny_display_ms: u64,
    #[serde(default = "default_short_display")]
    pub wrong_pin_display_ms: u64,
    /// Enrollment, wait and measurement failures.
    #[serde(default = "default_short_display")]
    pub error_display_ms: u64,
}

fn default_threshold_pass() -> f64 { 0.2 }
fn default_threshold_deny() -> f64 { 0.5 }
fn default_pass_display() -> u64 { 2500 }
fn default_deny_display() -> u64 { 3000 }
fn default_short_display() -> u64 { 2000 }

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            threshold_pass: default_threshold_pass(),
            threshold_deny: default_threshold_deny(),
            pass_display_ms: default_pass_display(),
            deny_display_ms: default_deny_display(),
            retry_deny_display_ms: default_short_display(),
            wrong_pin_display_ms: default_short_display(),
            error_display_ms: default_short_display(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default = "default_gate_gpio")]
    pub gate_gpio: u32,
    #[serde(default = "default_gate_pulse")]
    pub gate_pulse_sec: f64,
    #[serde(default = "default_led_pass")]
    pub led_pass_gpio: u32,
    #[serde(default = "default_led_deny")]
    pub led_deny_gpio: u32,
    #[serde(default = "default_led_pulse")]
    pub led_pulse_sec: f64,
}

fn default_gpio_root() -> PathBuf { PathBuf::from("/sys/class/gpio") }
fn default_gate_gpio() -> u32 { 18 }
fn default_gate_pulse() -> f64 { 5.0 }
fn default_led_pass() -> u32 { 24 }
fn default_led_deny() -> u32 { 23 }
fn default_led_pulse() -> f64 { 3.0 }

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            gpio_root: default_gpio_root(),
            gate_gpio: default_gate_gpio(),
            gate_pulse_sec: default_gate_pulse(),
            led_pass_gpio: default_led_pass(),
            led_deny_gpio: default_led_deny(),
            led_pulse_sec: default_led_pulse(),
        }
    }
}

/// Every path is optional; unset ones are derived from `data_dir`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub faces_dir: Option<PathBuf>,
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
    #[serde(default)]
    pub employees_json: Option<PathBuf>,
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_ms: u64,
}

fn default_remote_timeout() -> u64 { 5000 }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            timeout_ms: default_remote_timeout(),
        }
    }
}

/// Loop cadences, in milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_shot_rejected")]
    pub shot_rejected_ms: u64,
    #[serde(default = "default_shot_accepted")]
    pub shot_accepted_ms: u64,
    #[serde(default = "default_distance_poll")]
    pub distance_poll_ms: u64,
    #[serde(default = "default_measure_poll")]
    pub measure_poll_ms: u64,
    #[serde(default = "default_clock_tick")]
    pub clock_tick_ms: u64,
}

fn default_shot_rejected() -> u64 { 80 }
fn default_shot_accepted() -> u64 { 120 }
fn default_distance_poll() -> u64 { 200 }
fn default_measure_poll() -> u64 { 100 }
fn default_clock_tick() -> u64 { 250 }

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            shot_rejected_ms: default_shot_rejected(),
            shot_accepted_ms: default_shot_accepted(),
            distance_poll_ms: default_distance_poll(),
            measure_poll_ms: default_measure_poll(),
            clock_tick_ms: default_clock_tick(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BootstrapEmployee {
    pub id: String,
    pub name: String,
    pub pin: String,
}

fn default_bootstrap() -> Option<BootstrapEmployee> {
    Some(BootstrapEmployee {
        id: "1".to_string(),
        name: "Test Employee".to_string(),
        pin: "0000".to_string(),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            recognition: RecognitionConfig::default(),
            enrollment: EnrollmentConfig::default(),
            quality: QualityConfig::default(),
            sensors: SensorConfig::default(),
            measurement: MeasurementConfig::default(),
            decision: DecisionConfig::default(),
            gate: GateConfig::default(),
            storage: StorageConfig::default(),
            remote: RemoteConfig::default(),
            timing: TimingConfig::default(),
            bootstrap: default_bootstrap(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/alcogate.toml";
        Self::load_from_path(Path::new(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KioskError::Config(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| KioskError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Threshold inversion is not rejected here; the decision stage swaps it.
    pub fn validate(&self) -> Result<()> {
        if self.camera.fps == 0 || self.camera.fps > 120 {
            return Err(KioskError::Config(format!(
                "Camera fps must be between 1 and 120, got {}", self.camera.fps
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(KioskError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(KioskError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(KioskError::Config(format!(
                "Detector score threshold must be between 0.0 and 1.0, got {}",
                self.detector.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.nms_threshold) {
            return Err(KioskError::Config(format!(
                "Detector NMS threshold must be between 0.0 and 1.0, got {}",
                self.detector.nms_threshold
            )));
        }
        if self.detector.cascade_scale_factor <= 1.0 {
            return Err(KioskError::Config(format!(
                "Cascade scale factor must be greater than 1.0, got {}",
                self.detector.cascade_scale_factor
            )));
        }

        let recognition = &self.recognition;
        if recognition.recognition_ratio_thresh <= 0.0 || recognition.recognition_ratio_thresh > 1.0 {
            return Err(KioskError::Config(format!(
                "Recognition ratio threshold must be in (0.0, 1.0], got {}",
                recognition.recognition_ratio_thresh
            )));
        }
        if !(0.0..=100.0).contains(&recognition.recognition_conf_ok) {
            return Err(KioskError::Config(format!(
                "Recognition confidence must be between 0 and 100, got {}",
                recognition.recognition_conf_ok
            )));
        }
        if recognition.face_size < 64 || recognition.face_size > 1024 {
            return Err(KioskError::Config(format!(
                "Face size must be between 64 and 1024, got {}", recognition.face_size
            )));
        }
        if recognition.online_max_samples_per_emp == 0 {
            return Err(KioskError::Config(
                "online_max_samples_per_emp must be at least 1".to_string()
            ));
        }
        if recognition.face_detect_interval_ms == 0 {
            return Err(KioskError::Config(
                "face_detect_interval_ms must be positive".to_string()
            ));
        }
        if recognition.detect_fail_limit == 0 || recognition.detect_retry_limit == 0 {
            return Err(KioskError::Config(
                "detect_fail_limit and detect_retry_limit must be at least 1".to_string()
            ));
        }

        if self.enrollment.train_required_shots == 0 {
            return Err(KioskError::Config(
                "train_required_shots must be at least 1".to_string()
            ));
        }
        if self.enrollment.training_deadline_sec == 0 {
            return Err(KioskError::Config(
                "training_deadline_sec must be positive".to_string()
            ));
        }

        if self.quality.quality_min_brightness > self.quality.quality_max_brightness {
            return Err(KioskError::Config(format!(
                "Brightness window is inverted: {} > {}",
                self.quality.quality_min_brightness, self.quality.quality_max_brightness
            )));
        }

        if self.sensors.baseline_samples == 0 || self.sensors.mic_amp_samples == 0 {
            return Err(KioskError::Config(
                "baseline_samples and mic_amp_samples must be at least 1".to_string()
            ));
        }
        if self.sensors.promille_scale <= 0.0 {
            return Err(KioskError::Config(format!(
                "promille_scale must be positive, got {}", self.sensors.promille_scale
            )));
        }
        for channel in [self.sensors.mq3_channel, self.sensors.distance_channel, self.sensors.mic_channel] {
            if channel > 7 {
                return Err(KioskError::Config(format!(
                    "ADC channel must be between 0 and 7, got {}", channel
                )));
            }
        }

        let measurement = &self.measurement;
        if measurement.measure_seconds <= 0.0 {
            return Err(KioskError::Config(format!(
                "measure_seconds must be positive, got {}", measurement.measure_seconds
            )));
        }
        if measurement.distance_min_cm < 0.0 || measurement.distance_min_cm > measurement.distance_max_cm {
            return Err(KioskError::Config(format!(
                "Distance window is invalid: [{}, {}]",
                measurement.distance_min_cm, measurement.distance_max_cm
            )));
        }
        if (measurement.measure_timeout_sec as f64) < measurement.measure_seconds {
            return Err(KioskError::Config(format!(
                "measure_timeout_sec ({}) is shorter than measure_seconds ({})",
                measurement.measure_timeout_sec, measurement.measure_seconds
            )));
        }
        if measurement.analysis_timeout_sec == 0 {
            return Err(KioskError::Config(
                "analysis_timeout_sec must be positive".to_string()
            ));
        }

        if self.decision.threshold_pass < 0.0 || self.decision.threshold_deny < 0.0 {
            return Err(KioskError::Config(
                "Decision thresholds must not be negative".to_string()
            ));
        }

        if self.gate.gate_pulse_sec <= 0.0 || self.gate.led_pulse_sec <= 0.0 {
            return Err(KioskError::Config(
                "Gate and LED pulse durations must be positive".to_string()
            ));
        }

        let timing = &self.timing;
        if [timing.shot_rejected_ms, timing.shot_accepted_ms, timing.distance_poll_ms,
            timing.measure_poll_ms, timing.clock_tick_ms].contains(&0) {
            return Err(KioskError::Config(
                "Timing intervals must be positive".to_string()
            ));
        }

        if self.remote.enabled && self.remote.base_url.is_none() {
            return Err(KioskError::Config(
                "remote.enabled requires remote.base_url".to_string()
            ));
        }

        if let Some(ref boot) = self.bootstrap {
            if !crate::storage::registry::is_valid_id(&boot.id) {
                return Err(KioskError::Config(format!(
                    "Bootstrap id must be a plain name, got {:?}", boot.id
                )));
            }
            if !crate::storage::registry::is_valid_pin(&boot.pin) {
                return Err(KioskError::Config(format!(
                    "Bootstrap PIN must be exactly 4 digits, got {:?}", boot.pin
                )));
            }
        }

        Ok(())
    }
}
