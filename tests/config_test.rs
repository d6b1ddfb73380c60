use std::path::Path;

use alcogate::fsm::{FsmSettings, Thresholds};
use alcogate::Config;

#[test]
fn shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/alcogate.toml");
    let config = Config::load_from_path(&path).unwrap();
    let defaults = Config::default();

    assert_eq!(config.recognition.detect_fail_limit, defaults.recognition.detect_fail_limit);
    assert_eq!(config.recognition.recognition_min_match, defaults.recognition.recognition_min_match);
    assert_eq!(config.measurement.distance_min_cm, 8.0);
    assert_eq!(config.measurement.distance_max_cm, 20.0);
    assert_eq!(config.decision.threshold_pass, 0.2);
    assert_eq!(config.decision.threshold_deny, 0.5);
    assert_eq!(config.gate.gate_gpio, 18);
    assert_eq!(config.measurement.analysis_timeout_sec, defaults.measurement.analysis_timeout_sec);
    assert_eq!(config.enrollment.training_deadline_sec, defaults.enrollment.training_deadline_sec);
    assert!(!config.remote.enabled);
    assert_eq!(config.bootstrap.map(|b| b.pin), Some("0000".to_string()));
}

#[test]
fn missing_file_is_a_config_error() {
    let err = Config::load_from_path(Path::new("/nonexistent/alcogate.toml")).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn partial_file_fills_in_defaults() {
    let config = Config::from_toml_str(
        r#"
        [measurement]
        distance_max_cm = 25.0

        [decision]
        threshold_pass = 0.1
        "#,
    )
    .unwrap();
    assert_eq!(config.measurement.distance_max_cm, 25.0);
    assert_eq!(config.measurement.distance_min_cm, 8.0);
    assert_eq!(config.decision.threshold_pass, 0.1);
    assert_eq!(config.decision.threshold_deny, 0.5);
    assert_eq!(config.enrollment.train_required_shots, 10);
}

#[test]
fn inverted_thresholds_load_and_are_swapped() {
    let config = Config::from_toml_str(
        r#"
        [decision]
        threshold_pass = 0.6
        threshold_deny = 0.3
        "#,
    )
    .unwrap();
    let settings = FsmSettings::from_config(&config);
    assert_eq!(settings.thresholds, Thresholds { pass: 0.3, deny: 0.6 });
}

#[test]
fn nonsense_values_are_rejected() {
    assert!(Config::from_toml_str("[camera]\nfps = 0").is_err());
    assert!(Config::from_toml_str("[recognition]\nrecognition_ratio_thresh = 1.5").is_err());
    assert!(Config::from_toml_str("[measurement]\ndistance_min_cm = 30.0\ndistance_max_cm = 20.0").is_err());
    assert!(Config::from_toml_str("[bootstrap]\nid = \"1\"\nname = \"x\"\npin = \"12a4\"").is_err());
    assert!(Config::from_toml_str("[bootstrap]\nid = \"../1\"\nname = \"x\"\npin = \"1234\"").is_err());
}
