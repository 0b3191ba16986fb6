//! Configuration file tests

use gaze_estimation::{
    config::{Config, EXAMPLE_CONFIG},
    face_model::FaceTemplate,
    session::GazeProcessor,
    Error,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

#[test]
fn test_config_file_round_trip() {
    let mut config = Config::default();
    config.eyeball.min_points = 150;
    config.eyeball.refresh_time_ms = 2_500;
    config.alignment.max_rms_residual = Some(0.02);
    config.visualization.color = [255, 0, 0];
    config.session.emit_empty_results = false;

    let temp_file = NamedTempFile::new().unwrap();
    config.to_file(temp_file.path()).unwrap();
    let loaded = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(loaded, config);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_example_config_file_loads() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(EXAMPLE_CONFIG.as_bytes()).unwrap();

    let loaded = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(loaded, Config::default());
}

#[test]
fn test_missing_config_file() {
    let result = Config::from_file("/nonexistent/gaze/config.yaml");
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_invalid_config_rejected_by_processor() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "eyeball:\n  radius_bounds: [0.03, 0.01]").unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    let result = GazeProcessor::new(config, Arc::new(FaceTemplate::canonical()));
    assert!(matches!(result, Err(Error::ConfigError(_))));
}
