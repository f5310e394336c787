use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use superres::config::{ConfigOverrides, PipelineConfig};
use superres::flow::{BackendSelection, MotionEstimatorKind};
use superres::ui::UiMode;
use superres::SuperResError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SUPERRES_CONFIG",
        "SUPERRES_INPUT",
        "SUPERRES_OUTPUT",
        "SUPERRES_SCALE",
        "SUPERRES_ITERATIONS",
        "SUPERRES_TEMPORAL",
        "SUPERRES_FPS",
        "SUPERRES_FLOW",
        "SUPERRES_BACKEND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_then_env_then_cli() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "input": "clip.y4m",
        "output": "out/clip_sr.y4m",
        "fps": 30,
        "ui": "plain",
        "superres": {
            "scale": 3,
            "iterations": 12,
            "temporal_radius": 5,
            "flow": "tvl1",
            "btv": { "lambda": 0.05, "radius": 2 }
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SUPERRES_CONFIG", file.path());
    std::env::set_var("SUPERRES_ITERATIONS", "7");
    std::env::set_var("SUPERRES_BACKEND", "cpu");

    let cfg = PipelineConfig::load(ConfigOverrides {
        temporal_radius: Some(2),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.input, "clip.y4m");
    assert_eq!(cfg.output.unwrap().to_str(), Some("out/clip_sr.y4m"));
    assert_eq!(cfg.fps, 30);
    assert_eq!(cfg.ui, UiMode::Plain);
    assert_eq!(cfg.superres.scale, 3);
    assert_eq!(cfg.superres.iterations, 7);
    assert_eq!(cfg.superres.temporal_radius, 2);
    assert_eq!(cfg.superres.flow, MotionEstimatorKind::Tvl1);
    assert_eq!(cfg.superres.backend, BackendSelection::Cpu);
    assert_eq!(cfg.superres.btv.lambda, 0.05);
    assert_eq!(cfg.superres.btv.radius, 2);
    assert_eq!(cfg.superres.btv.alpha, 0.7);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
input = "stub://grid?frames=4"
discard_first_frame = true

[superres]
scale = 2
flow = "simple"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = PipelineConfig::load(ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.input, "stub://grid?frames=4");
    assert_eq!(cfg.superres.scale, 2);
    assert_eq!(cfg.superres.iterations, 20);
    assert_eq!(cfg.superres.flow, MotionEstimatorKind::Simple);
    assert!(cfg.discards_first_frame());

    clear_env();
}

#[test]
fn cli_keep_first_frame_overrides_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("SUPERRES_INPUT", "clip.mp4");

    let cfg = PipelineConfig::load(ConfigOverrides {
        keep_first_frame: true,
        ..ConfigOverrides::default()
    })
    .expect("load config");
    assert_eq!(cfg.input, "clip.mp4");
    assert!(!cfg.discards_first_frame());

    clear_env();
}

#[test]
fn invalid_values_are_config_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let no_input = PipelineConfig::load(ConfigOverrides::default()).unwrap_err();
    assert!(matches!(
        no_input.downcast_ref::<SuperResError>(),
        Some(SuperResError::Config(_))
    ));

    let bad_flow = PipelineConfig::load(ConfigOverrides {
        input: Some("clip.y4m".to_string()),
        flow: Some("optical".to_string()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert!(matches!(
        bad_flow.downcast_ref::<SuperResError>(),
        Some(SuperResError::Config(_))
    ));

    std::env::set_var("SUPERRES_SCALE", "four");
    let bad_scale = PipelineConfig::load(ConfigOverrides {
        input: Some("clip.y4m".to_string()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert!(matches!(
        bad_scale.downcast_ref::<SuperResError>(),
        Some(SuperResError::Config(_))
    ));

    clear_env();
}
