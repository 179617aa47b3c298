use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use proctor_fusion::config::{ProctorConfig, ProviderKind};
use proctor_fusion::{OutputVariant, PixelFormat, PoseMethod, ProhibitedItem};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_SOURCE_URL",
        "PROCTOR_PROCESS_EVERY",
        "PROCTOR_MAX_FPS",
        "PROCTOR_OBJECT_THRESHOLD",
        "PROCTOR_EMA_ALPHA",
        "PROCTOR_POSE_METHOD",
        "PROCTOR_OUTPUT",
        "PROCTOR_REPLAY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "url": "/var/lib/proctor/exam-17.raw",
            "width": 320,
            "height": 240,
            "pixel_format": "bgr",
            "frame_limit": 900
        },
        "sampling": {
            "process_every": 2,
            "max_fps": 15.0,
            "parallel_inference": true
        },
        "geometry": {
            "bounds": {"x_min": 0.2, "x_max": 0.8, "y_min": 0.1, "y_max": 0.9},
            "gaze_threshold": 0.25
        },
        "pose": {
            "method": "ratio",
            "pitch_threshold_deg": 12.0
        },
        "objects": {
            "threshold": 0.5,
            "targets": [
                {"label": "cell phone", "item": "phone"},
                {"label": "tablet", "item": "phone", "threshold": 0.7},
                {"label": "book", "item": "book"}
            ]
        },
        "output": "detailed",
        "providers": {"kind": "scripted", "seed": 99}
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_PROCESS_EVERY", "4");
    std::env::set_var("PROCTOR_EMA_ALPHA", "0.2");
    std::env::set_var("PROCTOR_OUTPUT", "stream");

    let cfg = ProctorConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "/var/lib/proctor/exam-17.raw");
    assert_eq!(cfg.source.width, 320);
    assert_eq!(cfg.source.height, 240);
    assert_eq!(cfg.source.format, PixelFormat::Bgr8);
    assert_eq!(cfg.source.frame_limit, Some(900));
    assert_eq!(cfg.sampling.process_every, 4);
    assert_eq!(cfg.sampling.max_fps, Some(15.0));
    assert!(cfg.sampling.parallel_inference);
    assert_eq!(cfg.geometry.bounds.x_min, 0.2);
    assert_eq!(cfg.geometry.gaze_threshold, 0.25);
    assert_eq!(cfg.pose.method, PoseMethod::Ratio);
    assert_eq!(cfg.pose.pitch_threshold_deg, 12.0);
    assert_eq!(cfg.pose.yaw_threshold_deg, 10.0);
    assert_eq!(cfg.pose.ema_alpha, 0.2);
    assert_eq!(cfg.output, OutputVariant::Stream);
    assert_eq!(cfg.targets.len(), 3);
    assert_eq!(cfg.targets[0].min_confidence, 0.5);
    assert_eq!(cfg.targets[1].item, ProhibitedItem::Phone);
    assert_eq!(cfg.targets[1].min_confidence, 0.7);
    assert_eq!(cfg.providers.kind, ProviderKind::Scripted { seed: 99 });

    let session = cfg.session_config();
    assert_eq!(session.process_every, 4);
    assert_eq!(session.targets.len(), 3);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
output = "flags"

[source]
url = "stub://booth-3"
frame_limit = 120

[pose]
method = "pnp"
ema_alpha = 0.3

[providers]
kind = "replay"
replay_path = "/var/lib/proctor/booth-3.jsonl"
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());

    let cfg = ProctorConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://booth-3");
    assert_eq!(cfg.source.frame_limit, Some(120));
    assert_eq!(cfg.pose.ema_alpha, 0.3);
    assert_eq!(cfg.output, OutputVariant::Flags);
    assert_eq!(
        cfg.providers.kind,
        ProviderKind::Replay {
            path: "/var/lib/proctor/booth-3.jsonl".into()
        }
    );

    clear_env();
}

#[test]
fn env_overrides_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_SOURCE_URL", "stub://override");
    std::env::set_var("PROCTOR_OBJECT_THRESHOLD", "0.65");
    std::env::set_var("PROCTOR_POSE_METHOD", "ratio");
    std::env::set_var("PROCTOR_MAX_FPS", "5");
    std::env::set_var("PROCTOR_REPLAY_PATH", "/tmp/replay.jsonl");

    let cfg = ProctorConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://override");
    assert!(cfg.targets.iter().all(|t| t.min_confidence == 0.65));
    assert_eq!(cfg.pose.method, PoseMethod::Ratio);
    assert_eq!(cfg.sampling.max_fps, Some(5.0));
    assert_eq!(
        cfg.providers.kind,
        ProviderKind::Replay {
            path: "/tmp/replay.jsonl".into()
        }
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_EMA_ALPHA", "1.5");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_PROCESS_EVERY", "zero");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"geometry": {"bounds": {"x_min": 0.7, "x_max": 0.3, "y_min": 0.2, "y_max": 0.8}}}"#)
        .expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    assert!(ProctorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"objects": {"targets": [{"label": "laptop", "item": "computer"}]}}"#)
        .expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    assert!(ProctorConfig::load().is_err());

    clear_env();
}
