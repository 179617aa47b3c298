use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::analysis::{
    BoundsRect, GeometryConfig, ObjectTarget, PoseConfig, PoseMethod, ProhibitedItem,
    RatioLimits,
};
use crate::frame::PixelFormat;
use crate::ingest::{SourceConfig, DEFAULT_HEIGHT, DEFAULT_SOURCE_URL, DEFAULT_WIDTH};
use crate::session::{OutputVariant, SessionConfig};

const DEFAULT_PROCESS_EVERY: u32 = 1;
const DEFAULT_SCRIPTED_SEED: u64 = 7;
const MAX_FPS_LIMIT: f32 = 240.0;

#[derive(Debug, Deserialize, Default)]
struct ProctorConfigFile {
    source: Option<SourceConfigFile>,
    sampling: Option<SamplingConfigFile>,
    geometry: Option<GeometryConfigFile>,
    pose: Option<PoseConfigFile>,
    objects: Option<ObjectsConfigFile>,
    output: Option<String>,
    annotate: Option<bool>,
    providers: Option<ProvidersConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pixel_format: Option<String>,
    frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    process_every: Option<u32>,
    max_fps: Option<f32>,
    parallel_inference: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct GeometryConfigFile {
    bounds: Option<BoundsRect>,
    gaze_threshold: Option<f32>,
    min_eye_distance_px: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PoseConfigFile {
    method: Option<String>,
    ema_alpha: Option<f32>,
    pitch_threshold_deg: Option<f32>,
    yaw_threshold_deg: Option<f32>,
    ratio: Option<RatioLimits>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectsConfigFile {
    /// Threshold for targets that do not set their own.
    threshold: Option<f32>,
    targets: Option<Vec<ObjectTargetFile>>,
}

#[derive(Debug, Deserialize)]
struct ObjectTargetFile {
    label: String,
    item: String,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProvidersConfigFile {
    kind: Option<String>,
    seed: Option<u64>,
    replay_path: Option<PathBuf>,
}

/// Which bundled providers back the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderKind {
    /// Deterministic scripted exam scene.
    Scripted { seed: u64 },
    /// Recorded detector output, JSON lines keyed by frame sequence.
    Replay { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Scripted {
                seed: DEFAULT_SCRIPTED_SEED,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub process_every: u32,
    pub max_fps: Option<f32>,
    pub parallel_inference: bool,
}

#[derive(Debug, Clone)]
pub struct ProctorConfig {
    pub source: SourceConfig,
    pub sampling: SamplingSettings,
    pub geometry: GeometryConfig,
    pub pose: PoseConfig,
    pub targets: Vec<ObjectTarget>,
    pub output: OutputVariant,
    pub annotate: bool,
    pub providers: ProviderSettings,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            sampling: SamplingSettings {
                process_every: DEFAULT_PROCESS_EVERY,
                max_fps: None,
                parallel_inference: false,
            },
            geometry: GeometryConfig::default(),
            pose: PoseConfig::default(),
            targets: ObjectTarget::defaults(),
            output: OutputVariant::default(),
            annotate: false,
            providers: ProviderSettings::default(),
        }
    }
}

impl ProctorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file, skipping `PROCTOR_CONFIG` but still
    /// applying environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProctorConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let format = match source_file.pixel_format.as_deref() {
            Some(value) => PixelFormat::parse(value)
                .ok_or_else(|| anyhow!("unknown pixel_format '{}' (rgb|bgr)", value))?,
            None => PixelFormat::Rgb8,
        };
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            format,
            frame_limit: source_file.frame_limit,
        };

        let sampling_file = file.sampling.unwrap_or_default();
        let sampling = SamplingSettings {
            process_every: sampling_file.process_every.unwrap_or(DEFAULT_PROCESS_EVERY),
            max_fps: sampling_file.max_fps,
            parallel_inference: sampling_file.parallel_inference.unwrap_or(false),
        };

        let geometry_file = file.geometry.unwrap_or_default();
        let geometry_defaults = GeometryConfig::default();
        let geometry = GeometryConfig {
            bounds: geometry_file.bounds.unwrap_or(geometry_defaults.bounds),
            gaze_threshold: geometry_file
                .gaze_threshold
                .unwrap_or(geometry_defaults.gaze_threshold),
            min_eye_distance_px: geometry_file
                .min_eye_distance_px
                .unwrap_or(geometry_defaults.min_eye_distance_px),
        };

        let pose_file = file.pose.unwrap_or_default();
        let pose_defaults = PoseConfig::default();
        let method = match pose_file.method.as_deref() {
            Some(value) => parse_pose_method(value)?,
            None => pose_defaults.method,
        };
        let pose = PoseConfig {
            method,
            ema_alpha: pose_file.ema_alpha.unwrap_or(pose_defaults.ema_alpha),
            pitch_threshold_deg: pose_file
                .pitch_threshold_deg
                .unwrap_or(pose_defaults.pitch_threshold_deg),
            yaw_threshold_deg: pose_file
                .yaw_threshold_deg
                .unwrap_or(pose_defaults.yaw_threshold_deg),
            ratio: pose_file.ratio.unwrap_or(pose_defaults.ratio),
        };

        let objects_file = file.objects.unwrap_or_default();
        let targets = match objects_file.targets {
            Some(entries) => entries
                .into_iter()
                .map(|entry| {
                    let item = ProhibitedItem::parse(&entry.item).ok_or_else(|| {
                        anyhow!(
                            "unknown prohibited item '{}' for label '{}' (phone|book)",
                            entry.item,
                            entry.label
                        )
                    })?;
                    let threshold = entry
                        .threshold
                        .or(objects_file.threshold)
                        .unwrap_or(crate::analysis::objects::DEFAULT_OBJECT_THRESHOLD);
                    Ok(ObjectTarget::new(entry.label, item, threshold))
                })
                .collect::<Result<Vec<_>>>()?,
            None => {
                let mut targets = ObjectTarget::defaults();
                if let Some(threshold) = objects_file.threshold {
                    for target in &mut targets {
                        target.min_confidence = threshold;
                    }
                }
                targets
            }
        };

        let output = match file.output.as_deref() {
            Some(value) => parse_output(value)?,
            None => OutputVariant::default(),
        };

        let providers_file = file.providers.unwrap_or_default();
        let kind = match providers_file.kind.as_deref().map(str::trim) {
            None | Some("scripted") => ProviderKind::Scripted {
                seed: providers_file.seed.unwrap_or(DEFAULT_SCRIPTED_SEED),
            },
            Some("replay") => ProviderKind::Replay {
                path: providers_file
                    .replay_path
                    .ok_or_else(|| anyhow!("providers.kind = replay needs providers.replay_path"))?,
            },
            Some(other) => return Err(anyhow!("unknown provider kind '{}' (scripted|replay)", other)),
        };

        Ok(Self {
            source,
            sampling,
            geometry,
            pose,
            targets,
            output,
            annotate: file.annotate.unwrap_or(false),
            providers: ProviderSettings { kind },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PROCTOR_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(value) = std::env::var("PROCTOR_PROCESS_EVERY") {
            self.sampling.process_every = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_PROCESS_EVERY must be a positive integer"))?;
        }
        if let Ok(value) = std::env::var("PROCTOR_MAX_FPS") {
            let fps: f32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_MAX_FPS must be a number"))?;
            self.sampling.max_fps = if fps > 0.0 { Some(fps) } else { None };
        }
        if let Ok(value) = std::env::var("PROCTOR_OBJECT_THRESHOLD") {
            let threshold: f32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_OBJECT_THRESHOLD must be a number in [0,1]"))?;
            for target in &mut self.targets {
                target.min_confidence = threshold;
            }
        }
        if let Ok(value) = std::env::var("PROCTOR_EMA_ALPHA") {
            self.pose.ema_alpha = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_EMA_ALPHA must be a number in (0,1]"))?;
        }
        if let Ok(value) = std::env::var("PROCTOR_POSE_METHOD") {
            if !value.trim().is_empty() {
                self.pose.method = parse_pose_method(&value)?;
            }
        }
        if let Ok(value) = std::env::var("PROCTOR_OUTPUT") {
            if !value.trim().is_empty() {
                self.output = parse_output(&value)?;
            }
        }
        if let Ok(path) = std::env::var("PROCTOR_REPLAY_PATH") {
            if !path.trim().is_empty() {
                self.providers.kind = ProviderKind::Replay {
                    path: PathBuf::from(path),
                };
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.sampling.process_every == 0 {
            return Err(anyhow!("process_every must be at least 1"));
        }
        if let Some(fps) = self.sampling.max_fps {
            if !(fps > 0.0 && fps <= MAX_FPS_LIMIT) {
                return Err(anyhow!("max_fps must be in (0, {}]", MAX_FPS_LIMIT));
            }
        }
        if !self.geometry.bounds.is_valid() {
            return Err(anyhow!(
                "bounds rectangle must lie in [0,1] with min < max on both axes"
            ));
        }
        if !(self.geometry.gaze_threshold.is_finite() && self.geometry.gaze_threshold > 0.0) {
            return Err(anyhow!("gaze_threshold must be positive"));
        }
        if !(self.geometry.min_eye_distance_px.is_finite()
            && self.geometry.min_eye_distance_px >= 0.0)
        {
            return Err(anyhow!("min_eye_distance_px must be non-negative"));
        }
        if !(self.pose.ema_alpha > 0.0 && self.pose.ema_alpha <= 1.0) {
            return Err(anyhow!("ema_alpha must be in (0,1]"));
        }
        for limit in [self.pose.pitch_threshold_deg, self.pose.yaw_threshold_deg] {
            if !(limit.is_finite() && limit >= 0.0 && limit < 90.0) {
                return Err(anyhow!("pose thresholds must be in [0,90) degrees"));
            }
        }
        let ratio = &self.pose.ratio;
        if !(ratio.up < ratio.down && ratio.left < ratio.right) {
            return Err(anyhow!("ratio limits must satisfy up < down and left < right"));
        }
        if self.targets.is_empty() {
            return Err(anyhow!("at least one object target is required"));
        }
        for target in &self.targets {
            if target.label.trim().is_empty() {
                return Err(anyhow!("object target labels must be non-empty"));
            }
            if !(0.0..=1.0).contains(&target.min_confidence) {
                return Err(anyhow!(
                    "threshold for '{}' must be in [0,1]",
                    target.label
                ));
            }
        }
        Ok(())
    }

    /// Per-session analysis settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            geometry: self.geometry,
            pose: self.pose,
            targets: self.targets.clone(),
            process_every: self.sampling.process_every,
            max_fps: self.sampling.max_fps,
            parallel_inference: self.sampling.parallel_inference,
            annotate: self.annotate,
        }
    }
}

fn parse_pose_method(value: &str) -> Result<PoseMethod> {
    PoseMethod::parse(value).ok_or_else(|| anyhow!("unknown pose method '{}' (pnp|ratio)", value))
}

fn parse_output(value: &str) -> Result<OutputVariant> {
    OutputVariant::parse(value)
        .ok_or_else(|| anyhow!("unknown output variant '{}' (flags|stream|detailed)", value))
}

fn read_config_file(path: &Path) -> Result<ProctorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
