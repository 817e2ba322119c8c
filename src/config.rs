use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{BackendSelection, ModelParams};
use crate::source::{CameraSettings, UploadLimits};

const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "auto";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MAX_RESULTS: usize = 20;
const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct SightlineConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    overlay: Option<OverlayConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    max_results: Option<usize>,
    label_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    output_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    max_mb: Option<u64>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct SightlineConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub overlay: OverlaySettings,
    pub upload: UploadLimits,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub selection: BackendSelection,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub params: ModelParams,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    /// PNG path for the composited overlay; `None` discards overlays.
    pub output_path: Option<PathBuf>,
}

impl SightlineConfig {
    /// Load from the file named by `SIGHTLINE_CONFIG` (if set), then apply
    /// `SIGHTLINE_*` env overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGHTLINE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SightlineConfigFile) -> Result<Self> {
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let selection = BackendSelection::parse(
            file.model
                .as_ref()
                .and_then(|model| model.backend.as_deref())
                .unwrap_or(DEFAULT_BACKEND),
        )?;
        let params = ModelParams {
            confidence_threshold: file
                .model
                .as_ref()
                .and_then(|model| model.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE),
            max_results: file
                .model
                .as_ref()
                .and_then(|model| model.max_results)
                .unwrap_or(DEFAULT_MAX_RESULTS),
            label_allowlist: file
                .model
                .as_ref()
                .and_then(|model| model.label_allowlist.clone()),
        };
        let model = ModelSettings {
            selection,
            model_path: file.model.as_ref().and_then(|model| model.model_path.clone()),
            labels_path: file.model.and_then(|model| model.labels_path),
            params,
        };
        let overlay = OverlaySettings {
            output_path: file.overlay.and_then(|overlay| overlay.output_path),
        };
        let upload = UploadLimits::from_max_mb(
            file.upload
                .and_then(|upload| upload.max_mb)
                .unwrap_or(DEFAULT_MAX_UPLOAD_MB),
        );
        Ok(Self {
            camera,
            model,
            overlay,
            upload,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("SIGHTLINE_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(fps) = std::env::var("SIGHTLINE_CAMERA_FPS") {
            self.camera.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("SIGHTLINE_CAMERA_FPS must be an integer"))?;
        }
        if let Ok(backend) = std::env::var("SIGHTLINE_BACKEND") {
            if !backend.trim().is_empty() {
                self.model.selection = BackendSelection::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("SIGHTLINE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SIGHTLINE_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.model.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("SIGHTLINE_CONFIDENCE") {
            self.model.params.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("SIGHTLINE_CONFIDENCE must be a number"))?;
        }
        if let Ok(path) = std::env::var("SIGHTLINE_OVERLAY_PATH") {
            if !path.trim().is_empty() {
                self.overlay.output_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(max_mb) = std::env::var("SIGHTLINE_MAX_UPLOAD_MB") {
            let max_mb: u64 = max_mb
                .parse()
                .map_err(|_| anyhow!("SIGHTLINE_MAX_UPLOAD_MB must be an integer"))?;
            self.upload = UploadLimits::from_max_mb(max_mb);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.params.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within 0..=1"));
        }
        if self.model.params.max_results == 0 {
            return Err(anyhow!("max_results must be at least 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.upload.max_bytes == 0 {
            return Err(anyhow!("upload size limit must be greater than zero"));
        }
        if matches!(
            self.model.selection,
            BackendSelection::Require(crate::detect::BackendKind::Tract)
        ) && self.model.model_path.is_none()
        {
            return Err(anyhow!("the tract backend requires model_path"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SightlineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Load the label table for a model: one label per line, index order.
pub fn read_labels_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read labels file {}: {}", path.display(), e))?;
    Ok(raw
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}
