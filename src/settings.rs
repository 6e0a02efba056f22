//! Settings management for Hand Pose Viewer
//!
//! Settings are stored as JSON in the user's config directory. Missing fields
//! fall back to defaults so older files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::VideoGravity;

/// Overrides the settings file location
pub const SETTINGS_ENV: &str = "HANDPOSE_SETTINGS";

const SETTINGS_DIR: &str = "hand-pose-viewer";
const SETTINGS_FILE: &str = "settings.json";

/// Errors from loading or saving settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no config directory available")]
    NoConfigDir,
}

/// Camera selection and capture format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Device index to open on startup
    pub index: u32,
    /// Connect to the camera automatically on startup
    pub auto_connect: bool,
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Show the video mirrored, like a selfie camera
    pub mirrored: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            auto_connect: true,
            width: 1280,
            height: 720,
            mirrored: true,
        }
    }
}

/// Overlay appearance and filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Joints below this confidence are not drawn
    pub min_confidence: f32,
    /// Draw bend angle labels next to joints
    pub show_angles: bool,
    /// Video placement in the window
    pub gravity: VideoGravity,
    /// Results older than this are hidden (milliseconds)
    pub stale_after_ms: u64,
    /// Skeleton line width in points
    pub line_width: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            show_angles: true,
            gravity: VideoGravity::Fit,
            stale_after_ms: 500,
            line_width: 3.0,
        }
    }
}

/// Memory layout of the model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InputLayout {
    /// (1, height, width, 3)
    #[default]
    Nhwc,
    /// (1, 3, height, width)
    Nchw,
}

/// Hand landmark model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Explicit model path; searched for in `models/` when unset
    pub model_path: Option<PathBuf>,
    /// File name looked up in `models/` directories
    pub model_file: String,
    /// Side of the square model input
    pub input_size: u32,
    pub layout: InputLayout,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Minimum hand presence score to report a hand
    pub presence_threshold: f32,
    /// Explicit palm detector path; searched for in `models/` when unset
    pub palm_model_path: Option<PathBuf>,
    /// Palm detector file name. Without it the landmark model sees the whole frame
    pub palm_model_file: String,
    /// Side of the square palm detector input
    pub palm_input_size: u32,
    /// Minimum palm score to start tracking a hand
    pub palm_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            model_file: "hand_landmark.onnx".to_string(),
            input_size: 224,
            layout: InputLayout::Nhwc,
            intra_threads: 2,
            presence_threshold: 0.5,
            palm_model_path: None,
            palm_model_file: "palm_detection.onnx".to_string(),
            palm_input_size: 192,
            palm_threshold: 0.5,
        }
    }
}

/// Logging options, see [`crate::telemetry::LogConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub default_level: String,
    pub json_format: bool,
    pub file_enabled: bool,
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            json_format: false,
            file_enabled: false,
            file_path: None,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Target render frame rate (15-240)
    pub target_fps: u32,
    pub camera: CameraSettings,
    pub overlay: OverlaySettings,
    pub model: ModelSettings,
    pub logging: LoggingSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            target_fps: 60,
            camera: CameraSettings::default(),
            overlay: OverlaySettings::default(),
            model: ModelSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppSettings {
    /// Clamp values to their valid ranges
    pub fn sanitize(&mut self) {
        self.target_fps = self.target_fps.clamp(15, 240);
        self.camera.width = self.camera.width.max(1);
        self.camera.height = self.camera.height.max(1);
        self.overlay.min_confidence = self.overlay.min_confidence.clamp(0.0, 1.0);
        self.overlay.line_width = self.overlay.line_width.clamp(0.5, 12.0);
        self.model.input_size = self.model.input_size.clamp(32, 1024);
        self.model.intra_threads = self.model.intra_threads.max(1);
        self.model.presence_threshold = self.model.presence_threshold.clamp(0.0, 1.0);
        self.model.palm_input_size = self.model.palm_input_size.clamp(32, 1024);
        self.model.palm_threshold = self.model.palm_threshold.clamp(0.0, 1.0);
    }

    /// Default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        dirs::config_dir().map(|mut p| {
            p.push(SETTINGS_DIR);
            p.push(SETTINGS_FILE);
            p
        })
    }

    /// Load settings from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&contents)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Save settings to a JSON file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load settings from the default location.
    ///
    /// A missing file, or no config directory at all, yields defaults.
    pub fn load() -> Result<Self, SettingsError> {
        match Self::settings_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hand-pose-viewer-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.target_fps, 60);
        assert!(settings.camera.mirrored);
        assert_eq!(settings.model.input_size, 224);
        assert_eq!(settings.model.palm_input_size, 192);
        assert_eq!(settings.overlay.gravity, VideoGravity::Fit);
    }

    #[test]
    fn test_sanitize_clamps() {
        let mut settings = AppSettings::default();
        settings.target_fps = 1000;
        settings.overlay.min_confidence = 2.0;
        settings.model.intra_threads = 0;
        settings.model.palm_threshold = -1.0;
        settings.sanitize();
        assert_eq!(settings.target_fps, 240);
        assert_eq!(settings.overlay.min_confidence, 1.0);
        assert_eq!(settings.model.intra_threads, 1);
        assert_eq!(settings.model.palm_threshold, 0.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "camera": { "index": 2 }, "overlay": { "gravity": "Fill" } }"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.camera.index, 2);
        assert_eq!(settings.camera.width, 1280);
        assert_eq!(settings.overlay.gravity, VideoGravity::Fill);
        assert_eq!(settings.target_fps, 60);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("round_trip.json");
        let mut settings = AppSettings::default();
        settings.camera.mirrored = false;
        settings.model.layout = InputLayout::Nchw;
        settings.model.model_path = Some(PathBuf::from("/opt/models/hand.onnx"));

        settings.save_to_file(&path).unwrap();
        let loaded = AppSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_invalid_json() {
        let path = temp_path("invalid.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppSettings::load_from_file(&path),
            Err(SettingsError::Json(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
