use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    osc::{DEFAULT_OSC_HOST, DEFAULT_OSC_PORT},
    pipeline::pose::common::DecodeConfig,
};

/// Settings loaded from an optional TOML file. Every section and field may be
/// omitted; command-line flags are applied on top afterwards.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OscConfig {
    #[serde(default = "default_osc_host")]
    pub host: String,
    #[serde(default = "default_osc_port")]
    pub port: u16,
    /// Broadcast keypoints at all. Off by default, like the checkbox it replaces.
    #[serde(default)]
    pub enabled: bool,
    /// Echo every outgoing message to the log.
    #[serde(default = "default_true")]
    pub log_messages: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// Defaults to the auto-downloaded model when absent.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_keypoint_threshold")]
    pub keypoint_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

fn default_osc_host() -> String {
    DEFAULT_OSC_HOST.to_string()
}

fn default_osc_port() -> u16 {
    DEFAULT_OSC_PORT
}

fn default_true() -> bool {
    true
}

fn default_camera_width() -> u32 {
    640
}

fn default_camera_height() -> u32 {
    480
}

fn default_confidence_threshold() -> f32 {
    DecodeConfig::default().confidence_threshold
}

fn default_iou_threshold() -> f32 {
    DecodeConfig::default().iou_threshold
}

fn default_keypoint_threshold() -> f32 {
    DecodeConfig::default().keypoint_threshold
}

fn default_max_detections() -> usize {
    DecodeConfig::default().max_detections
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct RenderConfig {
    /// TrueType font for person labels; the bundled DejaVu Sans Bold when absent.
    #[serde(default)]
    pub label_font: Option<String>,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: default_osc_host(),
            port: default_osc_port(),
            enabled: false,
            log_messages: default_true(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            keypoint_threshold: default_keypoint_threshold(),
            max_detections: default_max_detections(),
        }
    }
}

impl ModelConfig {
    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            keypoint_threshold: self.keypoint_threshold,
            max_detections: self.max_detections,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        anyhow::ensure!(!config.osc.host.trim().is_empty(), "osc.host must not be empty");
        anyhow::ensure!(config.osc.port != 0, "osc.port must be in 1..=65535");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.osc.host, "127.0.0.1");
        assert_eq!(config.osc.port, 8000);
        assert!(!config.osc.enabled);
        assert!(config.osc.log_messages);
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
        assert_eq!(config.model.path, None);
        assert_eq!(config.render.label_font, None);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::parse(
            r#"
            [osc]
            port = 9001
            enabled = true

            [model]
            path = "models/custom.onnx"
            keypoint_threshold = 0.3

            [render]
            label_font = "fonts/Mono.ttf"
            "#,
        )
        .unwrap();

        assert_eq!(config.osc.host, "127.0.0.1");
        assert_eq!(config.osc.port, 9001);
        assert!(config.osc.enabled);
        assert_eq!(config.camera, CameraConfig::default());
        assert_eq!(config.model.path.as_deref(), Some("models/custom.onnx"));
        assert_eq!(config.render.label_font.as_deref(), Some("fonts/Mono.ttf"));

        let decode = config.model.decode_config();
        assert_eq!(decode.keypoint_threshold, 0.3);
        assert_eq!(decode.confidence_threshold, DecodeConfig::default().confidence_threshold);
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        assert!(AppConfig::parse("[osc]\nport = 70000").is_err());
        assert!(AppConfig::parse("[osc]\nport = 0").is_err());
    }

    #[test]
    fn blank_host_is_rejected() {
        assert!(AppConfig::parse("[osc]\nhost = \" \"").is_err());
    }
}
