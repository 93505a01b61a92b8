pub mod camera;
pub mod exec;
pub mod files;
pub mod subprocess;
pub mod worker;

use std::time::Duration;

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub struct Frame {
    pub image: DynamicImage,
    /// Device or file the frame came from, for logs.
    pub origin: String,
    pub captured_at: OffsetDateTime,
}

impl Frame {
    pub fn new(image: DynamicImage, origin: impl Into<String>) -> Self {
        Self { image, origin: origin.into(), captured_at: OffsetDateTime::now_utc() }
    }
}

/// One detector output row, in the detector's native order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub conf: f32,
    // normalized 0..1
    #[serde(default)]
    pub cx: f32,
    #[serde(default)]
    pub cy: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
    /// Some detectors name the class themselves.
    #[serde(default)]
    pub label: Option<String>,
}

/// Dominant label of one inference pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub label: String,
    pub class_id: i32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub conf: f32,
    pub iou: f32,
    pub max_det: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { conf: 0.25, iou: 0.45, max_det: 1000 }
    }
}

/// Blocking single-frame reader. Called from the worker thread only.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame>;
}

pub trait Detector: Send {
    /// Detections above the thresholds, after NMS, in output order.
    fn detect(&mut self, frame: &Frame, th: &Thresholds) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct FramesConfig {
    /// "camera" | "dir"
    #[serde(default = "default_frames_source")]
    pub source: String,
    pub dir: Option<String>,
    pub camera: Option<camera::CameraConfig>,
}

fn default_frames_source() -> String { "camera".into() }

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Program run once per frame; reads PNG on stdin, prints JSON detections.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default = "default_conf")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_max_det")]
    pub max_detections: usize,
    /// A detector still running after this is killed and the pass fails.
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_conf() -> f32 { 0.25 }
fn default_iou() -> f32 { 0.45 }
fn default_max_det() -> usize { 1000 }
fn default_detector_timeout_ms() -> u64 { 5000 }

impl DetectorConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            conf: self.conf_threshold,
            iou: self.nms_iou_threshold,
            max_det: self.max_detections,
        }
    }
}

pub fn frame_source_from_config(cfg: &FramesConfig) -> Result<Box<dyn FrameSource>> {
    match cfg.source.as_str() {
        "camera" => {
            let cam = cfg.camera.clone().context("frames.camera missing")?;
            Ok(Box::new(camera::CameraSource::new(cam)?))
        }
        "dir" => {
            let dir = cfg.dir.as_ref().context("frames.dir missing")?;
            Ok(Box::new(files::ImageDirSource::open(dir)?))
        }
        other => anyhow::bail!("unknown frames.source: {}", other),
    }
}

pub fn detector_from_config(cfg: &DetectorConfig) -> Result<Box<dyn Detector>> {
    anyhow::ensure!(!cfg.command.trim().is_empty(), "detector.command is empty");
    anyhow::ensure!(cfg.timeout_ms > 0, "detector.timeout_ms must be > 0");
    Ok(Box::new(exec::ExecDetector::new(
        cfg.command.clone(),
        cfg.args.clone(),
        Duration::from_millis(cfg.timeout_ms),
    )))
}
