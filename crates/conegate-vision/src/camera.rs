use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::subprocess::run_bounded;
use crate::{Frame, FrameSource};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg"
    pub device: String, // /dev/video0 (v4l2)
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_capture_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_capture_timeout_ms() -> u64 { 3000 }

/// Grabs one JPEG per call through an external capture tool and decodes it.
/// Each call blocks for one capture, which is the camera's natural cadence.
pub struct CameraSource {
    cfg: CameraConfig,
}

impl CameraSource {
    pub fn new(cfg: CameraConfig) -> Result<Self> {
        anyhow::ensure!(cfg.timeout_ms > 0, "camera.timeout_ms must be > 0");
        match cfg.mode.as_str() {
            "libcamera-jpeg" | "v4l2-mjpeg" => Ok(Self { cfg }),
            other => anyhow::bail!("unknown camera.mode: {}", other),
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Frame> {
        let jpeg = capture_jpeg(&self.cfg)?;
        let image = image::load_from_memory(&jpeg).context("decode jpeg")?;
        Ok(Frame::new(image, self.cfg.device.clone()))
    }
}

pub fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let cmd = capture_command(cfg)?;
    debug!("capture: {:?}", cmd.as_std().get_program());
    let out = run_bounded(cmd, None, Duration::from_millis(cfg.timeout_ms)).context("capture")?;
    anyhow::ensure!(!out.stdout.is_empty(), "capture returned no data");
    Ok(out.stdout)
}

fn capture_command(cfg: &CameraConfig) -> Result<Command> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    let cmd = match cfg.mode.as_str() {
        "libcamera-jpeg" => {
            let mut cmd = Command::new("libcamera-still");
            cmd.args([
                "-n",                 // no preview
                "-t", "1",            // 1ms
                "--width", &cfg.width.to_string(),
                "--height", &cfg.height.to_string(),
                "-o", "-",            // stdout
            ]);
            cmd
        }
        "v4l2-mjpeg" => {
            let mut cmd = Command::new("ffmpeg");
            cmd.args([
                "-hide_banner", "-loglevel", "error",
                "-f", "video4linux2",
                "-input_format", "mjpeg",
                "-video_size", &size,
                "-i", &cfg.device,
                "-vframes", "1",
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-",
            ]);
            cmd
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    };
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: &str) -> CameraConfig {
        CameraConfig { mode: mode.into(), device: "/dev/video2".into(), width: 640, height: 480, timeout_ms: 3000 }
    }

    #[test]
    fn v4l2_command_targets_device() {
        let cmd = capture_command(&cfg("v4l2-mjpeg")).unwrap();
        assert_eq!(cmd.as_std().get_program(), "ffmpeg");
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/dev/video2"));
        assert!(args.windows(2).any(|w| w[0] == "-video_size" && w[1] == "640x480"));
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(CameraSource::new(cfg("gstreamer")).is_err());
        assert!(CameraSource::new(cfg("libcamera-jpeg")).is_ok());
    }

    #[test]
    fn timeout_defaults_when_omitted() {
        let cam: CameraConfig = toml::from_str("mode = \"v4l2-mjpeg\"\ndevice = \"/dev/video0\"\nwidth = 320\nheight = 240\n").unwrap();
        assert_eq!(cam.timeout_ms, 3000);
        assert!(CameraSource::new(CameraConfig { timeout_ms: 0, ..cam }).is_err());
    }
}
