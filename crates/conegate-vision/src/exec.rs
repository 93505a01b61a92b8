use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use image::ImageFormat;
use tokio::process::Command;
use tracing::debug;

use crate::subprocess::run_bounded;
use crate::{Detection, Detector, Frame, Thresholds};

/// Runs an external detector program once per frame.
///
/// The frame goes to the child's stdin as PNG; thresholds and frame size are passed
/// as `--conf --iou --max-det --width --height` after the configured args. The child
/// prints one JSON [`Detection`] per line, in its own output order. A child still
/// running after `timeout` is killed and the pass fails.
pub struct ExecDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExecDetector {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self { program, args, timeout }
    }

    fn command(&self, frame: &Frame, th: &Thresholds) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--conf").arg(th.conf.to_string())
            .arg("--iou").arg(th.iou.to_string())
            .arg("--max-det").arg(th.max_det.to_string())
            .arg("--width").arg(frame.image.width().to_string())
            .arg("--height").arg(frame.image.height().to_string());
        cmd
    }
}

impl Detector for ExecDetector {
    fn detect(&mut self, frame: &Frame, th: &Thresholds) -> Result<Vec<Detection>> {
        let mut png = Vec::new();
        frame
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("encode frame")?;

        let out = run_bounded(self.command(frame, th), Some(png), self.timeout)
            .with_context(|| format!("detector {}", self.program))?;

        let dets = parse_detections(&String::from_utf8_lossy(&out.stdout))?;
        debug!("detector: {} detections on {}", dets.len(), frame.origin);
        Ok(dets)
    }
}

/// One JSON object per non-empty line; order is preserved.
pub fn parse_detections(stdout: &str) -> Result<Vec<Detection>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| serde_json::from_str(l).with_context(|| format!("detector output line {}", i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_native_order() {
        let out = "{\"class_id\":2,\"conf\":0.4,\"cx\":0.5,\"cy\":0.5,\"w\":0.1,\"h\":0.1}\n\n\
                   {\"class_id\":0,\"conf\":0.9,\"label\":\"Stop\"}\n";
        let dets = parse_detections(out).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 2);
        assert_eq!(dets[0].label, None);
        assert_eq!(dets[1].label.as_deref(), Some("Stop"));
        assert_eq!(dets[1].w, 0.0);
    }

    #[test]
    fn empty_output_is_no_detection() {
        assert!(parse_detections("").unwrap().is_empty());
        assert!(parse_detections("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn malformed_line_fails_the_pass() {
        assert!(parse_detections("{\"class_id\":1}\n").is_err());
        assert!(parse_detections("1 0.9 0.5 0.5 0.1 0.1\n").is_err());
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> ExecDetector {
        ExecDetector::new("sh".into(), vec!["-c".into(), script.into()], timeout)
    }

    #[cfg(unix)]
    #[test]
    fn runs_program_and_reads_stdout() {
        let frame = Frame::new(image::DynamicImage::new_rgb8(4, 4), "test");
        let mut det = sh("cat >/dev/null; echo '{\"class_id\":1,\"conf\":0.8}'", Duration::from_secs(10));
        let dets = det.detect(&frame, &Thresholds::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
    }

    #[cfg(unix)]
    #[test]
    fn crashing_detector_reports_exit_status() {
        let frame = Frame::new(image::DynamicImage::new_rgb8(1024, 1024), "big");
        let mut det = sh("exit 3", Duration::from_secs(10));
        for _ in 0..5 {
            let msg = format!("{:#}", det.detect(&frame, &Thresholds::default()).unwrap_err());
            assert!(msg.contains("exit status: 3"), "{}", msg);
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_detector_fails_the_pass() {
        let frame = Frame::new(image::DynamicImage::new_rgb8(8, 8), "test");
        let mut det = sh("cat >/dev/null; exec sleep 30", Duration::from_millis(300));
        let start = std::time::Instant::now();
        let err = det.detect(&frame, &Thresholds::default()).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(format!("{:#}", err).contains("timed out"));
    }
}
