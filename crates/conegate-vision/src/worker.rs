use std::time::Instant;

use tracing::{info, warn};

use crate::{Detection, DetectionResult, Detector, FrameSource, Thresholds};

/// One activation = one frame, one detector pass.
pub struct InferenceWorker {
    frames: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    thresholds: Thresholds,
    class_names: Vec<String>,
}

impl InferenceWorker {
    pub fn new(
        frames: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        thresholds: Thresholds,
        class_names: Vec<String>,
    ) -> Self {
        Self { frames, detector, thresholds, class_names }
    }

    /// Reads exactly one frame and reports the first detection, if any.
    /// Frame and detector faults are logged and reported as no result.
    pub fn run(&mut self) -> Option<DetectionResult> {
        let frame = match self.frames.next_frame() {
            Ok(f) => f,
            Err(e) => {
                warn!("worker: frame read failed: {:#}", e);
                return None;
            }
        };

        let start = Instant::now();
        let dets = match self.detector.detect(&frame, &self.thresholds) {
            Ok(d) => d,
            Err(e) => {
                warn!("worker: detector failed on {}: {:#}", frame.origin, e);
                return None;
            }
        };
        let infer_ms = start.elapsed().as_secs_f32() * 1e3;

        // first row as emitted, no re-ranking
        let Some(first) = dets.first() else {
            info!("worker: nothing detected ({:.1}ms, frame {})", infer_ms, frame.captured_at);
            return None;
        };
        let result = DetectionResult {
            label: self.label_for(first),
            class_id: first.class_id,
            confidence: first.conf,
        };
        info!(
            "worker: {} detected conf={:.2} ({} total, {:.1}ms)",
            result.label, result.confidence, dets.len(), infer_ms
        );
        Some(result)
    }

    fn label_for(&self, det: &Detection) -> String {
        let from_table = usize::try_from(det.class_id).ok().and_then(|i| self.class_names.get(i));
        match (from_table, &det.label) {
            (Some(name), _) => name.trim().to_string(),
            (None, Some(label)) => label.trim().to_string(),
            (None, None) => format!("class{}", det.class_id),
        }
    }
}
