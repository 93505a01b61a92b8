use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tracing::{info, warn};

use conegate_fc::channels::{ActuationChannel, ChannelFrame, RcOverride};
use conegate_fc::command::{self, ActuationCommand};
use conegate_fc::relay::TelemetryRelay;
use conegate_vision::worker::InferenceWorker;
use conegate_vision::DetectionResult;

/// What one activation saw and did.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub detection: Option<DetectionResult>,
    pub command: ActuationCommand,
}

/// Worker plus everything downstream of it. Locked by the running worker only,
/// or by the driver once the dispatcher has drained.
pub struct Pipeline<L> {
    worker: InferenceWorker,
    actuation: ActuationChannel<L>,
    relay: Box<dyn TelemetryRelay>,
    activations: u64,
}

pub type SharedPipeline<L> = Arc<Mutex<Pipeline<L>>>;

impl<L: RcOverride> Pipeline<L> {
    pub fn new(worker: InferenceWorker, actuation: ActuationChannel<L>, relay: Box<dyn TelemetryRelay>) -> Self {
        Self { worker, actuation, relay, activations: 0 }
    }

    pub fn shared(self) -> SharedPipeline<L> {
        Arc::new(Mutex::new(self))
    }

    /// One frame, one detection, at most one channel write.
    pub fn activate(&mut self) -> Activation {
        self.activations += 1;
        let Some(det) = self.worker.run() else {
            return Activation { detection: None, command: ActuationCommand::None };
        };

        let cmd = command::map(&det.label);
        info!("pipeline: label {:?} -> {}", det.label, cmd);
        if let Some(text) = cmd.label() {
            self.relay.notify(text);
            if let Err(e) = self.actuation.apply(cmd) {
                warn!("pipeline: actuation for {} failed: {:#}", cmd, e);
            }
        }
        Activation { detection: Some(det), command: cmd }
    }

    pub fn neutralize(&mut self) -> Result<ChannelFrame> {
        self.actuation.neutralize()
    }

    pub fn actuation(&self) -> &ActuationChannel<L> {
        &self.actuation
    }

    pub fn actuation_mut(&mut self) -> &mut ActuationChannel<L> {
        &mut self.actuation
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }
}

/// The mutex is never contended, so a poisoned lock only means a worker panicked
/// mid-activation; the state inside is still usable.
pub fn lock<L>(p: &SharedPipeline<L>) -> MutexGuard<'_, Pipeline<L>> {
    p.lock().unwrap_or_else(|e| e.into_inner())
}
