use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Spawned,
    /// A worker was already running; the trigger is discarded, never queued.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub triggers: u64,
    pub spawned: u64,
    pub dropped: u64,
}

/// Clears the busy flag when the worker closure ends, including by panic.
struct Completion(Arc<AtomicBool>);

impl Drop for Completion {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs at most one job at a time on the blocking pool.
pub struct SingleFlightDispatcher<F> {
    job: F,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    triggers: AtomicU64,
    spawned: AtomicU64,
    dropped: AtomicU64,
}

impl<F> SingleFlightDispatcher<F>
where
    F: Fn() + Clone + Send + 'static,
{
    pub fn new(job: F) -> Self {
        Self {
            job,
            busy: Arc::new(AtomicBool::new(false)),
            handle: None,
            triggers: AtomicU64::new(0),
            spawned: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Must be called from inside a tokio runtime. Returns without waiting for the job.
    pub fn on_trigger(&mut self) -> DispatchOutcome {
        self.triggers.fetch_add(1, Ordering::Relaxed);

        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("dispatch: worker busy, trigger dropped");
            return DispatchOutcome::Dropped;
        }

        let guard = Completion(self.busy.clone());
        let job = self.job.clone();
        // the previous handle, if any, belongs to a finished job
        self.handle = Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            job();
        }));
        let n = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        info!("dispatch: worker #{} started", n);
        DispatchOutcome::Spawned
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Wait for the in-flight job. No cancellation.
    pub async fn drain(&mut self) {
        if let Some(h) = self.handle.take() {
            if let Err(e) = h.await {
                warn!("dispatch: worker ended abnormally: {}", e);
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            triggers: self.triggers.load(Ordering::Relaxed),
            spawned: self.spawned.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
