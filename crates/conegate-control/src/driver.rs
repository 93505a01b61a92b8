use std::future::Future;

use anyhow::Result;
use tracing::{debug, info, warn};

use conegate_fc::channels::RcOverride;
use conegate_lidar::RangeSampleSource;

use crate::dispatch::SingleFlightDispatcher;
use crate::gate::{TriggerGate, TriggerZone};
use crate::pipeline::{self, SharedPipeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: u64,
    pub in_zone: u64,
    pub triggers: u64,
    pub spawned: u64,
    pub dropped: u64,
}

/// Sample loop. Ends on `shutdown`, at end of stream, or on a sensor error.
///
/// Whatever the exit, the in-flight worker is awaited, the sensor is stopped and
/// the motion channels are put back to neutral before returning.
pub async fn run<S, L, F>(
    source: &mut S,
    pipe: SharedPipeline<L>,
    zone: TriggerZone,
    shutdown: F,
) -> Result<RunSummary>
where
    S: RangeSampleSource,
    L: RcOverride + 'static,
    F: Future<Output = ()>,
{
    info!(
        "driver: zone {}..{} deg, < {} mm, {:?}",
        zone.angle_low, zone.angle_high, zone.distance_max_mm, zone.mode
    );
    let mut gate = TriggerGate::new(zone);
    let job = {
        let p = pipe.clone();
        move || {
            pipeline::lock(&p).activate();
        }
    };
    let mut dispatcher = SingleFlightDispatcher::new(job);
    let mut summary = RunSummary::default();

    tokio::pin!(shutdown);
    let outcome: Result<()> = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("driver: shutdown requested");
                break Ok(());
            }
            next = source.next_sample() => match next {
                Ok(Some(sample)) => {
                    summary.samples += 1;
                    if gate.zone().in_zone(&sample) {
                        summary.in_zone += 1;
                    }
                    if gate.evaluate(&sample) {
                        debug!(
                            "driver: fire at {:.1} deg {:.0} mm (q {})",
                            sample.angle_deg, sample.distance_mm, sample.quality
                        );
                        dispatcher.on_trigger();
                    }
                }
                Ok(None) => {
                    info!("driver: range stream ended");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        }
    };

    dispatcher.drain().await;
    if let Err(e) = source.stop().await {
        warn!("driver: sensor stop: {:#}", e);
    }
    if let Err(e) = pipeline::lock(&pipe).neutralize() {
        warn!("driver: neutralize: {:#}", e);
    }

    let st = dispatcher.stats();
    summary.triggers = st.triggers;
    summary.spawned = st.spawned;
    summary.dropped = st.dropped;
    info!(
        "driver: {} samples, {} in zone, {} triggers, {} workers, {} dropped",
        summary.samples, summary.in_zone, summary.triggers, summary.spawned, summary.dropped
    );
    outcome.map(|()| summary)
}
