use std::time::Duration;

use anyhow::{Context, Result};

use crate::replay::ReplaySource;
use crate::rplidar::RplidarSource;
use crate::{LidarConfig, RangeSample, RangeSampleSource};

pub enum RangeSource {
    Rplidar(RplidarSource),
    Replay(ReplaySource),
}

impl RangeSource {
    pub async fn from_config(cfg: &LidarConfig) -> Result<Self> {
        match cfg.source.as_str() {
            "rplidar" => Ok(Self::Rplidar(RplidarSource::open(cfg)?)),
            "replay" => {
                let path = cfg.replay_file.as_ref().context("lidar.replay_file missing")?;
                let interval = Duration::from_millis(cfg.replay_interval_ms);
                Ok(Self::Replay(ReplaySource::open(path, interval).await?))
            }
            other => anyhow::bail!("unknown lidar.source: {}", other),
        }
    }
}

impl RangeSampleSource for RangeSource {
    async fn next_sample(&mut self) -> Result<Option<RangeSample>> {
        match self {
            RangeSource::Rplidar(s) => s.next_sample().await,
            RangeSource::Replay(s) => s.next_sample().await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            RangeSource::Rplidar(s) => s.stop().await,
            RangeSource::Replay(s) => s.stop().await,
        }
    }
}
