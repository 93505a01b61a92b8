use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

use crate::{RangeSample, RangeSampleSource};

/// Replays recorded samples from a text file, one `quality,angle,distance`
/// (or `angle,distance`) per line. The stream ends at end of file.
pub struct ReplaySource {
    lines: Lines<BufReader<File>>,
    path: String,
    line_no: usize,
    seq: u64,
    interval: Duration,
}

impl ReplaySource {
    pub async fn open(path: &str, interval: Duration) -> Result<Self> {
        let f = File::open(path).await.with_context(|| format!("open replay file {}", path))?;
        info!("lidar: replaying {}", path);
        Ok(Self {
            lines: BufReader::new(f).lines(),
            path: path.to_string(),
            line_no: 0,
            seq: 0,
            interval,
        })
    }
}

/// `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<(u8, f32, f32)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let (quality, angle, dist) = match fields.as_slice() {
        [q, a, d] => (q.parse::<u8>().context("quality")?, *a, *d),
        [a, d] => (0, *a, *d),
        other => anyhow::bail!("expected 2 or 3 fields, got {}", other.len()),
    };
    let angle: f32 = angle.parse().context("angle")?;
    let dist: f32 = dist.parse().context("distance")?;
    anyhow::ensure!(angle.is_finite() && dist.is_finite() && dist >= 0.0, "sample out of range");
    Ok(Some((quality, angle.rem_euclid(360.0), dist)))
}

impl RangeSampleSource for ReplaySource {
    async fn next_sample(&mut self) -> Result<Option<RangeSample>> {
        loop {
            let Some(line) = self.lines.next_line().await.with_context(|| format!("read {}", self.path))? else {
                return Ok(None);
            };
            self.line_no += 1;
            match parse_line(&line) {
                Ok(Some((quality, angle, dist))) => {
                    if !self.interval.is_zero() {
                        tokio::time::sleep(self.interval).await;
                    }
                    self.seq += 1;
                    return Ok(Some(RangeSample::new(self.seq, quality, angle, dist)));
                }
                Ok(None) => continue,
                Err(e) => warn!("replay {}:{}: skipped: {:#}", self.path, self.line_no, e),
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        info!("lidar: replay stopped after {} samples", self.seq);
        Ok(())
    }
}
