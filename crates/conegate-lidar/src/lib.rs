pub mod protocol;
pub mod replay;
pub mod rplidar;
pub mod source;

use std::future::Future;

use anyhow::Result;
use serde::Deserialize;

/// One range measurement, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSample {
    /// Arrival counter, starts at 1 for the first sample of a source.
    pub seq: u64,
    pub quality: u8,
    /// Degrees, [0, 360).
    pub angle_deg: f32,
    /// Millimetres. 0 means the sensor saw no return.
    pub distance_mm: f32,
    /// First sample of a new revolution.
    pub new_scan: bool,
}

impl RangeSample {
    pub fn new(seq: u64, quality: u8, angle_deg: f32, distance_mm: f32) -> Self {
        Self { seq, quality, angle_deg, distance_mm, new_scan: false }
    }
}

/// Pull-based stream of range samples.
///
/// `next_sample` suspends until a sample is available. `Ok(None)` marks the end of a
/// finite stream (replay files); the hardware driver never ends on its own.
pub trait RangeSampleSource: Send {
    fn next_sample(&mut self) -> impl Future<Output = Result<Option<RangeSample>>> + Send;

    /// Release the device. Called once, on every exit path of the driver loop.
    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidarConfig {
    /// "rplidar" | "replay"
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Queued measurements tolerated before the serial input is flushed.
    /// 0 disables backlog control.
    #[serde(default = "default_max_buf_meas")]
    pub max_buf_meas: usize,
    #[serde(default = "default_motor_pwm")]
    pub motor_pwm: u16,

    pub replay_file: Option<String>,
    /// Delay between replayed samples.
    #[serde(default)]
    pub replay_interval_ms: u64,
}

fn default_source() -> String { "rplidar".into() }
fn default_device() -> String { "/dev/ttyUSB0".into() }
fn default_baud() -> u32 { 115200 }
fn default_max_buf_meas() -> usize { 30000 }
fn default_motor_pwm() -> u16 { protocol::DEFAULT_MOTOR_PWM }

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            device: default_device(),
            baud: default_baud(),
            max_buf_meas: default_max_buf_meas(),
            motor_pwm: default_motor_pwm(),
            replay_file: None,
            replay_interval_ms: 0,
        }
    }
}
