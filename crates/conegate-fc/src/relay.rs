use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_serial::{DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_device() -> String { "/dev/ttyUSB1".into() }
fn default_baud() -> u32 { 115200 }
fn default_write_timeout_ms() -> u64 { 200 }

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enable: false,
            device: default_device(),
            baud: default_baud(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Best-effort notification of the command text. Never fails the caller.
pub trait TelemetryRelay: Send {
    fn notify(&mut self, text: &str);
}

/// Raw ASCII to a serial peer, 8-N-1, no framing. The port is opened on first
/// use and reopened after any failure.
pub struct SerialRelay {
    cfg: RelayConfig,
    port: Option<Box<dyn SerialPort>>,
    sent: u64,
    failures: u64,
}

impl SerialRelay {
    pub fn new(cfg: RelayConfig) -> Self {
        Self { cfg, port: None, sent: 0, failures: 0 }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn open(&self) -> Result<Box<dyn SerialPort>> {
        let port = tokio_serial::new(&self.cfg.device, self.cfg.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(self.cfg.write_timeout_ms))
            .open()
            .with_context(|| format!("open relay serial {}", self.cfg.device))?;
        info!("relay: opened {} @ {}", self.cfg.device, self.cfg.baud);
        Ok(port)
    }

    fn try_send(&mut self, text: &str) -> Result<()> {
        let mut port = match self.port.take() {
            Some(p) => p,
            None => self.open()?,
        };
        port.write_all(text.as_bytes()).context("relay write")?;
        port.flush().context("relay flush")?;
        // only a healthy port goes back
        self.port = Some(port);
        Ok(())
    }
}

impl TelemetryRelay for SerialRelay {
    fn notify(&mut self, text: &str) {
        match self.try_send(text) {
            Ok(()) => {
                self.sent += 1;
                debug!("relay: sent {:?}", text);
            }
            Err(e) => {
                self.failures += 1;
                warn!("relay: {:#}", e);
            }
        }
    }
}

/// Used when `[relay] enable = false`.
pub struct NullRelay;

impl TelemetryRelay for NullRelay {
    fn notify(&mut self, text: &str) {
        debug!("relay disabled, dropping {:?}", text);
    }
}

pub fn relay_from_config(cfg: &RelayConfig) -> Box<dyn TelemetryRelay> {
    if cfg.enable {
        Box::new(SerialRelay::new(cfg.clone()))
    } else {
        Box::new(NullRelay)
    }
}
