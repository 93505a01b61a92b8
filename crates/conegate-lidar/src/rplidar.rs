use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::protocol::{
    self, Descriptor, DeviceInfo, Health, HealthStatus, DESCRIPTOR_LEN, MEASUREMENT_LEN,
};
use crate::{LidarConfig, RangeSample, RangeSampleSource};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// RPLidar driver over a native async serial port.
pub struct RplidarSource {
    port: SerialStream,
    dev: String,
    buf: Vec<u8>,
    seq: u64,
    /// 0 = unlimited
    max_backlog_bytes: usize,
    motor_pwm: u16,
    scanning: bool,
    resyncs: u64,
}

impl RplidarSource {
    pub fn open(cfg: &LidarConfig) -> Result<Self> {
        let port = tokio_serial::new(&cfg.device, cfg.baud)
            .timeout(RESPONSE_TIMEOUT)
            .open_native_async()
            .with_context(|| format!("open lidar serial {}", cfg.device))?;
        info!("lidar: opened {} @ {}", cfg.device, cfg.baud);
        Ok(Self {
            port,
            dev: cfg.device.clone(),
            buf: Vec::with_capacity(512),
            seq: 0,
            max_backlog_bytes: cfg.max_buf_meas * MEASUREMENT_LEN,
            motor_pwm: cfg.motor_pwm,
            scanning: false,
            resyncs: 0,
        })
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).await.context("write lidar command")?;
        self.port.flush().await.context("flush lidar command")?;
        Ok(())
    }

    async fn read_descriptor(&mut self) -> Result<Descriptor> {
        let mut raw = [0u8; DESCRIPTOR_LEN];
        tokio::time::timeout(RESPONSE_TIMEOUT, self.port.read_exact(&mut raw))
            .await
            .context("lidar descriptor timeout")?
            .context("read lidar descriptor")?;
        Ok(protocol::parse_descriptor(&raw)?)
    }

    async fn read_payload(&mut self, len: u32) -> Result<Vec<u8>> {
        let mut raw = vec![0u8; len as usize];
        tokio::time::timeout(RESPONSE_TIMEOUT, self.port.read_exact(&mut raw))
            .await
            .context("lidar response timeout")?
            .context("read lidar response")?;
        Ok(raw)
    }

    pub async fn info(&mut self) -> Result<DeviceInfo> {
        self.send(&protocol::encode_command(protocol::CMD_GET_INFO)).await?;
        let d = self.read_descriptor().await?;
        d.expect(protocol::INFO_LEN, protocol::INFO_TYPE)?;
        let raw = self.read_payload(d.len).await?;
        Ok(protocol::parse_info(&raw)?)
    }

    pub async fn health(&mut self) -> Result<Health> {
        self.send(&protocol::encode_command(protocol::CMD_GET_HEALTH)).await?;
        let d = self.read_descriptor().await?;
        d.expect(protocol::HEALTH_LEN, protocol::HEALTH_TYPE)?;
        let raw = self.read_payload(d.len).await?;
        Ok(protocol::parse_health(&raw)?)
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.send(&protocol::encode_command(protocol::CMD_RESET)).await?;
        // the core reboots and prints a banner we don't care about
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.clear_input()
    }

    pub async fn start_motor(&mut self) -> Result<()> {
        self.port.write_data_terminal_ready(false).context("lidar DTR")?;
        self.send(&protocol::encode_set_pwm(self.motor_pwm)).await
    }

    pub async fn stop_motor(&mut self) -> Result<()> {
        self.send(&protocol::encode_set_pwm(0)).await?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.port.write_data_terminal_ready(true).context("lidar DTR")?;
        Ok(())
    }

    pub async fn start_scan(&mut self) -> Result<()> {
        let health = self.health().await?;
        match health.status {
            HealthStatus::Good => {}
            HealthStatus::Warning => warn!("lidar: health warning code={}", health.error_code),
            _ => {
                warn!("lidar: health {:?} code={}, resetting", health.status, health.error_code);
                self.reset().await?;
                let health = self.health().await?;
                anyhow::ensure!(
                    health.status != HealthStatus::Error,
                    "lidar still in error state after reset (code={})",
                    health.error_code
                );
            }
        }

        self.start_motor().await?;
        self.send(&protocol::encode_command(protocol::CMD_SCAN)).await?;
        let d = self.read_descriptor().await?;
        d.expect(MEASUREMENT_LEN as u32, protocol::SCAN_TYPE)?;
        anyhow::ensure!(!d.single, protocol::ProtocolError::NotAStream);

        self.buf.clear();
        self.scanning = true;
        info!("lidar: scanning on {}", self.dev);
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.buf.clear();
        self.port.clear(ClearBuffer::Input).context("clear lidar input")?;
        Ok(())
    }

    /// Flush the serial input when the host fell too far behind the sensor.
    fn drop_backlog(&mut self) -> Result<()> {
        if self.max_backlog_bytes == 0 {
            return Ok(());
        }
        let queued = self.port.bytes_to_read().context("lidar bytes_to_read")? as usize;
        if protocol::backlog_exceeded(queued, self.max_backlog_bytes) {
            warn!("lidar: {} bytes queued, dropping backlog", queued);
            self.clear_input()?;
        }
        Ok(())
    }

    async fn next_measurement(&mut self) -> Result<RangeSample> {
        if !self.scanning {
            self.start_scan().await?;
        }
        self.drop_backlog()?;

        loop {
            let (m, skipped) = protocol::take_measurement(&mut self.buf);
            if skipped > 0 {
                self.resyncs += skipped as u64;
                debug!("lidar: resync, skipped {} bytes", skipped);
            }
            if let Some(m) = m {
                self.seq += 1;
                return Ok(RangeSample {
                    seq: self.seq,
                    quality: m.quality,
                    angle_deg: m.angle_deg,
                    distance_mm: m.distance_mm,
                    new_scan: m.new_scan,
                });
            }

            let mut chunk = [0u8; 256];
            let n = self.port.read(&mut chunk).await.context("read lidar")?;
            anyhow::ensure!(n > 0, "lidar serial closed");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.scanning {
            self.send(&protocol::encode_command(protocol::CMD_STOP)).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.scanning = false;
        }
        self.clear_input()?;
        self.stop_motor().await?;
        info!("lidar: stopped ({} resyncs)", self.resyncs);
        Ok(())
    }
}

impl RangeSampleSource for RplidarSource {
    async fn next_sample(&mut self) -> Result<Option<RangeSample>> {
        self.next_measurement().await.map(Some)
    }

    async fn stop(&mut self) -> Result<()> {
        self.shutdown().await
    }
}
