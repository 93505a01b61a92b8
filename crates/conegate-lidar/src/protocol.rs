//! RPLidar serial protocol (A1/A2 family).
//!
//! Requests are `A5 <cmd>` or `A5 <cmd> <len> <payload..> <xor>`. Every response
//! starts with a 7 byte descriptor `A5 5A <len:30 | mode:2, LE> <type>`, followed by
//! either a single payload or, for SCAN, an endless run of 5 byte measurements.

use thiserror::Error;

pub const SYNC_BYTE: u8 = 0xA5;
pub const SYNC_BYTE2: u8 = 0x5A;

pub const CMD_STOP: u8 = 0x25;
pub const CMD_RESET: u8 = 0x40;
pub const CMD_SCAN: u8 = 0x20;
pub const CMD_GET_INFO: u8 = 0x50;
pub const CMD_GET_HEALTH: u8 = 0x52;
pub const CMD_SET_PWM: u8 = 0xF0;

pub const DESCRIPTOR_LEN: usize = 7;
pub const MEASUREMENT_LEN: usize = 5;

pub const SCAN_TYPE: u8 = 0x81;
pub const INFO_LEN: u32 = 20;
pub const INFO_TYPE: u8 = 0x04;
pub const HEALTH_LEN: u32 = 3;
pub const HEALTH_TYPE: u8 = 0x06;

pub const DEFAULT_MOTOR_PWM: u16 = 660;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("descriptor sync mismatch: {0:02x} {1:02x}")]
    BadSync(u8, u8),
    #[error("unexpected descriptor: len={got_len} type={got_type:#04x}, expected len={want_len} type={want_type:#04x}")]
    UnexpectedDescriptor { got_len: u32, got_type: u8, want_len: u32, want_type: u8 },
    #[error("descriptor announces a single response, expected a stream")]
    NotAStream,
    #[error("new scan flags mismatch")]
    ScanFlagMismatch,
    #[error("check bit not set")]
    CheckBit,
    #[error("payload too short: {got} < {want}")]
    ShortPayload { got: usize, want: usize },
}

pub fn encode_command(cmd: u8) -> [u8; 2] {
    [SYNC_BYTE, cmd]
}

pub fn encode_command_with_payload(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(SYNC_BYTE);
    out.push(cmd);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    let checksum = out.iter().fold(0u8, |acc, b| acc ^ b);
    out.push(checksum);
    out
}

pub fn encode_set_pwm(pwm: u16) -> Vec<u8> {
    encode_command_with_payload(CMD_SET_PWM, &pwm.to_le_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub len: u32,
    /// Mode 0 is a single response, anything else a continuous stream.
    pub single: bool,
    pub dtype: u8,
}

impl Descriptor {
    pub fn expect(&self, len: u32, dtype: u8) -> Result<(), ProtocolError> {
        if self.len != len || self.dtype != dtype {
            return Err(ProtocolError::UnexpectedDescriptor {
                got_len: self.len,
                got_type: self.dtype,
                want_len: len,
                want_type: dtype,
            });
        }
        Ok(())
    }
}

pub fn parse_descriptor(raw: &[u8; DESCRIPTOR_LEN]) -> Result<Descriptor, ProtocolError> {
    if raw[0] != SYNC_BYTE || raw[1] != SYNC_BYTE2 {
        return Err(ProtocolError::BadSync(raw[0], raw[1]));
    }
    let word = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
    Ok(Descriptor {
        len: word & 0x3FFF_FFFF,
        single: (word >> 30) == 0,
        dtype: raw[6],
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub new_scan: bool,
    pub quality: u8,
    pub angle_deg: f32,
    pub distance_mm: f32,
}

pub fn parse_measurement(raw: &[u8; MEASUREMENT_LEN]) -> Result<Measurement, ProtocolError> {
    let new_scan = raw[0] & 0b01 != 0;
    let inversed = raw[0] & 0b10 != 0;
    if new_scan == inversed {
        return Err(ProtocolError::ScanFlagMismatch);
    }
    if raw[1] & 0b01 != 1 {
        return Err(ProtocolError::CheckBit);
    }
    let angle_q6 = (u32::from(raw[1]) >> 1) | (u32::from(raw[2]) << 7);
    let distance_q2 = u16::from_le_bytes([raw[3], raw[4]]);
    Ok(Measurement {
        new_scan,
        quality: raw[0] >> 2,
        angle_deg: angle_q6 as f32 / 64.0,
        distance_mm: f32::from(distance_q2) / 4.0,
    })
}

/// Takes the next decodable measurement off the front of `buf`.
///
/// Bytes are skipped one at a time until a packet decodes. Returns the measurement,
/// if a whole one was found, and the number of bytes skipped. Skipped and consumed
/// bytes are removed; a trailing partial packet stays for the next read.
pub fn take_measurement(buf: &mut Vec<u8>) -> (Option<Measurement>, usize) {
    let mut skipped = 0;
    let found = loop {
        let Some(window) = buf.get(skipped..skipped + MEASUREMENT_LEN) else { break None };
        let mut raw = [0u8; MEASUREMENT_LEN];
        raw.copy_from_slice(window);
        match parse_measurement(&raw) {
            Ok(m) => break Some(m),
            Err(_) => skipped += 1,
        }
    };
    let consumed = skipped + if found.is_some() { MEASUREMENT_LEN } else { 0 };
    buf.drain(..consumed);
    (found, skipped)
}

/// True when more than `max_bytes` are queued. `max_bytes == 0` never flushes.
pub fn backlog_exceeded(queued: usize, max_bytes: usize) -> bool {
    max_bytes != 0 && queued > max_bytes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: u8,
    pub firmware: (u8, u8),
    pub hardware: u8,
    pub serial: String,
}

pub fn parse_info(raw: &[u8]) -> Result<DeviceInfo, ProtocolError> {
    if raw.len() < INFO_LEN as usize {
        return Err(ProtocolError::ShortPayload { got: raw.len(), want: INFO_LEN as usize });
    }
    Ok(DeviceInfo {
        model: raw[0],
        firmware: (raw[2], raw[1]),
        hardware: raw[3],
        serial: hex::encode_upper(&raw[4..20]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Good,
    Warning,
    Error,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub status: HealthStatus,
    pub error_code: u16,
}

pub fn parse_health(raw: &[u8]) -> Result<Health, ProtocolError> {
    if raw.len() < HEALTH_LEN as usize {
        return Err(ProtocolError::ShortPayload { got: raw.len(), want: HEALTH_LEN as usize });
    }
    let status = match raw[0] {
        0 => HealthStatus::Good,
        1 => HealthStatus::Warning,
        2 => HealthStatus::Error,
        other => HealthStatus::Unknown(other),
    };
    Ok(Health { status, error_code: u16::from_le_bytes([raw[1], raw[2]]) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pwm_carries_xor_checksum() {
        let frame = encode_set_pwm(660);
        // 660 = 0x0294
        assert_eq!(frame[..5], [0xA5, 0xF0, 0x02, 0x94, 0x02]);
        assert_eq!(frame[5], 0xA5 ^ 0xF0 ^ 0x02 ^ 0x94 ^ 0x02);
    }

    #[test]
    fn scan_descriptor_is_a_stream() {
        let d = parse_descriptor(&[0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81]).unwrap();
        assert_eq!(d.len, 5);
        assert!(!d.single);
        assert_eq!(d.dtype, SCAN_TYPE);
        d.expect(5, SCAN_TYPE).unwrap();
    }

    #[test]
    fn health_descriptor_is_single() {
        let d = parse_descriptor(&[0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06]).unwrap();
        assert!(d.single);
        assert!(matches!(
            d.expect(INFO_LEN, INFO_TYPE),
            Err(ProtocolError::UnexpectedDescriptor { got_len: 3, .. })
        ));
    }

    #[test]
    fn descriptor_rejects_bad_sync() {
        assert_eq!(
            parse_descriptor(&[0x00, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81]),
            Err(ProtocolError::BadSync(0x00, 0x5A))
        );
    }

    #[test]
    fn measurement_decodes_angle_and_distance() {
        // quality 15, start of scan, 90 deg, 500 mm
        let m = parse_measurement(&[0x3D, 0x01, 0x2D, 0xD0, 0x07]).unwrap();
        assert!(m.new_scan);
        assert_eq!(m.quality, 15);
        assert_eq!(m.angle_deg, 90.0);
        assert_eq!(m.distance_mm, 500.0);

        // 345.5 deg, no return
        let m = parse_measurement(&[0x3E, 0xC1, 0xAC, 0x00, 0x00]).unwrap();
        assert!(!m.new_scan);
        assert_eq!(m.angle_deg, 345.5);
        assert_eq!(m.distance_mm, 0.0);
    }

    #[test]
    fn measurement_rejects_corrupt_packets() {
        assert_eq!(parse_measurement(&[0x3F, 0x01, 0x2D, 0xD0, 0x07]), Err(ProtocolError::ScanFlagMismatch));
        assert_eq!(parse_measurement(&[0x3C, 0x01, 0x2D, 0xD0, 0x07]), Err(ProtocolError::ScanFlagMismatch));
        assert_eq!(parse_measurement(&[0x3D, 0x00, 0x2D, 0xD0, 0x07]), Err(ProtocolError::CheckBit));
    }

    #[test]
    fn stream_resyncs_past_garbage() {
        let mut buf = vec![0x00, 0xFF, 0x03];
        buf.extend([0x3D, 0x01, 0x2D, 0xD0, 0x07]);
        buf.extend([0x3E, 0xC1, 0xAC, 0x00, 0x00]);
        buf.extend([0x3E, 0x01]);

        let (m, skipped) = take_measurement(&mut buf);
        assert_eq!(skipped, 3);
        let m = m.unwrap();
        assert!(m.new_scan);
        assert_eq!(m.angle_deg, 90.0);

        let (m, skipped) = take_measurement(&mut buf);
        assert_eq!(skipped, 0);
        assert_eq!(m.unwrap().angle_deg, 345.5);

        // partial packet waits for more bytes
        let (m, skipped) = take_measurement(&mut buf);
        assert_eq!((m, skipped), (None, 0));
        assert_eq!(buf, [0x3E, 0x01]);
    }

    #[test]
    fn garbage_without_packet_is_dropped_up_to_the_tail() {
        let mut buf = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x3D];
        let (m, skipped) = take_measurement(&mut buf);
        assert!(m.is_none());
        assert_eq!(skipped, 2);
        assert_eq!(buf.len(), MEASUREMENT_LEN - 1);

        buf.clear();
        assert_eq!(take_measurement(&mut buf), (None, 0));
    }

    #[test]
    fn backlog_flush_threshold() {
        let max = 30000 * MEASUREMENT_LEN;
        assert!(!backlog_exceeded(max, max));
        assert!(backlog_exceeded(max + 1, max));
        assert!(!backlog_exceeded(0, max));
        assert!(!backlog_exceeded(usize::MAX, 0));
    }

    #[test]
    fn info_and_health_payloads() {
        let mut raw = vec![0x18, 0x1D, 0x01, 0x07];
        raw.extend(0u8..16);
        let info = parse_info(&raw).unwrap();
        assert_eq!(info.model, 0x18);
        assert_eq!(info.firmware, (1, 29));
        assert_eq!(info.hardware, 7);
        assert_eq!(info.serial, "000102030405060708090A0B0C0D0E0F");

        let h = parse_health(&[2, 0x34, 0x12]).unwrap();
        assert_eq!(h.status, HealthStatus::Error);
        assert_eq!(h.error_code, 0x1234);
        assert!(parse_health(&[0]).is_err());
    }
}
