use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavResult, MavType, COMMAND_LONG_DATA,
        RC_CHANNELS_OVERRIDE_DATA,
    },
    MavConnection, MavHeader,
};
use tracing::{debug, info, warn};

use crate::channels::{RcOverride, RC_CHANNEL_COUNT};
use crate::modes;
use crate::FcError;

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Custom mode flag in DO_SET_MODE param1.
const MODE_FLAG_CUSTOM_MODE_ENABLED: f32 = 1.0;

/// Vehicle identity learned from its first heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub system: u8,
    pub component: u8,
    pub mavtype: MavType,
    pub autopilot: MavAutopilot,
}

/// Flight-controller session. Not reconnected: losing it is fatal for the run.
pub struct VehicleLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    hdr: MavHeader,
    target: Option<Target>,
}

impl VehicleLink {
    /// Bind/connect only. Call [`VehicleLink::wait_heartbeat`] before commanding.
    pub fn connect(url: &str, sys_id: u8, comp_id: u8) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;
        info!("FC: listening on {}", url);
        Ok(Self {
            conn,
            hdr: MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 },
            target: None,
        })
    }

    /// Blocks until a vehicle heartbeat arrives. Ground station heartbeats are
    /// ignored so another GCS on the bus can't become the target.
    pub fn wait_heartbeat(&mut self) -> Result<Target> {
        loop {
            let (hdr, msg) = match self.conn.recv() {
                Ok(v) => v,
                Err(e) => {
                    debug!("FC: recv while waiting for heartbeat: {:?}", e);
                    continue;
                }
            };
            if let MavMessage::HEARTBEAT(hb) = msg {
                if matches!(hb.mavtype, MavType::MAV_TYPE_GCS) {
                    continue;
                }
                let target = Target {
                    system: hdr.system_id,
                    component: hdr.component_id,
                    mavtype: hb.mavtype,
                    autopilot: hb.autopilot,
                };
                info!(
                    "FC: heartbeat from system {} component {} ({:?})",
                    target.system, target.component, target.mavtype
                );
                self.target = Some(target);
                return Ok(target);
            }
        }
    }

    pub fn target(&self) -> Result<Target, FcError> {
        self.target.ok_or(FcError::NoHeartbeat)
    }

    pub fn arm(&mut self) -> Result<()> {
        info!("FC: arming");
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    pub fn disarm(&mut self) -> Result<()> {
        info!("FC: disarming");
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7])
    }

    /// Switch custom mode and block until the vehicle acknowledges DO_SET_MODE.
    /// Names come from the mode table of the vehicle type seen in the heartbeat.
    pub fn set_mode(&mut self, name: &str) -> Result<u32> {
        let target = self.target()?;
        let Some(mode_id) = modes::mode_id(target.mavtype, name) else {
            return Err(FcError::UnknownMode {
                requested: name.to_string(),
                valid: modes::mode_names(target.mavtype),
            }
            .into());
        };

        info!("FC: set mode {} ({})", name, mode_id);
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [MODE_FLAG_CUSTOM_MODE_ENABLED, mode_id as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )?;

        let result = self.wait_ack(MavCmd::MAV_CMD_DO_SET_MODE)?;
        if !matches!(result, MavResult::MAV_RESULT_ACCEPTED) {
            warn!("FC: mode {} rejected: {:?}", name, result);
            return Err(FcError::Rejected {
                command: format!("set mode {}", name),
                result: format!("{:?}", result),
            }
            .into());
        }
        info!("FC: mode {} acknowledged", name);
        Ok(mode_id)
    }

    /// Ask the vehicle to stream `message_id` at `frequency_hz`.
    pub fn request_message_interval(&mut self, message_id: u32, frequency_hz: f32) -> Result<()> {
        anyhow::ensure!(frequency_hz > 0.0, "message interval frequency must be > 0");
        let interval_us = 1e6 / frequency_hz;
        info!("FC: request message {} at {}Hz", message_id, frequency_hz);
        self.command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [message_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Reads until a COMMAND_ACK for `command` shows up. Other traffic is discarded.
    fn wait_ack(&mut self, command: MavCmd) -> Result<MavResult> {
        let deadline = Instant::now() + ACK_TIMEOUT;
        while Instant::now() < deadline {
            match self.conn.recv() {
                Ok((_hdr, MavMessage::COMMAND_ACK(ack))) if ack.command == command => {
                    return Ok(ack.result);
                }
                Ok((_hdr, MavMessage::COMMAND_ACK(ack))) => {
                    debug!("FC: ack for {:?} while waiting for {:?}", ack.command, command);
                }
                Ok(_) => {}
                Err(e) => debug!("FC: recv while waiting for ack: {:?}", e),
            }
        }
        anyhow::bail!("no COMMAND_ACK for {:?} within {:?}", command, ACK_TIMEOUT)
    }

    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let target = self.target()?;
        let cmd = COMMAND_LONG_DATA {
            target_system: target.system,
            target_component: target.component,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }
}

impl RcOverride for VehicleLink {
    fn send_rc_override(&mut self, c: &[u16; RC_CHANNEL_COUNT]) -> Result<()> {
        let target = self.target()?;
        let msg = RC_CHANNELS_OVERRIDE_DATA {
            target_system: target.system,
            target_component: target.component,
            chan1_raw: c[0],
            chan2_raw: c[1],
            chan3_raw: c[2],
            chan4_raw: c[3],
            chan5_raw: c[4],
            chan6_raw: c[5],
            chan7_raw: c[6],
            chan8_raw: c[7],
            chan9_raw: c[8],
            chan10_raw: c[9],
            chan11_raw: c[10],
            chan12_raw: c[11],
            chan13_raw: c[12],
            chan14_raw: c[13],
            chan15_raw: c[14],
            chan16_raw: c[15],
            chan17_raw: c[16],
            chan18_raw: c[17],
        };
        self.send(MavMessage::RC_CHANNELS_OVERRIDE(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{MavModeFlag, MavState, COMMAND_ACK_DATA, HEARTBEAT_DATA};
    use std::sync::mpsc;
    use std::thread;

    fn free_udp_port() -> u16 {
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.local_addr().unwrap().port()
    }

    fn heartbeat(mavtype: MavType) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    fn ack(command: MavCmd) -> MavMessage {
        MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
            command,
            result: MavResult::MAV_RESULT_ACCEPTED,
            progress: 0,
            result_param2: 0,
            target_system: 0,
            target_component: 0,
        })
    }

    #[test]
    fn commands_need_a_heartbeat_first() {
        let port = free_udp_port();
        let mut link = VehicleLink::connect(&format!("udpin:127.0.0.1:{}", port), 255, 0).unwrap();
        assert_eq!(link.target(), Err(FcError::NoHeartbeat));
        assert!(link.arm().is_err());
        assert!(link.send_rc_override(&[1500; RC_CHANNEL_COUNT]).is_err());
    }

    #[test]
    fn handshake_mode_ack_and_override_over_udp() {
        let port = free_udp_port();
        let mut link = VehicleLink::connect(&format!("udpin:127.0.0.1:{}", port), 255, 0).unwrap();

        let (tx, rx) = mpsc::channel();
        let vehicle = thread::spawn(move || {
            let conn = mavlink::connect::<MavMessage>(&format!("udpout:127.0.0.1:{}", port)).unwrap();
            let hdr = MavHeader { system_id: 7, component_id: 1, sequence: 0 };
            conn.send(&hdr, &heartbeat(MavType::MAV_TYPE_GCS)).unwrap();
            conn.send(&hdr, &heartbeat(MavType::MAV_TYPE_SUBMARINE)).unwrap();
            loop {
                let (_h, msg) = match conn.recv() {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                match msg {
                    MavMessage::COMMAND_LONG(cmd) if matches!(cmd.command, MavCmd::MAV_CMD_DO_SET_MODE) => {
                        tx.send(format!("mode {}", cmd.param2)).unwrap();
                        // unrelated ack first; the link must keep waiting
                        conn.send(&hdr, &ack(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM)).unwrap();
                        conn.send(&hdr, &ack(MavCmd::MAV_CMD_DO_SET_MODE)).unwrap();
                    }
                    MavMessage::RC_CHANNELS_OVERRIDE(rc) => {
                        tx.send(format!(
                            "rc {} {} {} {}",
                            rc.target_system, rc.chan1_raw, rc.chan3_raw, rc.chan18_raw
                        ))
                        .unwrap();
                        return;
                    }
                    _ => {}
                }
            }
        });

        let target = link.wait_heartbeat().unwrap();
        assert_eq!((target.system, target.component), (7, 1));
        assert!(matches!(target.mavtype, MavType::MAV_TYPE_SUBMARINE));

        assert_eq!(link.set_mode("MANUAL").unwrap(), 19);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "mode 19");

        let err = link.set_mode("WARP").unwrap_err();
        assert!(matches!(err.downcast_ref::<FcError>(), Some(FcError::UnknownMode { .. })));

        let mut frame = [u16::MAX; RC_CHANNEL_COUNT];
        frame[2] = 1800;
        link.send_rc_override(&frame).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "rc 7 65535 1800 65535");

        vehicle.join().unwrap();
    }
}
