//! RC override channel model and the actuation table.
//!
//! RC_CHANNELS_OVERRIDE carries 18 raw values. Two raw values are reserved:
//! `65535` leaves a channel alone and `0` hands it back to the normal RC input.
//! Both are modelled as [`ChannelValue`] variants instead of magic numbers.

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::ActuationCommand;

pub const RC_CHANNEL_COUNT: usize = 18;
/// Highest channel id accepted for override writes.
pub const MAX_OVERRIDE_CHANNEL: u8 = 8;

pub const UNCHANGED_RAW: u16 = u16::MAX;
pub const RELEASE_RAW: u16 = 0;

pub const PWM_MIN: u16 = 1100;
pub const PWM_MAX: u16 = 1900;
pub const PWM_NEUTRAL: u16 = 1500;
/// Channels 1..=6 are the motion axes on ArduSub/ArduRover joysticks.
pub const MOTION_CHANNELS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelValue {
    /// Microseconds.
    Pwm(u16),
    /// Not overridden; the vehicle keeps whatever it had.
    Unchanged,
    /// Override disabled, control goes back to the RC receiver.
    Release,
}

impl ChannelValue {
    pub fn raw(self) -> u16 {
        match self {
            Self::Pwm(us) => us,
            Self::Unchanged => UNCHANGED_RAW,
            Self::Release => RELEASE_RAW,
        }
    }

    /// Sentinels and in-range PWM.
    pub fn is_standard(self) -> bool {
        match self {
            Self::Pwm(us) => (PWM_MIN..=PWM_MAX).contains(&us),
            Self::Unchanged | Self::Release => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel {0} does not exist (override channels are 1..=8)")]
    OutOfRange(u8),
}

/// 18 channel slots, 1-based ids in the API, 0-based inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFrame([ChannelValue; RC_CHANNEL_COUNT]);

impl Default for ChannelFrame {
    fn default() -> Self {
        Self::unchanged()
    }
}

impl ChannelFrame {
    pub fn unchanged() -> Self {
        Self([ChannelValue::Unchanged; RC_CHANNEL_COUNT])
    }

    /// Motion channels held at `stopped_pwm`, the rest untouched.
    pub fn neutral(stopped_pwm: u16) -> Self {
        let mut f = Self::unchanged();
        for slot in f.0.iter_mut().take(MOTION_CHANNELS as usize) {
            *slot = ChannelValue::Pwm(stopped_pwm);
        }
        f
    }

    pub fn get(&self, channel_id: u8) -> Option<ChannelValue> {
        let idx = usize::from(channel_id).checked_sub(1)?;
        self.0.get(idx).copied()
    }

    /// Override writes only; ids outside 1..=8 are rejected.
    pub fn set(&mut self, channel_id: u8, value: ChannelValue) -> Result<(), ChannelError> {
        if !(1..=MAX_OVERRIDE_CHANNEL).contains(&channel_id) {
            return Err(ChannelError::OutOfRange(channel_id));
        }
        self.0[usize::from(channel_id - 1)] = value;
        Ok(())
    }

    pub fn raw(&self) -> [u16; RC_CHANNEL_COUNT] {
        self.0.map(ChannelValue::raw)
    }

    /// Ids of slots that are not `Unchanged`.
    pub fn touched(&self) -> Vec<u8> {
        (1..=RC_CHANNEL_COUNT as u8)
            .filter(|id| self.get(*id) != Some(ChannelValue::Unchanged))
            .collect()
    }
}

/// Anything that can put an RC override frame on the wire.
pub trait RcOverride: Send {
    fn send_rc_override(&mut self, channels: &[u16; RC_CHANNEL_COUNT]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChannelWrite {
    pub channel: u8,
    pub value: ChannelValue,
}

/// Command to channel write table. Every entry can be overridden from config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuationMap {
    pub stop: ChannelWrite,
    pub left: ChannelWrite,
    pub right: ChannelWrite,
    pub advance: ChannelWrite,
    pub neutral_pwm: u16,
}

impl Default for ActuationMap {
    fn default() -> Self {
        Self {
            stop: ChannelWrite { channel: 3, value: ChannelValue::Pwm(1800) },
            left: ChannelWrite { channel: 1, value: ChannelValue::Pwm(510) },
            // release hands the channel back to the RC receiver; set a pwm in
            // [actuation] for directional control
            right: ChannelWrite { channel: 1, value: ChannelValue::Release },
            advance: ChannelWrite { channel: 3, value: ChannelValue::Release },
            neutral_pwm: PWM_NEUTRAL,
        }
    }
}

impl ActuationMap {
    pub fn write_for(&self, cmd: ActuationCommand) -> Option<ChannelWrite> {
        match cmd {
            ActuationCommand::Stop => Some(self.stop),
            ActuationCommand::TurnLeft => Some(self.left),
            ActuationCommand::TurnRight => Some(self.right),
            ActuationCommand::Advance => Some(self.advance),
            ActuationCommand::None => None,
        }
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        for w in [self.stop, self.left, self.right, self.advance] {
            ChannelFrame::unchanged().set(w.channel, w.value)?;
        }
        Ok(())
    }
}

/// Vehicle-side view of the override channels.
///
/// Every write is a fresh all-`Unchanged` frame with one slot set, so channels
/// the command doesn't own are never perturbed. `model` remembers the last value
/// written to each channel.
pub struct ActuationChannel<L> {
    link: L,
    map: ActuationMap,
    model: ChannelFrame,
    writes: u64,
}

impl<L: RcOverride> ActuationChannel<L> {
    pub fn new(link: L, map: ActuationMap) -> Self {
        Self { link, map, model: ChannelFrame::unchanged(), writes: 0 }
    }

    pub fn apply(&mut self, cmd: ActuationCommand) -> Result<Option<ChannelFrame>> {
        let Some(w) = self.map.write_for(cmd) else {
            return Ok(None);
        };
        info!("actuation: {} -> channel {} = {:?}", cmd, w.channel, w.value);
        self.write_channel(w.channel, w.value).map(Some)
    }

    /// Rejected ids are logged and leave both the model and the wire untouched.
    pub fn write_channel(&mut self, channel_id: u8, value: ChannelValue) -> Result<ChannelFrame> {
        let mut frame = ChannelFrame::unchanged();
        if let Err(e) = frame.set(channel_id, value) {
            warn!("actuation: {}", e);
            return Err(e.into());
        }
        if !value.is_standard() {
            warn!("actuation: channel {} gets non-standard pwm {}", channel_id, value.raw());
        }
        self.link.send_rc_override(&frame.raw())?;
        self.model.0[usize::from(channel_id - 1)] = value;
        self.writes += 1;
        Ok(frame)
    }

    /// Hold the motion channels at neutral and forget earlier overrides.
    /// Released channels outside the motion set are pulled back to neutral too.
    pub fn neutralize(&mut self) -> Result<ChannelFrame> {
        let mut frame = ChannelFrame::neutral(self.map.neutral_pwm);
        for id in self.released() {
            frame.set(id, ChannelValue::Pwm(self.map.neutral_pwm))?;
        }
        self.link.send_rc_override(&frame.raw())?;
        self.model = frame;
        self.writes += 1;
        info!("actuation: motion channels neutral at {}", self.map.neutral_pwm);
        Ok(frame)
    }

    pub fn model(&self) -> &ChannelFrame {
        &self.model
    }

    /// Channels currently left with the override released.
    pub fn released(&self) -> Vec<u8> {
        (1..=MAX_OVERRIDE_CHANNEL)
            .filter(|id| self.model.get(*id) == Some(ChannelValue::Release))
            .collect()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLink {
        sent: Vec<[u16; RC_CHANNEL_COUNT]>,
    }

    impl RcOverride for RecordingLink {
        fn send_rc_override(&mut self, channels: &[u16; RC_CHANNEL_COUNT]) -> Result<()> {
            self.sent.push(*channels);
            Ok(())
        }
    }

    struct DeadLink;

    impl RcOverride for DeadLink {
        fn send_rc_override(&mut self, _channels: &[u16; RC_CHANNEL_COUNT]) -> Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    fn actuation() -> ActuationChannel<RecordingLink> {
        ActuationChannel::new(RecordingLink::default(), ActuationMap::default())
    }

    #[test]
    fn sentinels_have_wire_values() {
        assert_eq!(ChannelValue::Unchanged.raw(), 65535);
        assert_eq!(ChannelValue::Release.raw(), 0);
        assert_eq!(ChannelValue::Pwm(1800).raw(), 1800);
        assert!(ChannelValue::Pwm(1500).is_standard());
        assert!(!ChannelValue::Pwm(510).is_standard());
    }

    #[test]
    fn out_of_range_ids_are_rejected_without_side_effects() {
        let mut a = actuation();
        for id in [0u8, 9, 18, 255] {
            let err = a.write_channel(id, ChannelValue::Pwm(1600)).unwrap_err();
            assert_eq!(err.downcast_ref::<ChannelError>(), Some(&ChannelError::OutOfRange(id)));
        }
        assert!(a.link_mut().sent.is_empty());
        assert_eq!(*a.model(), ChannelFrame::unchanged());
        assert_eq!(a.writes(), 0);
    }

    #[test]
    fn in_range_write_touches_one_slot() {
        for id in 1..=MAX_OVERRIDE_CHANNEL {
            let mut a = actuation();
            let frame = a.write_channel(id, ChannelValue::Pwm(1600)).unwrap();
            assert_eq!(frame.touched(), vec![id]);
            let raw = a.link_mut().sent[0];
            for (i, v) in raw.iter().enumerate() {
                let expect = if i == usize::from(id - 1) { 1600 } else { UNCHANGED_RAW };
                assert_eq!(*v, expect, "slot {}", i);
            }
        }
    }

    #[test]
    fn default_table_matches_vehicle_protocol() {
        let mut a = actuation();
        assert_eq!(a.apply(ActuationCommand::None).unwrap(), None);
        a.apply(ActuationCommand::Stop).unwrap();
        a.apply(ActuationCommand::TurnLeft).unwrap();
        a.apply(ActuationCommand::TurnRight).unwrap();
        a.apply(ActuationCommand::Advance).unwrap();

        let sent = &a.link_mut().sent;
        assert_eq!(sent.len(), 4);
        assert_eq!((sent[0][2], sent[0][0]), (1800, UNCHANGED_RAW));
        assert_eq!(sent[1][0], 510);
        assert_eq!(sent[2][0], RELEASE_RAW);
        assert_eq!(sent[3][2], RELEASE_RAW);
        assert_eq!(a.released(), vec![1, 3]);
    }

    #[test]
    fn configured_pwm_steers_instead_of_releasing() {
        let map = ActuationMap {
            right: ChannelWrite { channel: 1, value: ChannelValue::Pwm(1300) },
            ..ActuationMap::default()
        };
        let mut a = ActuationChannel::new(RecordingLink::default(), map);
        a.apply(ActuationCommand::TurnRight).unwrap();
        assert_eq!(a.link_mut().sent[0][0], 1300);
        assert!(a.released().is_empty());
    }

    #[test]
    fn neutralize_clears_released_channels() {
        let mut a = actuation();
        a.apply(ActuationCommand::Advance).unwrap();
        assert_eq!(a.released(), vec![3]);

        let frame = a.neutralize().unwrap();
        assert!(a.released().is_empty());
        assert_eq!(frame.touched(), vec![1, 2, 3, 4, 5, 6]);
        let raw = a.link_mut().sent.last().copied().unwrap();
        assert_eq!(raw[..6], [1500; 6]);
        assert!(raw[6..].iter().all(|v| *v == UNCHANGED_RAW));
    }

    #[test]
    fn link_failure_does_not_update_model() {
        let mut a = ActuationChannel::new(DeadLink, ActuationMap::default());
        assert!(a.apply(ActuationCommand::Stop).is_err());
        assert_eq!(*a.model(), ChannelFrame::unchanged());
    }

    #[test]
    fn table_overrides_from_toml() {
        let map: ActuationMap = toml::from_str(
            "[right]\nchannel = 1\nvalue = { pwm = 1300 }\n[advance]\nchannel = 5\nvalue = \"release\"\n",
        )
        .unwrap();
        assert_eq!(map.right, ChannelWrite { channel: 1, value: ChannelValue::Pwm(1300) });
        assert_eq!(map.advance.channel, 5);
        assert_eq!(map.stop, ActuationMap::default().stop);
        map.validate().unwrap();

        let bad: ActuationMap = toml::from_str("[stop]\nchannel = 12\nvalue = { pwm = 1800 }\n").unwrap();
        assert_eq!(bad.validate(), Err(ChannelError::OutOfRange(12)));
    }
}
