use conegate_lidar::RangeSample;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Fire on every sample inside the zone.
    #[default]
    Level,
    /// Fire only when a sample enters the zone.
    Edge,
}

/// Forward cone in front of the sensor.
///
/// With `angle_low > angle_high` the cone wraps through 0°, which is the usual
/// setup (340..20). Bounds are exclusive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerZone {
    pub angle_low: f32,
    pub angle_high: f32,
    pub distance_max_mm: f32,
    pub mode: GateMode,
}

impl Default for TriggerZone {
    fn default() -> Self {
        Self { angle_low: 340.0, angle_high: 20.0, distance_max_mm: 1000.0, mode: GateMode::Level }
    }
}

impl TriggerZone {
    pub fn in_zone(&self, s: &RangeSample) -> bool {
        let angle_ok = if self.angle_low > self.angle_high {
            s.angle_deg > self.angle_low || s.angle_deg < self.angle_high
        } else {
            s.angle_deg > self.angle_low && s.angle_deg < self.angle_high
        };
        // 0 is "no return"
        angle_ok && s.distance_mm > 0.0 && s.distance_mm < self.distance_max_mm
    }
}

pub struct TriggerGate {
    zone: TriggerZone,
    was_in_zone: bool,
}

impl TriggerGate {
    pub fn new(zone: TriggerZone) -> Self {
        Self { zone, was_in_zone: false }
    }

    pub fn zone(&self) -> &TriggerZone {
        &self.zone
    }

    pub fn evaluate(&mut self, s: &RangeSample) -> bool {
        let inside = self.zone.in_zone(s);
        let fire = match self.zone.mode {
            GateMode::Level => inside,
            GateMode::Edge => inside && !self.was_in_zone,
        };
        self.was_in_zone = inside;
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(angle: f32, dist: f32) -> RangeSample {
        RangeSample::new(1, 47, angle, dist)
    }

    #[test]
    fn wrapping_cone() {
        let z = TriggerZone::default();
        assert!(z.in_zone(&s(0.0, 500.0)));
        assert!(z.in_zone(&s(359.9, 500.0)));
        assert!(z.in_zone(&s(19.9, 999.0)));
        assert!(!z.in_zone(&s(20.0, 500.0)));
        assert!(!z.in_zone(&s(340.0, 500.0)));
        assert!(!z.in_zone(&s(180.0, 500.0)));
        assert!(!z.in_zone(&s(0.0, 1000.0)));
    }

    #[test]
    fn no_return_never_fires() {
        let mut g = TriggerGate::new(TriggerZone::default());
        for a in [0.0, 5.0, 345.0, 359.0] {
            assert!(!g.evaluate(&s(a, 0.0)));
        }
    }

    #[test]
    fn non_wrapping_cone() {
        let z = TriggerZone { angle_low: 80.0, angle_high: 100.0, ..TriggerZone::default() };
        assert!(z.in_zone(&s(90.0, 10.0)));
        assert!(!z.in_zone(&s(0.0, 10.0)));
        assert!(!z.in_zone(&s(270.0, 10.0)));
    }

    #[test]
    fn level_fires_on_every_inside_sample() {
        let mut g = TriggerGate::new(TriggerZone::default());
        let fired: Vec<bool> =
            [s(0.0, 500.0), s(1.0, 500.0), s(90.0, 500.0), s(2.0, 500.0)].iter().map(|x| g.evaluate(x)).collect();
        assert_eq!(fired, vec![true, true, false, true]);
    }

    #[test]
    fn edge_fires_on_entry_only() {
        let zone: TriggerZone = toml::from_str("mode = \"edge\"").unwrap();
        let mut g = TriggerGate::new(zone);
        let fired: Vec<bool> = [s(0.0, 500.0), s(1.0, 500.0), s(90.0, 500.0), s(2.0, 500.0), s(3.0, 0.0)]
            .iter()
            .map(|x| g.evaluate(x))
            .collect();
        assert_eq!(fired, vec![true, false, false, true, false]);
    }
}
