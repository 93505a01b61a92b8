//! ArduPilot custom-mode tables, selected by the vehicle type in the heartbeat.

use mavlink::common::MavType;

const SUB_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("CIRCLE", 7),
    ("SURFACE", 9),
    ("POSHOLD", 16),
    ("MANUAL", 19),
    ("MOTOR_DETECT", 20),
];

const ROVER_MODES: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("ACRO", 1),
    ("LEARNING", 2),
    ("STEERING", 3),
    ("HOLD", 4),
    ("LOITER", 5),
    ("FOLLOW", 6),
    ("SIMPLE", 7),
    ("AUTO", 10),
    ("RTL", 11),
    ("SMART_RTL", 12),
    ("GUIDED", 15),
    ("INITIALISING", 16),
];

const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("POSITION", 8),
    ("LAND", 9),
    ("OF_LOITER", 10),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
];

pub fn mode_table(mavtype: MavType) -> &'static [(&'static str, u32)] {
    match mavtype {
        MavType::MAV_TYPE_SUBMARINE => SUB_MODES,
        MavType::MAV_TYPE_GROUND_ROVER | MavType::MAV_TYPE_SURFACE_BOAT => ROVER_MODES,
        _ => COPTER_MODES,
    }
}

/// Exact, case-sensitive lookup.
pub fn mode_id(mavtype: MavType, name: &str) -> Option<u32> {
    mode_table(mavtype).iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
}

pub fn mode_names(mavtype: MavType) -> Vec<String> {
    mode_table(mavtype).iter().map(|(n, _)| n.to_string()).collect()
}
