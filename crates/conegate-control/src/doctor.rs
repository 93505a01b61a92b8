use anyhow::Result;

use conegate_fc::channels::ActuationMap;
use conegate_lidar::LidarConfig;
use conegate_vision::DetectorConfig;

use crate::gate::TriggerZone;

pub fn check_zone(zone: &TriggerZone) -> Result<()> {
    for a in [zone.angle_low, zone.angle_high] {
        anyhow::ensure!((0.0..=360.0).contains(&a), "zone angle {} outside 0..360", a);
    }
    anyhow::ensure!(zone.angle_low != zone.angle_high, "zone.angle_low == zone.angle_high (empty cone)");
    anyhow::ensure!(zone.distance_max_mm > 0.0, "zone.distance_max_mm must be > 0");
    Ok(())
}

pub fn check_lidar(cfg: &LidarConfig) -> Result<()> {
    match cfg.source.as_str() {
        "rplidar" => {
            anyhow::ensure!(!cfg.device.is_empty(), "lidar.device missing");
            anyhow::ensure!(cfg.baud > 0, "lidar.baud invalid");
        }
        "replay" => anyhow::ensure!(cfg.replay_file.is_some(), "lidar.replay_file missing"),
        other => anyhow::bail!("unknown lidar.source: {}", other),
    }
    Ok(())
}

pub fn check_detector(cfg: &DetectorConfig) -> Result<()> {
    anyhow::ensure!(!cfg.command.trim().is_empty(), "detector.command is empty");
    anyhow::ensure!((0.0..=1.0).contains(&cfg.conf_threshold), "detector.conf_threshold should be 0..1");
    anyhow::ensure!((0.0..=1.0).contains(&cfg.nms_iou_threshold), "detector.nms_iou_threshold should be 0..1");
    anyhow::ensure!(cfg.max_detections > 0, "detector.max_detections must be > 0");
    anyhow::ensure!(cfg.timeout_ms > 0, "detector.timeout_ms must be > 0");
    Ok(())
}

pub fn check_actuation(map: &ActuationMap) -> Result<()> {
    map.validate()?;
    anyhow::ensure!(
        (1100..=1900).contains(&map.neutral_pwm),
        "actuation.neutral_pwm {} outside 1100..1900",
        map.neutral_pwm
    );
    Ok(())
}
