pub mod channels;
pub mod command;
pub mod mav;
pub mod modes;
pub mod relay;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// MAVLink connection string, e.g. "udpin:0.0.0.0:14567".
    #[serde(default = "default_url")]
    pub url: String,

    /// MAVLink ids we use (companion side). 255/0 is what ground stations use.
    #[serde(default = "default_sys_id")]
    pub sys_id: u8,
    #[serde(default)]
    pub comp_id: u8,

    /// Give up on the startup handshake after this long. None waits forever.
    pub heartbeat_timeout_ms: Option<u64>,

    /// Mode to switch to after the handshake (e.g. "MANUAL").
    pub mode: Option<String>,
    #[serde(default)]
    pub arm_on_start: bool,
    #[serde(default)]
    pub disarm_on_exit: bool,
}

fn default_url() -> String { "udpin:0.0.0.0:14567".into() }
fn default_sys_id() -> u8 { 255 }

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            sys_id: default_sys_id(),
            comp_id: 0,
            heartbeat_timeout_ms: None,
            mode: None,
            arm_on_start: false,
            disarm_on_exit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FcError {
    #[error("unknown mode: {requested} (try: {})", valid.join(", "))]
    UnknownMode { requested: String, valid: Vec<String> },
    #[error("no vehicle heartbeat seen yet")]
    NoHeartbeat,
    #[error("{command} rejected by vehicle: {result}")]
    Rejected { command: String, result: String },
}
