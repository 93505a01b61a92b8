use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuationCommand {
    Stop,
    TurnLeft,
    TurnRight,
    Advance,
    /// No actuation.
    None,
}

impl ActuationCommand {
    /// Detector vocabulary; exact match after trimming.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Stop" => Self::Stop,
            "Left" => Self::TurnLeft,
            "Right" => Self::TurnRight,
            "Go" => Self::Advance,
            _ => Self::None,
        }
    }

    /// The vocabulary word for this command, as relayed to the serial peer.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Stop => Some("Stop"),
            Self::TurnLeft => Some("Left"),
            Self::TurnRight => Some("Right"),
            Self::Advance => Some("Go"),
            Self::None => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

impl fmt::Display for ActuationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label().unwrap_or("none"))
    }
}

pub fn map(label: &str) -> ActuationCommand {
    ActuationCommand::from_label(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_maps_to_commands() {
        assert_eq!(map("Stop"), ActuationCommand::Stop);
        assert_eq!(map("Left"), ActuationCommand::TurnLeft);
        assert_eq!(map("Right"), ActuationCommand::TurnRight);
        assert_eq!(map("Go"), ActuationCommand::Advance);
        assert_eq!(map("  Go\n"), ActuationCommand::Advance);
    }

    #[test]
    fn everything_else_is_none() {
        for label in ["", " ", "stop", "STOP", "Go!", "Stop Detected", "person", "class3", "Left Right"] {
            assert!(map(label).is_none(), "{:?} should not actuate", label);
        }
    }

    #[test]
    fn label_round_trips_vocabulary() {
        for cmd in [ActuationCommand::Stop, ActuationCommand::TurnLeft, ActuationCommand::TurnRight, ActuationCommand::Advance] {
            assert_eq!(map(cmd.label().unwrap()), cmd);
        }
        assert_eq!(ActuationCommand::None.label(), None);
        assert_eq!(ActuationCommand::None.to_string(), "none");
    }
}
