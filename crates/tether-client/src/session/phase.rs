use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionPhase {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator as _;

    #[test]
    fn test_phase_display() {
        let names: Vec<String> = ConnectionPhase::iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["Disconnected", "Connecting", "Connected", "Error"]);
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(ConnectionPhase::default(), ConnectionPhase::Disconnected);
        assert!(!ConnectionPhase::default().is_connected());
    }
}
