use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed or requested power state of a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Unknown,
}

impl PowerState {
    /// Map the `status` string reported by the remote API. Anything other than
    /// `running`/`stopped` is reported as unknown rather than rejected.
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Whether the guest may be executing: running, or we cannot tell.
    pub fn may_be_running(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_remote_status() {
        assert_eq!(PowerState::from_status("running"), PowerState::Running);
        assert_eq!(PowerState::from_status("stopped"), PowerState::Stopped);
        assert_eq!(PowerState::from_status("paused"), PowerState::Unknown);
    }

    #[test]
    fn unknown_may_be_running() {
        assert!(PowerState::Unknown.may_be_running());
        assert!(PowerState::Running.may_be_running());
        assert!(!PowerState::Stopped.may_be_running());
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&PowerState::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }
}
