pub mod clock;
pub mod controller;
pub mod path;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use clock::{Clock, ClockReading, ManualTimeSource, SystemTimeSource, TimeSource, TimerLoop};
pub use controller::SessionController;
pub use path::{PathAccumulator, PathSink};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Tracking,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn is_tracking(&self) -> bool {
        matches!(self, SessionState::Tracking)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

/// Requests accepted by the session controller. The serialized names match the
/// action names used by status presenters and the command line.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    StartOrResume,
    Pause,
    Stop,
}

impl Command {
    /// Parses the textual form of a command, accepting both the wire names
    /// (`START_OR_RESUME`, `PAUSE`, `STOP`) and the short forms typed on a terminal.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "start_or_resume" | "start" | "resume" => Some(Command::StartOrResume),
            "pause" => Some(Command::Pause),
            "stop" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Elapsed session time at two granularities.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElapsedTime {
    /// Milliseconds accumulated while tracking
    pub total_millis: u64,
    /// `total_millis / 1000`, rounded down
    pub whole_seconds: u64,
}

impl ElapsedTime {
    pub fn from_millis(total_millis: u64) -> Self {
        Self {
            total_millis,
            whole_seconds: total_millis / 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionLabel {
    Pause,
    Resume,
}

impl std::fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionLabel::Pause => write!(f, "Pause"),
            ActionLabel::Resume => write!(f, "Resume"),
        }
    }
}

/// The action a status presenter offers for the current session state, and the
/// command that action dispatches.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusAction {
    pub label: ActionLabel,
    pub command: Command,
}

impl StatusAction {
    pub fn for_state(state: SessionState) -> Self {
        if state.is_tracking() {
            Self {
                label: ActionLabel::Pause,
                command: Command::Pause,
            }
        } else {
            Self {
                label: ActionLabel::Resume,
                command: Command::StartOrResume,
            }
        }
    }
}

/// Immutable point-in-time view of a session, delivered to observers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Publish counter, strictly increasing within one session
    pub sequence: u64,
    pub state: SessionState,
    pub elapsed: ElapsedTime,
    /// Accepted samples in arrival order
    pub path: Arc<Vec<GeoPoint>>,
    pub action: StatusAction,
    /// Unix time in milliseconds of the first start, if the session was started
    pub started_at_ms: Option<u64>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            sequence: 0,
            state: SessionState::Idle,
            elapsed: ElapsedTime::default(),
            path: Arc::new(Vec::new()),
            action: StatusAction::for_state(SessionState::Idle),
            started_at_ms: None,
        }
    }
}

impl Snapshot {
    pub fn path_len(&self) -> usize {
        self.path.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("START_OR_RESUME"), Some(Command::StartOrResume));
        assert_eq!(Command::parse("resume"), Some(Command::StartOrResume));
        assert_eq!(Command::parse(" Pause \n"), Some(Command::Pause));
        assert_eq!(Command::parse("STOP"), Some(Command::Stop));
        assert_eq!(Command::parse("rewind"), None);
    }

    #[test]
    fn test_command_wire_names() {
        assert_eq!(
            serde_json::to_string(&Command::StartOrResume).unwrap(),
            "\"START_OR_RESUME\""
        );
        assert_eq!(serde_json::to_string(&Command::Pause).unwrap(), "\"PAUSE\"");
        assert_eq!(serde_json::to_string(&Command::Stop).unwrap(), "\"STOP\"");
    }

    #[test]
    fn test_action_follows_state() {
        let tracking = StatusAction::for_state(SessionState::Tracking);
        assert_eq!(tracking.label, ActionLabel::Pause);
        assert_eq!(tracking.command, Command::Pause);

        for state in [SessionState::Idle, SessionState::Paused] {
            let action = StatusAction::for_state(state);
            assert_eq!(action.label, ActionLabel::Resume);
            assert_eq!(action.command, Command::StartOrResume);
        }
    }

    #[test]
    fn test_elapsed_floors_seconds() {
        assert_eq!(ElapsedTime::from_millis(0).whole_seconds, 0);
        assert_eq!(ElapsedTime::from_millis(999).whole_seconds, 0);
        assert_eq!(ElapsedTime::from_millis(1000).whole_seconds, 1);
        assert_eq!(ElapsedTime::from_millis(2499).whole_seconds, 2);
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(52.52, 13.405).is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
