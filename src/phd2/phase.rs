use std::fmt;

use super::event::EventKind;
use super::Record;

/// Label value reported for the settling flag alongside the phases.
pub const SETTLING: &str = "Settling";

/// Coarse guiding lifecycle stage, as named by PHD2's `AppState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Idle.
    Stopped,
    /// A star is selected but nothing is running.
    Selected,
    Calibrating,
    Guiding,
    /// Guiding, but the star was lost on the last frame.
    LostLock,
    Paused,
    /// Looping exposures.
    Looping,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Self::Stopped,
        Self::Selected,
        Self::Calibrating,
        Self::Guiding,
        Self::LostLock,
        Self::Paused,
        Self::Looping,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Selected => "Selected",
            Self::Calibrating => "Calibrating",
            Self::Guiding => "Guiding",
            Self::LostLock => "LostLock",
            Self::Paused => "Paused",
            Self::Looping => "Looping",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guiding phase plus the orthogonal settling flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuidingState {
    phase: Option<Phase>,
    settling: bool,
}

impl GuidingState {
    /// Current phase; `None` until an event sets one.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn settling(&self) -> bool {
        self.settling
    }

    /// Applies an event to the state.
    ///
    /// Returns `true` when the event ends a guiding run and the RMS windows
    /// must be cleared.
    pub fn apply(&mut self, event: &EventKind, record: &Record) -> bool {
        match event {
            EventKind::LoopingExposuresStopped => {
                self.phase = Some(Phase::Stopped);
                return true;
            }
            EventKind::LockPositionSet => self.phase = Some(Phase::Selected),
            EventKind::StartCalibration | EventKind::Calibrating => {
                self.phase = Some(Phase::Calibrating);
            }
            EventKind::GuideStep => self.phase = Some(Phase::Guiding),
            EventKind::StarLost => self.phase = Some(Phase::LostLock),
            EventKind::Paused => self.phase = Some(Phase::Paused),
            EventKind::LoopingExposures => self.phase = Some(Phase::Looping),
            EventKind::AppState => {
                if let Some(state) = record.get("State") {
                    let name = state.as_str().unwrap_or_default();
                    self.phase = Phase::from_name(name);
                    if self.phase.is_none() {
                        tracing::debug!(state = %state, "unrecognized app state");
                    }
                    self.settling = false;
                }
            }
            EventKind::SettleBegin | EventKind::Settling => self.settling = true,
            EventKind::SettleDone => self.settling = false,
            EventKind::Version
            | EventKind::CalibrationComplete
            | EventKind::CalibrationFailed
            | EventKind::CalibrationDataFlipped
            | EventKind::StarSelected
            | EventKind::StartGuiding
            | EventKind::GuidingStopped
            | EventKind::Resumed
            | EventKind::GuidingDithered
            | EventKind::LockPositionLost
            | EventKind::LockPositionShiftLimitReached
            | EventKind::Alert
            | EventKind::GuideParamChange
            | EventKind::ConfigurationChange
            | EventKind::Other(_) => {}
        }

        false
    }

    /// One `(status, value)` pair per phase, then one for settling.
    pub fn status_values(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        Phase::ALL
            .into_iter()
            .map(move |p| (p.as_str(), flag(self.phase == Some(p))))
            .chain(std::iter::once((SETTLING, flag(self.settling))))
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn apply(state: &mut GuidingState, name: &str, record: serde_json::Value) -> bool {
        let record = record.as_object().cloned().unwrap_or_default();
        state.apply(&EventKind::from_name(name), &record)
    }

    #[test]
    fn test_phase_round_trip_names() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_name(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_name("Settling"), None);
    }

    #[test]
    fn test_transition_table() {
        let cases = [
            ("LockPositionSet", Phase::Selected),
            ("StartCalibration", Phase::Calibrating),
            ("Calibrating", Phase::Calibrating),
            ("GuideStep", Phase::Guiding),
            ("StarLost", Phase::LostLock),
            ("Paused", Phase::Paused),
            ("LoopingExposures", Phase::Looping),
            ("LoopingExposuresStopped", Phase::Stopped),
        ];

        for (event, expected) in cases {
            let mut state = GuidingState::default();
            apply(&mut state, event, json!({}));
            assert_eq!(state.phase(), Some(expected), "event {event}");
        }
    }

    #[test]
    fn test_looping_stopped_requests_reset() {
        let mut state = GuidingState::default();
        assert!(apply(&mut state, "LoopingExposuresStopped", json!({})));
        assert!(!apply(&mut state, "GuideStep", json!({})));
    }

    #[test]
    fn test_unlisted_events_leave_phase() {
        let mut state = GuidingState::default();
        apply(&mut state, "GuideStep", json!({}));

        for event in ["Version", "GuidingDithered", "ConfigurationChange", "Alert", "Bogus"] {
            apply(&mut state, event, json!({}));
            assert_eq!(state.phase(), Some(Phase::Guiding), "event {event}");
        }
    }

    #[test]
    fn test_app_state_sets_literal_phase_and_clears_settling() {
        let mut state = GuidingState::default();
        apply(&mut state, "SettleBegin", json!({}));
        assert!(state.settling());

        apply(&mut state, "AppState", json!({"State": "Looping"}));
        assert_eq!(state.phase(), Some(Phase::Looping));
        assert!(!state.settling());
    }

    #[test]
    fn test_app_state_without_state_field() {
        let mut state = GuidingState::default();
        apply(&mut state, "Paused", json!({}));
        apply(&mut state, "SettleBegin", json!({}));
        apply(&mut state, "AppState", json!({"Host": "foo"}));

        assert_eq!(state.phase(), Some(Phase::Paused));
        assert!(state.settling());
    }

    #[test]
    fn test_app_state_unknown_value_unsets_phase() {
        let mut state = GuidingState::default();
        apply(&mut state, "GuideStep", json!({}));
        apply(&mut state, "AppState", json!({"State": "Warping"}));
        assert_eq!(state.phase(), None);
    }

    #[test]
    fn test_settling_is_orthogonal() {
        let mut state = GuidingState::default();
        apply(&mut state, "GuideStep", json!({}));
        apply(&mut state, "Settling", json!({"Distance": 1.0}));

        assert_eq!(state.phase(), Some(Phase::Guiding));
        assert!(state.settling());

        apply(&mut state, "SettleDone", json!({"Status": 0}));
        assert_eq!(state.phase(), Some(Phase::Guiding));
        assert!(!state.settling());
    }

    #[test]
    fn test_status_values() {
        let mut state = GuidingState::default();
        apply(&mut state, "GuideStep", json!({}));
        apply(&mut state, "SettleBegin", json!({}));

        let values: Vec<(&str, f64)> = state.status_values().collect();
        assert_eq!(values.len(), 8);
        assert_eq!(values.iter().filter(|(_, v)| *v == 1.0).count(), 2);
        assert!(values.contains(&("Guiding", 1.0)));
        assert!(values.contains(&("Settling", 1.0)));
        assert!(values.contains(&("Stopped", 0.0)));
    }

    #[test]
    fn test_status_values_before_any_phase() {
        let state = GuidingState::default();
        assert!(state.status_values().all(|(_, v)| v == 0.0));
    }
}
