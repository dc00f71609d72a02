use std::fmt;

use serde_json::Value;

use super::rpc::Method;
use super::Record;

/// Kinds of event PHD2 publishes on its event socket.
///
/// Names the exporter does not know are kept as [`EventKind::Other`]; they are
/// still counted but carry no field metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Version,
    LockPositionSet,
    Calibrating,
    CalibrationComplete,
    StarSelected,
    StartGuiding,
    Paused,
    StartCalibration,
    AppState,
    CalibrationFailed,
    CalibrationDataFlipped,
    LockPositionShiftLimitReached,
    LoopingExposures,
    LoopingExposuresStopped,
    SettleBegin,
    Settling,
    SettleDone,
    StarLost,
    GuidingStopped,
    Resumed,
    GuideStep,
    GuidingDithered,
    LockPositionLost,
    Alert,
    GuideParamChange,
    ConfigurationChange,
    Other(String),
}

/// Fields extracted into gauges, with the extra labels attached to them.
#[derive(Debug, Clone, Copy)]
pub struct FieldGroup {
    pub fields: &'static [&'static str],
    pub labels: &'static [&'static str],
}

const fn group(fields: &'static [&'static str]) -> FieldGroup {
    FieldGroup { fields, labels: &[] }
}

const POSITION: &[FieldGroup] = &[group(&["X", "Y"])];

const CALIBRATING: &[FieldGroup] = &[FieldGroup {
    fields: &["dist", "dx", "dy", "step"],
    labels: &["dir"],
}];

const SETTLING: &[FieldGroup] = &[group(&["Distance", "Time", "SettleTime", "StarLocked"])];

const SETTLE_DONE: &[FieldGroup] = &[group(&["Status", "TotalFrames", "DroppedFrames"])];

const STAR_LOST: &[FieldGroup] = &[group(&["StarMass", "SNR", "AvgDist", "ErrorCode"])];

const GUIDE_STEP: &[FieldGroup] = &[
    group(&[
        "dx",
        "dy",
        "RADistanceRaw",
        "DECDistanceRaw",
        "RADistanceGuide",
        "DECDistanceGuide",
        "StarMass",
        "SNR",
        "HFD",
        "AvgDist",
        "ErrorCode",
    ]),
    FieldGroup {
        fields: &["RADuration"],
        labels: &["RADirection", "RALimited"],
    },
    FieldGroup {
        fields: &["DECDuration"],
        labels: &["DECDirection", "DecLimited"],
    },
];

const DITHERED: &[FieldGroup] = &[group(&["dx", "dy"])];

/// Equipment may have changed: refresh everything.
const REFRESH_ALL: &[Method] = &[
    Method::GetPixelScale,
    Method::GetConnected,
    Method::GetCurrentEquipment,
];

/// Looping stopped, possibly because a device dropped.
const REFRESH_CONNECTION: &[Method] = &[Method::GetConnected, Method::GetCurrentEquipment];

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Version" => Self::Version,
            "LockPositionSet" => Self::LockPositionSet,
            "Calibrating" => Self::Calibrating,
            "CalibrationComplete" => Self::CalibrationComplete,
            "StarSelected" => Self::StarSelected,
            "StartGuiding" => Self::StartGuiding,
            "Paused" => Self::Paused,
            "StartCalibration" => Self::StartCalibration,
            "AppState" => Self::AppState,
            "CalibrationFailed" => Self::CalibrationFailed,
            "CalibrationDataFlipped" => Self::CalibrationDataFlipped,
            "LockPositionShiftLimitReached" => Self::LockPositionShiftLimitReached,
            "LoopingExposures" => Self::LoopingExposures,
            "LoopingExposuresStopped" => Self::LoopingExposuresStopped,
            "SettleBegin" => Self::SettleBegin,
            "Settling" => Self::Settling,
            "SettleDone" => Self::SettleDone,
            "StarLost" => Self::StarLost,
            "GuidingStopped" => Self::GuidingStopped,
            "Resumed" => Self::Resumed,
            "GuideStep" => Self::GuideStep,
            "GuidingDithered" => Self::GuidingDithered,
            "LockPositionLost" => Self::LockPositionLost,
            "Alert" => Self::Alert,
            "GuideParamChange" => Self::GuideParamChange,
            "ConfigurationChange" => Self::ConfigurationChange,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Version => "Version",
            Self::LockPositionSet => "LockPositionSet",
            Self::Calibrating => "Calibrating",
            Self::CalibrationComplete => "CalibrationComplete",
            Self::StarSelected => "StarSelected",
            Self::StartGuiding => "StartGuiding",
            Self::Paused => "Paused",
            Self::StartCalibration => "StartCalibration",
            Self::AppState => "AppState",
            Self::CalibrationFailed => "CalibrationFailed",
            Self::CalibrationDataFlipped => "CalibrationDataFlipped",
            Self::LockPositionShiftLimitReached => "LockPositionShiftLimitReached",
            Self::LoopingExposures => "LoopingExposures",
            Self::LoopingExposuresStopped => "LoopingExposuresStopped",
            Self::SettleBegin => "SettleBegin",
            Self::Settling => "Settling",
            Self::SettleDone => "SettleDone",
            Self::StarLost => "StarLost",
            Self::GuidingStopped => "GuidingStopped",
            Self::Resumed => "Resumed",
            Self::GuideStep => "GuideStep",
            Self::GuidingDithered => "GuidingDithered",
            Self::LockPositionLost => "LockPositionLost",
            Self::Alert => "Alert",
            Self::GuideParamChange => "GuideParamChange",
            Self::ConfigurationChange => "ConfigurationChange",
            Self::Other(name) => name,
        }
    }

    /// Whether the event carries the `Host`/`Inst` identity of the guider.
    pub fn carries_identity(&self) -> bool {
        matches!(self, Self::Version | Self::AppState)
    }

    /// Requests to issue after this event.
    pub fn requests(&self) -> &'static [Method] {
        match self {
            Self::AppState | Self::ConfigurationChange => REFRESH_ALL,
            Self::LoopingExposuresStopped => REFRESH_CONNECTION,
            _ => &[],
        }
    }

    /// Payload fields reported as `<event>_<field>` gauges.
    pub fn field_groups(&self) -> &'static [FieldGroup] {
        match self {
            Self::LockPositionSet | Self::StarSelected => POSITION,
            Self::Calibrating => CALIBRATING,
            Self::Settling => SETTLING,
            Self::SettleDone => SETTLE_DONE,
            Self::StarLost => STAR_LOST,
            Self::GuideStep => GUIDE_STEP,
            Self::GuidingDithered => DITHERED,
            Self::Version
            | Self::CalibrationComplete
            | Self::StartGuiding
            | Self::Paused
            | Self::StartCalibration
            | Self::AppState
            | Self::CalibrationFailed
            | Self::CalibrationDataFlipped
            | Self::LockPositionShiftLimitReached
            | Self::LoopingExposures
            | Self::LoopingExposuresStopped
            | Self::SettleBegin
            | Self::GuidingStopped
            | Self::Resumed
            | Self::LockPositionLost
            | Self::Alert
            | Self::GuideParamChange
            | Self::ConfigurationChange
            | Self::Other(_) => &[],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads a numeric field as a sample value. Booleans become `1`/`0`; any
/// other type yields `None`.
pub fn field_value(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
