use crate::error::SettingsError;
use crate::types::enums::AutoStopMode;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Capture configuration. Validated on construction and deserialization, immutable
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct ImagingSettings {
    frame_interval_secs: f64,
    auto_stop_mode: AutoStopMode,
    auto_stop_value: u32,
}

#[derive(Deserialize)]
struct RawSettings {
    frame_interval_secs: f64,
    auto_stop_mode: AutoStopMode,
    auto_stop_value: u32,
}

impl TryFrom<RawSettings> for ImagingSettings {
    type Error = SettingsError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        Self::new(raw.frame_interval_secs, raw.auto_stop_mode, raw.auto_stop_value)
    }
}

impl ImagingSettings {
    pub fn new(
        frame_interval_secs: f64,
        auto_stop_mode: AutoStopMode,
        auto_stop_value: u32,
    ) -> Result<Self, SettingsError> {
        if !frame_interval_secs.is_finite() || frame_interval_secs <= 0.0 {
            return Err(SettingsError::InvalidFrameInterval {
                value: frame_interval_secs,
            });
        }
        if auto_stop_mode.is_bounded() && auto_stop_value == 0 {
            return Err(SettingsError::MissingStopValue {
                mode: auto_stop_mode,
            });
        }
        Ok(Self {
            frame_interval_secs,
            auto_stop_mode,
            auto_stop_value,
        })
    }

    /// Runs until stopped by hand.
    pub fn unbounded(frame_interval_secs: f64) -> Result<Self, SettingsError> {
        Self::new(frame_interval_secs, AutoStopMode::Off, 0)
    }

    pub fn timed(frame_interval_secs: f64, minutes: u32) -> Result<Self, SettingsError> {
        Self::new(frame_interval_secs, AutoStopMode::Time, minutes)
    }

    pub fn frame_interval_secs(&self) -> f64 {
        self.frame_interval_secs
    }

    pub fn auto_stop_mode(&self) -> AutoStopMode {
        self.auto_stop_mode
    }

    pub fn auto_stop_value(&self) -> u32 {
        self.auto_stop_value
    }

    /// How long a session with these settings runs. `None` when it has no finite end:
    /// mode `Off`, or a frame budget too large to represent.
    pub fn run_duration(&self) -> Option<TimeDelta> {
        match self.auto_stop_mode {
            AutoStopMode::Off => None,
            AutoStopMode::Time => TimeDelta::try_minutes(i64::from(self.auto_stop_value)),
            AutoStopMode::Frames => {
                let millis =
                    (f64::from(self.auto_stop_value) * self.frame_interval_secs * 1000.0).round();
                if millis >= i64::MAX as f64 {
                    return None;
                }
                TimeDelta::try_milliseconds(millis as i64)
            }
        }
    }
}
