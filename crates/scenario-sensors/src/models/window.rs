//! Scenario time windows

use serde::{Deserialize, Serialize};

use super::record::Timestamp;
use crate::errors::{SensorError, SensorResult};

/// Time interval plus sampling parameters selecting the records of one scenario
///
/// Only constructible through [`ScenarioWindow::new`] (or deserialization,
/// which goes through the same checks), so every value in circulation has an
/// anchor, a positive duration and a ratio in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScenarioWindowParams", into = "ScenarioWindowParams")]
pub struct ScenarioWindow {
    anchor_timestamp: Timestamp,
    start: Timestamp,
    end: Timestamp,
    extraction_offset: f64,
    duration: f64,
    subsample_ratio: f64,
}

/// Unvalidated wire form of a [`ScenarioWindow`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScenarioWindowParams {
    pub anchor_timestamp: Option<Timestamp>,
    /// Seconds from the anchor to the window start
    #[serde(default)]
    pub extraction_offset: f64,
    /// Window length in seconds
    pub duration: f64,
    #[serde(default = "default_subsample_ratio")]
    pub subsample_ratio: f64,
}

fn default_subsample_ratio() -> f64 {
    1.0
}

impl ScenarioWindow {
    /// Validates and builds a window. `extraction_offset` and `duration` are seconds.
    pub fn new(
        anchor_timestamp: Option<Timestamp>,
        extraction_offset: f64,
        duration: f64,
        subsample_ratio: f64,
    ) -> SensorResult<Self> {
        let anchor_timestamp = anchor_timestamp.ok_or_else(|| {
            SensorError::configuration(
                "scenario window requires an anchor timestamp; none was supplied",
            )
        })?;

        if !extraction_offset.is_finite() {
            return Err(SensorError::configuration(format!(
                "extraction offset must be a finite number of seconds, got {extraction_offset}"
            )));
        }

        if !(duration.is_finite() && duration > 0.0) {
            return Err(SensorError::configuration(format!(
                "window duration must be positive, got {duration}s"
            )));
        }

        if !(subsample_ratio > 0.0 && subsample_ratio <= 1.0) {
            return Err(SensorError::configuration(format!(
                "subsample ratio must be in (0, 1], got {subsample_ratio}"
            )));
        }

        let start = anchor_timestamp
            .checked_offset_by_seconds(extraction_offset)
            .ok_or_else(|| {
                SensorError::configuration(format!(
                    "extraction offset {extraction_offset}s from {anchor_timestamp} overflows the timestamp range"
                ))
            })?;
        let end = start.checked_offset_by_seconds(duration).ok_or_else(|| {
            SensorError::configuration(format!(
                "window of {duration}s from {start} overflows the timestamp range"
            ))
        })?;

        Ok(Self {
            anchor_timestamp,
            start,
            end,
            extraction_offset,
            duration,
            subsample_ratio,
        })
    }

    pub fn anchor_timestamp(&self) -> Timestamp {
        self.anchor_timestamp
    }

    pub fn extraction_offset(&self) -> f64 {
        self.extraction_offset
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn subsample_ratio(&self) -> f64 {
        self.subsample_ratio
    }

    /// Inclusive window start
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive window end
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Keep every `stride`-th record, starting with the first
    pub fn stride(&self) -> usize {
        ((1.0 / self.subsample_ratio).round() as usize).max(1)
    }
}

impl TryFrom<ScenarioWindowParams> for ScenarioWindow {
    type Error = SensorError;

    fn try_from(params: ScenarioWindowParams) -> Result<Self, Self::Error> {
        Self::new(
            params.anchor_timestamp,
            params.extraction_offset,
            params.duration,
            params.subsample_ratio,
        )
    }
}

impl From<ScenarioWindow> for ScenarioWindowParams {
    fn from(window: ScenarioWindow) -> Self {
        Self {
            anchor_timestamp: Some(window.anchor_timestamp),
            extraction_offset: window.extraction_offset,
            duration: window.duration,
            subsample_ratio: window.subsample_ratio,
        }
    }
}
