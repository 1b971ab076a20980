//! Modality-tagged detection events.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::interval::{IntervalError, TimeInterval};

/// Signal source that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Motion,
    Gunshot,
    Laughter,
    LoudPeak,
    ShotChange,
    Action,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Motion => "motion",
            Modality::Gunshot => "gunshot",
            Modality::Laughter => "laughter",
            Modality::LoudPeak => "loud_peak",
            Modality::ShotChange => "shot_change",
            Modality::Action => "action",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top classifier label for an action window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionLabel {
    pub label: String,
    /// Probability in `[0, 1]`
    pub confidence: f32,
}

/// A time interval tagged with the modality that detected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedEvent {
    pub modality: Modality,
    #[serde(flatten)]
    pub interval: TimeInterval,
    /// Present only for [`Modality::Action`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionLabel>,
}

impl DetectedEvent {
    pub fn new(modality: Modality, interval: TimeInterval) -> Self {
        Self {
            modality,
            interval,
            action: None,
        }
    }

    /// Event for an instantaneous signal such as a loud peak or shot change.
    pub fn at(modality: Modality, timestamp: f64) -> Result<Self, IntervalError> {
        Ok(Self::new(modality, TimeInterval::point(timestamp)?))
    }

    /// Classifier-derived action event. Confidence is clamped to `[0, 1]`.
    pub fn action(interval: TimeInterval, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            modality: Modality::Action,
            interval,
            action: Some(ActionLabel {
                label: label.into(),
                confidence: confidence.clamp(0.0, 1.0),
            }),
        }
    }

    pub fn start(&self) -> f64 {
        self.interval.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_serde_names() {
        let json = serde_json::to_string(&Modality::LoudPeak).unwrap();
        assert_eq!(json, "\"loud_peak\"");
        assert_eq!(Modality::ShotChange.to_string(), "shot_change");
    }

    #[test]
    fn test_point_event_is_non_empty() {
        let event = DetectedEvent::at(Modality::LoudPeak, 120.0).unwrap();
        assert!(event.interval.start() < event.interval.end());
        assert!(event.interval.contains(120.0));
        assert!(event.action.is_none());
    }

    #[test]
    fn test_action_event_clamps_confidence() {
        let interval = TimeInterval::new(1.0, 2.0).unwrap();
        let event = DetectedEvent::action(interval, "explosion", 1.7);
        assert_eq!(event.modality, Modality::Action);
        assert_eq!(event.action.unwrap().confidence, 1.0);
    }

    #[test]
    fn test_event_json_is_flat() {
        let event = DetectedEvent::new(Modality::Gunshot, TimeInterval::new(1.0, 1.5).unwrap());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["modality"], "gunshot");
        assert_eq!(value["start"], 1.0);
        assert!(value.get("action").is_none());
    }
}
