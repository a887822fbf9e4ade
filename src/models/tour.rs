use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel target meaning "no anchor element, center the tooltip".
pub const CENTERED_TARGET: &str = "body";

/// Enum representing where a hint tooltip sits relative to its target.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HintPosition {
    Top,
    Bottom,
    Left,
    Right,
    #[default]
    Center,
}

/// One positioned tooltip within a tour. The sequence within a tour is fixed
/// at authoring time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    /// Selector-like identifier of the anchor element, or [`CENTERED_TARGET`].
    pub target: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub position: HintPosition,
    /// Fine-adjustment pixel offsets applied after side placement.
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
}

impl Hint {
    pub fn is_centered(&self) -> bool {
        self.target == CENTERED_TARGET || self.position == HintPosition::Center
    }
}

/// A named, ordered sequence of hints bound to one view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TourDefinition {
    pub id: String,
    /// Route/screen identifier the tour applies to.
    pub view: String,
    pub hints: Vec<Hint>,
}

/// Persisted per-user completion flag for a view's tour.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HintProgress {
    pub tutorial_completed: bool,
}

/// Enum representing the states of the tour engine.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TourStatus {
    Idle,
    Showing,
    Completed,
}

/// Per-user state of a live tour, held while the tour is showing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TourState {
    pub user_id: String,
    pub tour_id: String,
    pub view: String,
    pub status: TourStatus,
    pub current_hint_index: usize,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_target_is_centered() {
        let hint = Hint {
            target: CENTERED_TARGET.into(),
            title: "Welcome".into(),
            description: "A quick look around".into(),
            position: HintPosition::Bottom,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        assert!(hint.is_centered());
    }

    #[test]
    fn position_defaults_to_center() {
        let hint: Hint = serde_json::from_str(
            r##"{"target":"#search","title":"Search","description":"Find papers here"}"##,
        )
        .unwrap();
        assert_eq!(hint.position, HintPosition::Center);
        assert_eq!(hint.offset_x, 0.0);
    }
}
