//! Outbound control envelopes.
//!
//! Every command is a JSON object `{"type": "<kind>", "data": {...}}`,
//! sent either to the HTTP command endpoint or wrapped in a realtime
//! `subscribe` event.

use serde::{Deserialize, Serialize};

use crate::types::{DishId, FoodLevel, FrameName};

/// Command kinds accepted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Start (or resume) streaming frames.
    StartStreaming(StartStreamingData),
    /// Freeze on a frame and request detection for it.
    StopStreaming(StopStreamingData),
    /// Submit the verified dish-to-region mapping for one food level.
    UserDishMapping(DishMappingPayload),
}

impl ControlCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartStreaming(_) => "start_streaming",
            Self::StopStreaming(_) => "stop_streaming",
            Self::UserDishMapping(_) => "user_dish_mapping",
        }
    }

    /// `start_streaming` with no metadata, meaning "resume".
    pub fn resume() -> Self {
        Self::StartStreaming(StartStreamingData::default())
    }
}

/// Payload of `start_streaming`. Both fields are present only on the
/// first call of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartStreamingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_details: Option<FlightDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_details: Option<MenuDetails>,
}

impl StartStreamingData {
    pub fn is_resume(&self) -> bool {
        self.flight_details.is_none() && self.menu_details.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightDetails {
    pub flight_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuDetails {
    pub menu_code: String,
    pub menu_item_count: usize,
    pub menu_items: Vec<MenuItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub dish_id: DishId,
    pub dish_name: String,
}

/// Menu reference carried by a mapping submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuRef {
    pub menu_code: String,
}

/// Payload of `stop_streaming`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopStreamingData {
    pub frame_name: FrameName,
    pub food_level: FoodLevel,
}

/// Payload of `user_dish_mapping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishMappingPayload {
    pub flight_details: FlightDetails,
    pub menu_details: MenuRef,
    pub food_level: FoodLevel,
    pub dish_results: Vec<DishResult>,
}

/// One dish in a mapping submission.
///
/// `dish_bbox` is `[x, y, w, h]` in image pixels, or empty when the dish
/// is not present on the tray.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DishResult {
    pub dish_id: DishId,
    pub dish_bbox: Vec<i64>,
}

impl DishResult {
    pub fn is_present(&self) -> bool {
        !self.dish_bbox.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_serializes_empty_data() {
        let value = serde_json::to_value(ControlCommand::resume()).unwrap();
        assert_eq!(value, json!({"type": "start_streaming", "data": {}}));
    }

    #[test]
    fn stop_streaming_shape() {
        let cmd = ControlCommand::StopStreaming(StopStreamingData {
            frame_name: "f1".into(),
            food_level: FoodLevel::new(100).unwrap(),
        });
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({"type": "stop_streaming", "data": {"frame_name": "f1", "food_level": 100}})
        );
        assert_eq!(cmd.kind(), "stop_streaming");
    }

    #[test]
    fn mapping_shape() {
        let cmd = ControlCommand::UserDishMapping(DishMappingPayload {
            flight_details: FlightDetails { flight_number: "EK1".into() },
            menu_details: MenuRef { menu_code: "M1".into() },
            food_level: FoodLevel::new(50).unwrap(),
            dish_results: vec![
                DishResult { dish_id: "a".into(), dish_bbox: vec![1, 2, 3, 4] },
                DishResult { dish_id: "b".into(), dish_bbox: vec![] },
            ],
        });
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "user_dish_mapping");
        assert_eq!(value["data"]["menu_details"], json!({"menu_code": "M1"}));
        assert_eq!(value["data"]["dish_results"][0]["dish_bbox"], json!([1, 2, 3, 4]));
        assert_eq!(value["data"]["dish_results"][1]["dish_bbox"], json!([]));
    }
}
