//! Per-capture region state: detections, manual rectangles, and the
//! missing-dish budget that bounds manual drawing.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::CoreError;
use crate::frame::DetectionBox;
use crate::geometry::BoundingBox;
use crate::palette::{
    all_used_colors, color_for_detection_index, next_available_color, Color, PALETTE_SIZE,
};
use crate::types::ManualRectId;

/// A model-proposed region on the frozen frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Position in the original detection list, stable within a capture.
    pub index: usize,
    pub bbox: BoundingBox,
    pub color: Color,
    pub confidence: Option<f64>,
}

/// An operator-drawn region on the frozen frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualRectangle {
    pub id: ManualRectId,
    pub bbox: BoundingBox,
    pub color: Color,
}

/// Where the region holding a color came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSource {
    Detection,
    Manual,
}

/// Regions attached to one frozen frame.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    detections: Vec<DetectionResult>,
    manual: Vec<ManualRectangle>,
    missing_dishes: u32,
    results_received: bool,
    next_manual_id: ManualRectId,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> &[DetectionResult] {
        &self.detections
    }

    pub fn manual(&self) -> &[ManualRectangle] {
        &self.manual
    }

    pub fn missing_dishes(&self) -> u32 {
        self.missing_dishes
    }

    pub fn results_received(&self) -> bool {
        self.results_received
    }

    /// How many more manual rectangles may be drawn.
    pub fn remaining(&self) -> u32 {
        self.missing_dishes.saturating_sub(self.manual.len() as u32)
    }

    /// Colors held by any active region.
    pub fn used_colors(&self) -> BTreeSet<Color> {
        self.detections
            .iter()
            .map(|d| d.color)
            .chain(self.manual.iter().map(|m| m.color))
            .collect()
    }

    /// Colors offered to the operator when mapping dishes.
    pub fn ordered_colors(&self) -> Vec<Color> {
        all_used_colors(
            self.detections.iter().map(|d| d.color),
            self.manual.iter().map(|m| m.color),
        )
    }

    /// Replace detections with a freshly decoded batch.
    ///
    /// Colors come from [`color_for_detection_index`]. Boxes past the end
    /// of the palette or with non-finite coordinates are dropped so no two
    /// active regions ever share a color.
    pub fn load_detections(&mut self, boxes: &[DetectionBox], missing_dishes: u32) {
        if boxes.len() > PALETTE_SIZE {
            tracing::warn!(
                received = boxes.len(),
                kept = PALETTE_SIZE,
                "More detections than palette colors, extra boxes dropped",
            );
        }
        self.detections = boxes
            .iter()
            .take(PALETTE_SIZE)
            .enumerate()
            .filter(|(_, b)| b.bbox.is_finite())
            .map(|(index, b)| DetectionResult {
                index,
                bbox: b.bbox,
                color: color_for_detection_index(index),
                confidence: b.confidence,
            })
            .collect();
        self.missing_dishes = missing_dishes;
        self.results_received = true;
    }

    /// Remove a detection; its dish becomes a missing slot the operator
    /// may draw instead.
    pub fn remove_detection(&mut self, index: usize) -> Result<DetectionResult, CoreError> {
        let pos = self
            .detections
            .iter()
            .position(|d| d.index == index)
            .ok_or_else(|| CoreError::NotFound {
                entity: "detection",
                id: index.to_string(),
            })?;
        let removed = self.detections.remove(pos);
        self.missing_dishes += 1;
        Ok(removed)
    }

    pub fn remove_manual(&mut self, id: ManualRectId) -> Result<ManualRectangle, CoreError> {
        let pos = self
            .manual
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "manual rectangle",
                id: id.to_string(),
            })?;
        Ok(self.manual.remove(pos))
    }

    /// Append a manual rectangle, allocating its color against the
    /// colors in use right now.
    pub fn push_manual(&mut self, bbox: BoundingBox) -> Result<&ManualRectangle, CoreError> {
        if self.remaining() == 0 {
            return Err(CoreError::Conflict(
                "no missing dishes left to draw".into(),
            ));
        }
        let color = next_available_color(&self.used_colors())
            .ok_or_else(|| CoreError::Conflict("all palette colors are in use".into()))?;
        let id = self.next_manual_id;
        self.next_manual_id += 1;
        self.manual.push(ManualRectangle { id, bbox, color });
        Ok(&self.manual[self.manual.len() - 1])
    }

    /// The region currently holding `color`, if any.
    pub fn region_for_color(&self, color: Color) -> Option<(RegionSource, BoundingBox)> {
        self.detections
            .iter()
            .find(|d| d.color == color)
            .map(|d| (RegionSource::Detection, d.bbox))
            .or_else(|| {
                self.manual
                    .iter()
                    .find(|m| m.color == color)
                    .map(|m| (RegionSource::Manual, m.bbox))
            })
    }

    /// Drop every region and the missing-dish budget. Manual ids keep
    /// counting so they stay unique across captures.
    pub fn clear(&mut self) {
        self.detections.clear();
        self.manual.clear();
        self.missing_dishes = 0;
        self.results_received = false;
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.manual.is_empty() && !self.results_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(n: usize) -> Vec<DetectionBox> {
        (0..n)
            .map(|i| DetectionBox {
                bbox: BoundingBox::new(i as f64, 0.0, i as f64 + 10.0, 10.0),
                confidence: Some(0.9),
            })
            .collect()
    }

    #[test]
    fn load_assigns_index_colors() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(3), 1);
        let slots: Vec<usize> = cap.detections().iter().map(|d| d.color.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(cap.remaining(), 1);
        assert!(cap.results_received());
    }

    #[test]
    fn load_caps_at_palette_size() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(15), 0);
        assert_eq!(cap.detections().len(), PALETTE_SIZE);
        assert_eq!(cap.used_colors().len(), PALETTE_SIZE);
    }

    #[test]
    fn manual_takes_first_free_color() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(2), 2);
        cap.remove_detection(0).unwrap();
        let rect = cap.push_manual(BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap();
        assert_eq!(rect.color.slot(), 0);
        let rect = cap.push_manual(BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap();
        assert_eq!(rect.color.slot(), 2);
    }

    #[test]
    fn manual_refused_without_budget() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(1), 0);
        let err = cap.push_manual(BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(cap.manual().is_empty());
    }

    #[test]
    fn removing_detection_opens_a_missing_slot() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(3), 0);
        assert_eq!(cap.remaining(), 0);
        cap.remove_detection(1).unwrap();
        assert_eq!(cap.missing_dishes(), 1);
        assert_eq!(cap.remaining(), 1);
        assert!(cap.remove_detection(1).is_err());
    }

    #[test]
    fn region_lookup_spans_both_sources() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(1), 1);
        let manual_color = cap.push_manual(BoundingBox::new(1.0, 1.0, 9.0, 9.0)).unwrap().color;
        assert_eq!(
            cap.region_for_color(manual_color).map(|(s, _)| s),
            Some(RegionSource::Manual)
        );
        let detection_color = cap.detections()[0].color;
        assert_eq!(
            cap.region_for_color(detection_color).map(|(s, _)| s),
            Some(RegionSource::Detection)
        );
    }

    #[test]
    fn clear_resets_budget_but_keeps_id_sequence() {
        let mut cap = CaptureState::new();
        cap.load_detections(&boxes(0), 1);
        let first = cap.push_manual(BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap().id;
        cap.clear();
        assert!(cap.is_empty());
        cap.load_detections(&boxes(0), 1);
        let second = cap.push_manual(BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap().id;
        assert!(second > first);
    }
}
