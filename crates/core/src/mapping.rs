//! Dish-mapping reconciliation.
//!
//! The operator asserts "dish N is the region drawn in color C". At
//! submission time each dish's color is resolved against whichever
//! region holds that color right now.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::capture::CaptureState;
use crate::error::CoreError;
use crate::palette::Color;
use crate::session::Dish;
use crate::wire::DishResult;

/// Menu-item index to color. A color belongs to at most one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColorAssignment {
    by_item: BTreeMap<usize, Color>,
}

impl ColorAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `color` to `item`.
    ///
    /// If another item held the color it is unassigned and its index is
    /// returned.
    pub fn assign(
        &mut self,
        item: usize,
        color: Color,
        item_count: usize,
    ) -> Result<Option<usize>, CoreError> {
        if item >= item_count {
            return Err(CoreError::NotFound {
                entity: "menu item",
                id: item.to_string(),
            });
        }
        let previous_holder = self
            .by_item
            .iter()
            .find(|(other, c)| **c == color && **other != item)
            .map(|(other, _)| *other);
        if let Some(other) = previous_holder {
            self.by_item.remove(&other);
        }
        self.by_item.insert(item, color);
        Ok(previous_holder)
    }

    pub fn unassign(&mut self, item: usize) -> Option<Color> {
        self.by_item.remove(&item)
    }

    pub fn color_of(&self, item: usize) -> Option<Color> {
        self.by_item.get(&item).copied()
    }

    pub fn item_for_color(&self, color: Color) -> Option<usize> {
        self.by_item
            .iter()
            .find(|(_, c)| **c == color)
            .map(|(item, _)| *item)
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }

    /// Every one of `item_count` items has a color.
    pub fn is_all_colors_mapped(&self, item_count: usize) -> bool {
        item_count > 0 && (0..item_count).all(|item| self.by_item.contains_key(&item))
    }

    pub fn clear(&mut self) {
        self.by_item.clear();
    }
}

/// Resolve the assignment into one [`DishResult`] per dish, in menu order.
///
/// A dish whose color no longer belongs to any region (removed after
/// assignment) or that has no color is reported as not present.
pub fn build_dish_results(
    dishes: &[Dish],
    assignment: &ColorAssignment,
    capture: &CaptureState,
) -> Vec<DishResult> {
    dishes
        .iter()
        .enumerate()
        .map(|(item, dish)| {
            let dish_bbox = assignment
                .color_of(item)
                .and_then(|color| capture.region_for_color(color))
                .map(|(_, bbox)| bbox.to_xywh().iter().map(|v| v.round() as i64).collect())
                .unwrap_or_default();
            DishResult {
                dish_id: dish.dish_id.clone(),
                dish_bbox,
            }
        })
        .collect()
}

/// Check a submission the way the backend does: one entry per menu
/// item, ids unique and drawn from the menu.
pub fn validate_dish_results(results: &[DishResult], dishes: &[Dish]) -> Result<(), CoreError> {
    if results.len() != dishes.len() {
        return Err(CoreError::Validation(format!(
            "dish_results has {} entries, menu has {} items",
            results.len(),
            dishes.len()
        )));
    }

    let menu_ids: HashSet<&str> = dishes.iter().map(|d| d.dish_id.as_str()).collect();
    let mut seen = HashSet::with_capacity(results.len());

    for (i, result) in results.iter().enumerate() {
        if !menu_ids.contains(result.dish_id.as_str()) {
            return Err(CoreError::Validation(format!(
                "dish_results[{i}] has dish_id '{}' which is not on the menu",
                result.dish_id
            )));
        }
        if !seen.insert(result.dish_id.as_str()) {
            return Err(CoreError::Validation(format!(
                "dish_id '{}' appears more than once",
                result.dish_id
            )));
        }
        if !(result.dish_bbox.is_empty() || result.dish_bbox.len() == 4) {
            return Err(CoreError::Validation(format!(
                "dish_results[{i}].dish_bbox must be [x, y, w, h] or empty"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DetectionBox;
    use crate::geometry::BoundingBox;

    fn dishes(n: usize) -> Vec<Dish> {
        (0..n)
            .map(|i| Dish {
                dish_id: format!("d{i}"),
                dish_name: format!("Dish {i}"),
                category: None,
            })
            .collect()
    }

    fn color(slot: usize) -> Color {
        Color::from_slot(slot).unwrap()
    }

    // -- ColorAssignment -------------------------------------------------------

    #[test]
    fn assign_moves_color_between_items() {
        let mut a = ColorAssignment::new();
        assert_eq!(a.assign(0, color(1), 3).unwrap(), None);
        assert_eq!(a.assign(2, color(1), 3).unwrap(), Some(0));
        assert_eq!(a.color_of(0), None);
        assert_eq!(a.item_for_color(color(1)), Some(2));
    }

    #[test]
    fn assign_out_of_range_rejected() {
        let mut a = ColorAssignment::new();
        assert!(a.assign(3, color(0), 3).is_err());
    }

    #[test]
    fn all_mapped_requires_every_item() {
        let mut a = ColorAssignment::new();
        a.assign(0, color(0), 2).unwrap();
        assert!(!a.is_all_colors_mapped(2));
        a.assign(1, color(1), 2).unwrap();
        assert!(a.is_all_colors_mapped(2));
        a.unassign(0);
        assert!(!a.is_all_colors_mapped(2));
        assert!(!ColorAssignment::new().is_all_colors_mapped(0));
    }

    // -- build_dish_results ----------------------------------------------------

    #[test]
    fn builds_xywh_and_empty_for_vanished_regions() {
        let mut cap = CaptureState::new();
        cap.load_detections(
            &[
                DetectionBox { bbox: BoundingBox::new(50.0, 40.0, 10.0, 20.0), confidence: None },
                DetectionBox { bbox: BoundingBox::new(0.0, 0.0, 5.0, 5.0), confidence: None },
            ],
            0,
        );
        let mut a = ColorAssignment::new();
        a.assign(0, color(0), 2).unwrap();
        a.assign(1, color(1), 2).unwrap();
        cap.remove_detection(1).unwrap();

        let results = build_dish_results(&dishes(2), &a, &cap);
        assert_eq!(results[0].dish_id, "d0");
        assert_eq!(results[0].dish_bbox, vec![10, 20, 40, 20]);
        assert!(results[1].dish_bbox.is_empty());
        assert!(validate_dish_results(&results, &dishes(2)).is_ok());
    }

    // -- validate_dish_results -------------------------------------------------

    #[test]
    fn validate_rejects_count_mismatch() {
        let results = vec![DishResult { dish_id: "d0".into(), dish_bbox: vec![] }];
        let err = validate_dish_results(&results, &dishes(2)).unwrap_err();
        assert!(err.to_string().contains("menu has 2 items"));
    }

    #[test]
    fn validate_rejects_duplicates_and_strangers() {
        let dup = vec![
            DishResult { dish_id: "d0".into(), dish_bbox: vec![] },
            DishResult { dish_id: "d0".into(), dish_bbox: vec![] },
        ];
        assert!(validate_dish_results(&dup, &dishes(2)).is_err());

        let stranger = vec![
            DishResult { dish_id: "d0".into(), dish_bbox: vec![] },
            DishResult { dish_id: "zz".into(), dish_bbox: vec![] },
        ];
        let err = validate_dish_results(&stranger, &dishes(2)).unwrap_err();
        assert!(err.to_string().contains("not on the menu"));
    }
}
