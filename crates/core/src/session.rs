//! Session model: one flight/menu data-collection run walking a
//! descending list of food levels.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DishId, FoodLevel};
use crate::wire::{FlightDetails, MenuDetails, MenuItem, MenuRef, StartStreamingData};

/// Default food levels visited by a session.
pub const DEFAULT_FOOD_LEVELS: [u8; 5] = [100, 75, 50, 25, 0];

/// One menu item the operator must locate on the tray.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dish {
    pub dish_id: DishId,
    pub dish_name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Ordered food levels plus a cursor into them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodLevelPlan {
    levels: Vec<FoodLevel>,
    cursor: usize,
}

impl FoodLevelPlan {
    /// Build a plan, requiring a non-empty, strictly descending list that
    /// ends at the terminal level.
    pub fn new(levels: Vec<FoodLevel>) -> Result<Self, CoreError> {
        let Some(last) = levels.last() else {
            return Err(CoreError::Validation("food level list is empty".into()));
        };
        if !last.is_terminal() {
            return Err(CoreError::Validation(format!(
                "food level list must end at {}, ends at {last}",
                FoodLevel::TERMINAL
            )));
        }
        if levels.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(CoreError::Validation(
                "food levels must be strictly descending".into(),
            ));
        }
        Ok(Self { levels, cursor: 0 })
    }

    pub fn levels(&self) -> &[FoodLevel] {
        &self.levels
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> FoodLevel {
        self.levels[self.cursor]
    }

    pub fn is_at_terminal(&self) -> bool {
        self.cursor + 1 == self.levels.len()
    }

    /// Move to the next level. Fails at the terminal level.
    pub fn advance(&mut self) -> Result<FoodLevel, CoreError> {
        if self.is_at_terminal() {
            return Err(CoreError::InvalidState(
                "already at the terminal food level".into(),
            ));
        }
        self.cursor += 1;
        Ok(self.current())
    }
}

impl Default for FoodLevelPlan {
    fn default() -> Self {
        Self {
            levels: DEFAULT_FOOD_LEVELS
                .iter()
                .map(|&p| FoodLevel::new(i64::from(p)).unwrap_or(FoodLevel::TERMINAL))
                .collect(),
            cursor: 0,
        }
    }
}

/// Process-wide state for one flight/menu run.
#[derive(Debug, Clone)]
pub struct Session {
    flight_number: String,
    menu_code: String,
    dishes: Vec<Dish>,
    plan: FoodLevelPlan,
    completed: bool,
}

impl Session {
    pub fn new(
        flight_number: impl Into<String>,
        menu_code: impl Into<String>,
        dishes: Vec<Dish>,
        plan: FoodLevelPlan,
    ) -> Result<Self, CoreError> {
        let flight_number = flight_number.into();
        let menu_code = menu_code.into();
        if flight_number.trim().is_empty() {
            return Err(CoreError::Validation("flight number is required".into()));
        }
        if menu_code.trim().is_empty() {
            return Err(CoreError::Validation("menu code is required".into()));
        }
        if dishes.is_empty() {
            return Err(CoreError::Validation("menu has no dishes".into()));
        }
        let mut ids: Vec<&str> = dishes.iter().map(|d| d.dish_id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(CoreError::Validation(format!(
                "dish id '{}' appears more than once in the menu",
                dup[0]
            )));
        }
        Ok(Self {
            flight_number,
            menu_code,
            dishes,
            plan,
            completed: false,
        })
    }

    pub fn flight_number(&self) -> &str {
        &self.flight_number
    }

    pub fn menu_code(&self) -> &str {
        &self.menu_code
    }

    pub fn dishes(&self) -> &[Dish] {
        &self.dishes
    }

    pub fn menu_item_count(&self) -> usize {
        self.dishes.len()
    }

    pub fn plan(&self) -> &FoodLevelPlan {
        &self.plan
    }

    pub fn current_level(&self) -> FoodLevel {
        self.plan.current()
    }

    pub fn is_terminal_level(&self) -> bool {
        self.plan.is_at_terminal()
    }

    pub fn advance(&mut self) -> Result<FoodLevel, CoreError> {
        self.plan.advance()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn complete(&mut self) {
        self.completed = true;
    }

    pub fn flight_details(&self) -> FlightDetails {
        FlightDetails {
            flight_number: self.flight_number.clone(),
        }
    }

    pub fn menu_ref(&self) -> MenuRef {
        MenuRef {
            menu_code: self.menu_code.clone(),
        }
    }

    /// Metadata carried by the first `start_streaming` of a session.
    pub fn initial_start_data(&self) -> StartStreamingData {
        StartStreamingData {
            flight_details: Some(self.flight_details()),
            menu_details: Some(MenuDetails {
                menu_code: self.menu_code.clone(),
                menu_item_count: self.dishes.len(),
                menu_items: self
                    .dishes
                    .iter()
                    .map(|d| MenuItem {
                        dish_id: d.dish_id.clone(),
                        dish_name: d.dish_name.clone(),
                    })
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(values: &[i64]) -> Vec<FoodLevel> {
        values.iter().map(|&v| FoodLevel::new(v).unwrap()).collect()
    }

    fn dish(id: &str) -> Dish {
        Dish {
            dish_id: id.into(),
            dish_name: format!("Dish {id}"),
            category: None,
        }
    }

    #[test]
    fn plan_requires_terminal_tail() {
        assert!(FoodLevelPlan::new(levels(&[100, 50])).is_err());
        assert!(FoodLevelPlan::new(Vec::new()).is_err());
    }

    #[test]
    fn plan_requires_descending() {
        let err = FoodLevelPlan::new(levels(&[50, 100, 0])).unwrap_err();
        assert!(err.to_string().contains("strictly descending"));
    }

    #[test]
    fn plan_advances_until_terminal() {
        let mut plan = FoodLevelPlan::new(levels(&[100, 50, 0])).unwrap();
        assert_eq!(plan.current().percent(), 100);
        assert_eq!(plan.advance().unwrap().percent(), 50);
        assert_eq!(plan.advance().unwrap().percent(), 0);
        assert!(plan.is_at_terminal());
        assert!(plan.advance().is_err());
        assert_eq!(plan.cursor(), 2);
    }

    #[test]
    fn default_plan_matches_constant() {
        let plan = FoodLevelPlan::default();
        let percents: Vec<u8> = plan.levels().iter().map(|l| l.percent()).collect();
        assert_eq!(percents, DEFAULT_FOOD_LEVELS.to_vec());
    }

    #[test]
    fn session_rejects_duplicate_dish_ids() {
        let err = Session::new("EK1", "M1", vec![dish("a"), dish("a")], FoodLevelPlan::default())
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn initial_start_data_lists_menu() {
        let session =
            Session::new("EK1", "M1", vec![dish("a"), dish("b")], FoodLevelPlan::default()).unwrap();
        let data = session.initial_start_data();
        let menu = data.menu_details.unwrap();
        assert_eq!(menu.menu_item_count, 2);
        assert_eq!(menu.menu_items[1].dish_id, "b");
        assert_eq!(data.flight_details.unwrap().flight_number, "EK1");
    }
}
