use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Dish identifiers are opaque strings assigned by the menu service.
pub type DishId = String;

/// Frame names are opaque strings assigned by the streaming server.
pub type FrameName = String;

/// Identifier of an operator-drawn rectangle, unique within a session.
pub type ManualRectId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Percentage of food left on the tray for one capture cycle.
///
/// Serialized as a bare integer (`100`, `75`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct FoodLevel(u8);

impl FoodLevel {
    /// The level that ends a session once submitted and acknowledged.
    pub const TERMINAL: FoodLevel = FoodLevel(0);

    pub fn new(percent: i64) -> Result<Self, CoreError> {
        if !(0..=100).contains(&percent) {
            return Err(CoreError::Validation(format!(
                "food level must be between 0 and 100, got {percent}"
            )));
        }
        Ok(Self(percent as u8))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn is_terminal(self) -> bool {
        self == Self::TERMINAL
    }

    /// Parse a comma-separated list such as `"100,75,50,25,0"`.
    pub fn parse_list(s: &str) -> Result<Vec<FoodLevel>, CoreError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let value: i64 = part.parse().map_err(|_| {
                    CoreError::Validation(format!("food level '{part}' is not an integer"))
                })?;
                FoodLevel::new(value)
            })
            .collect()
    }
}

impl TryFrom<i64> for FoodLevel {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        FoodLevel::new(value)
    }
}

impl From<FoodLevel> for i64 {
    fn from(level: FoodLevel) -> Self {
        i64::from(level.0)
    }
}

impl fmt::Display for FoodLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
