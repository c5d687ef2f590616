//! Console configuration loaded from environment variables.
//!
//! | Variable                         | Default                     |
//! |----------------------------------|-----------------------------|
//! | `TRAYCAM_REALTIME_URL`           | `ws://localhost:5000/ws`    |
//! | `TRAYCAM_API_URL`                | `http://localhost:8000`     |
//! | `TRAYCAM_CONTROL_TRANSPORT`      | `http`                      |
//! | `TRAYCAM_RECONNECT_BASE_MS`      | `1000`                      |
//! | `TRAYCAM_RECONNECT_MAX_ATTEMPTS` | `5`                         |
//! | `TRAYCAM_FOOD_LEVELS`            | `100,75,50,25,0`            |
//! | `TRAYCAM_TOKEN_PATH`             | `$HOME/.traycam/token.json` |
//! | `TRAYCAM_USERNAME`               | --                          |
//! | `TRAYCAM_PASSWORD`               | --                          |
//! | `TRAYCAM_FLIGHT_NUMBER`          | --                          |
//! | `TRAYCAM_MENU_CODE`              | --                          |
//! | `TRAYCAM_MENU_ID`                | --                          |
//! | `TRAYCAM_DISHES`                 | --                          |
//!
//! `TRAYCAM_DISHES` lists the menu inline as `id=name,id=name`. When it
//! is unset the dishes are fetched for `TRAYCAM_MENU_ID`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use traycam_core::error::CoreError;
use traycam_core::session::{Dish, FoodLevelPlan};
use traycam_core::types::FoodLevel;
use traycam_realtime::driver::{ControlTransport, DriverConfig};
use traycam_realtime::reconnect::ReconnectConfig;

const DEFAULT_REALTIME_URL: &str = "ws://localhost:5000/ws";
const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_FOOD_LEVELS: &str = "100,75,50,25,0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TRAYCAM_FOOD_LEVELS is invalid: {0}")]
    FoodLevels(#[source] CoreError),

    #[error("TRAYCAM_CONTROL_TRANSPORT is invalid: {0}")]
    Transport(String),

    #[error("TRAYCAM_DISHES entry '{0}' must look like id=name")]
    DishEntry(String),
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub realtime_url: String,
    pub api_url: String,
    pub transport: ControlTransport,
    pub reconnect_base: Duration,
    pub reconnect_max_attempts: u32,
    pub food_levels: Vec<FoodLevel>,
    pub token_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    pub flight_number: Option<String>,
    pub menu_code: Option<String>,
    pub menu_id: Option<String>,
    pub dishes: Option<Vec<Dish>>,
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let transport = match get("TRAYCAM_CONTROL_TRANSPORT") {
            Some(raw) => ControlTransport::from_str(&raw).map_err(ConfigError::Transport)?,
            None => ControlTransport::default(),
        };

        let reconnect_base_ms = parse_or_default(
            "TRAYCAM_RECONNECT_BASE_MS",
            get("TRAYCAM_RECONNECT_BASE_MS"),
            DEFAULT_RECONNECT_BASE_MS,
        );
        let reconnect_max_attempts = parse_or_default(
            "TRAYCAM_RECONNECT_MAX_ATTEMPTS",
            get("TRAYCAM_RECONNECT_MAX_ATTEMPTS"),
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        );

        let raw_levels = get("TRAYCAM_FOOD_LEVELS").unwrap_or_else(|| DEFAULT_FOOD_LEVELS.into());
        let food_levels = FoodLevel::parse_list(&raw_levels).map_err(ConfigError::FoodLevels)?;
        // Reject an unusable plan at start-up rather than at session creation.
        FoodLevelPlan::new(food_levels.clone()).map_err(ConfigError::FoodLevels)?;

        let token_path = get("TRAYCAM_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_token_path(get("HOME")));

        let dishes = get("TRAYCAM_DISHES").map(|raw| parse_dishes(&raw)).transpose()?;

        Ok(Self {
            realtime_url: get("TRAYCAM_REALTIME_URL").unwrap_or_else(|| DEFAULT_REALTIME_URL.into()),
            api_url: get("TRAYCAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            transport,
            reconnect_base: Duration::from_millis(reconnect_base_ms),
            reconnect_max_attempts,
            food_levels,
            token_path,
            username: get("TRAYCAM_USERNAME"),
            password: get("TRAYCAM_PASSWORD"),
            flight_number: get("TRAYCAM_FLIGHT_NUMBER"),
            menu_code: get("TRAYCAM_MENU_CODE"),
            menu_id: get("TRAYCAM_MENU_ID"),
            dishes,
        })
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            reconnect: ReconnectConfig {
                base_delay: self.reconnect_base,
                max_attempts: self.reconnect_max_attempts,
            },
            transport: self.transport,
        }
    }

    pub fn food_level_plan(&self) -> Result<FoodLevelPlan, CoreError> {
        FoodLevelPlan::new(self.food_levels.clone())
    }
}

fn parse_or_default<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid number, using default");
            default
        }),
    }
}

fn default_token_path(home: Option<String>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".traycam")
        .join("token.json")
}

/// Parse `id=name,id=name`.
fn parse_dishes(raw: &str) -> Result<Vec<Dish>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, name) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::DishEntry(entry.to_string()))?;
            let (id, name) = (id.trim(), name.trim());
            if id.is_empty() || name.is_empty() {
                return Err(ConfigError::DishEntry(entry.to_string()));
            }
            Ok(Dish {
                dish_id: id.to_string(),
                dish_name: name.to_string(),
                category: None,
            })
        })
        .collect()
}
