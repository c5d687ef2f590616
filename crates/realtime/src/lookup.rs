//! Read-only lookups used to set up a session: airlines, flights,
//! classes, menus and the dishes of a menu.

use serde::{Deserialize, Deserializer};
use traycam_core::session::Dish;

use crate::api::{parse_response, ControlApiError};
use crate::auth::TokenStore;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Airline {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub airline_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Flight {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub flight_id: String,
    pub flight_number: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CabinClass {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub class_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MenuSummary {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub menu_id: String,
    pub menu_code: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Dish row as returned by `/menus/{m}/dishes`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DishRecord {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub dish_id: String,
    #[serde(alias = "name")]
    pub dish_name: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl From<DishRecord> for Dish {
    fn from(record: DishRecord) -> Self {
        Dish {
            dish_id: record.dish_id,
            dish_name: record.dish_name,
            category: record.category,
        }
    }
}

/// HTTP client for the lookup endpoints. Every call carries the bearer
/// token when one is stored.
pub struct LookupApi {
    client: reqwest::Client,
    api_url: String,
    tokens: TokenStore,
}

impl LookupApi {
    pub fn new(api_url: impl Into<String>, tokens: TokenStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub async fn airlines(&self) -> Result<Vec<Airline>, ControlApiError> {
        self.get_list("/airlines").await
    }

    pub async fn flights(&self, airline_id: &str) -> Result<Vec<Flight>, ControlApiError> {
        self.get_list(&format!("/airlines/{airline_id}/flights")).await
    }

    pub async fn classes(&self, flight_id: &str) -> Result<Vec<CabinClass>, ControlApiError> {
        self.get_list(&format!("/flights/{flight_id}/classes")).await
    }

    pub async fn menus(
        &self,
        flight_id: &str,
        class_id: &str,
    ) -> Result<Vec<MenuSummary>, ControlApiError> {
        self.get_list(&format!("/flights/{flight_id}/classes/{class_id}/menus"))
            .await
    }

    /// Dishes of a menu, in the order the backend lists them. This order
    /// is the menu-item order used for color assignment and submission.
    pub async fn dishes(&self, menu_id: &str) -> Result<Vec<Dish>, ControlApiError> {
        let records: Vec<DishRecord> = self.get_list(&format!("/menus/{menu_id}/dishes")).await?;
        Ok(records.into_iter().map(Dish::from).collect())
    }

    // ---- private helpers ----

    async fn get_list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ControlApiError> {
        let mut request = self.client.get(format!("{}{path}", self.api_url));
        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        parse_response(response, Some(&self.tokens)).await
    }
}

/// Accept ids serialized either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
