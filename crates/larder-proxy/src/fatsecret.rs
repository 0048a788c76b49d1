use larder_core::security::FATSECRET;
use larder_core::ClientCredentials;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProxyError;

/// Token scopes understood by the FatSecret OAuth endpoint.
pub mod scopes {
    pub const BASIC: &str = "basic";
    pub const BARCODE: &str = "basic barcode";
}

/// Upstream endpoints, overridable for tests and staging.
#[derive(Clone, Debug)]
pub struct FatSecretEndpoints {
    pub token_url: String,
    pub api_url: String,
}

impl Default for FatSecretEndpoints {
    fn default() -> Self {
        Self {
            token_url: FATSECRET.token_url.to_string(),
            api_url: FATSECRET.api_url.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-credentials OAuth plus the REST calls the proxy forwards.
///
/// A token is fetched per request; nothing is cached between calls.
pub struct FatSecretClient {
    http: reqwest::Client,
    credentials: Option<ClientCredentials>,
    endpoints: FatSecretEndpoints,
}

impl FatSecretClient {
    pub fn new(credentials: Option<ClientCredentials>, endpoints: FatSecretEndpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            endpoints,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn credentials(&self) -> Result<&ClientCredentials, ProxyError> {
        self.credentials.as_ref().ok_or(ProxyError::MissingCredentials)
    }

    /// Exchange the client credentials for a bearer token.
    pub async fn access_token(&self, scope: &str) -> Result<SecretString, ProxyError> {
        let credentials = self.credentials()?;
        let resp = self
            .http
            .post(&self.endpoints.token_url)
            .basic_auth(&credentials.client_id, Some(credentials.secret()))
            .form(&[("grant_type", "client_credentials"), ("scope", scope)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ProxyError::Decode(e.to_string()))?;
        Ok(SecretString::from(token.access_token))
    }

    /// GET one REST method and return its JSON as-is.
    pub async fn call(
        &self,
        token: &SecretString,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ProxyError> {
        let resp = self
            .http
            .get(&self.endpoints.api_url)
            .bearer_auth(token.expose_secret())
            .query(&[("method", method), ("format", "json")])
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| ProxyError::Decode(e.to_string()))
    }

    pub async fn search_foods(
        &self,
        search_expression: &str,
        page_number: u32,
        max_results: u32,
    ) -> Result<Value, ProxyError> {
        let token = self.access_token(scopes::BASIC).await?;
        self.call(
            &token,
            "foods.search",
            &[
                ("search_expression", search_expression.to_string()),
                ("page_number", page_number.to_string()),
                ("max_results", max_results.to_string()),
            ],
        )
        .await
    }

    /// Resolve a barcode to a food id, then attach the food's details under
    /// `nutrition` when the lookup found one.
    pub async fn lookup_barcode(&self, barcode: &str) -> Result<Value, ProxyError> {
        let token = self.access_token(scopes::BARCODE).await?;
        let mut lookup = self
            .call(
                &token,
                "food.find_id_for_barcode",
                &[("barcode", barcode.to_string())],
            )
            .await?;

        if let Some(food_id) = found_food_id(&lookup) {
            let details = self
                .call(&token, "food.get.v4", &[("food_id", food_id)])
                .await?;
            if let Value::Object(map) = &mut lookup {
                map.insert("nutrition".to_string(), details);
            }
        }
        Ok(lookup)
    }

    pub async fn food_details(&self, food_id: &str) -> Result<Value, ProxyError> {
        let token = self.access_token(scopes::BASIC).await?;
        self.call(&token, "food.get.v4", &[("food_id", food_id.to_string())])
            .await
    }
}

/// `food_id` arrives as `{"value": "123"}`, occasionally as a bare string or
/// number. `"0"` means no match.
fn found_food_id(lookup: &Value) -> Option<String> {
    let raw = lookup.get("food_id")?;
    let raw = raw.get("value").unwrap_or(raw);
    let id = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() || id == "0" {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn food_id_from_value_object() {
        assert_eq!(
            found_food_id(&json!({"food_id": {"value": "4421"}})).as_deref(),
            Some("4421")
        );
    }

    #[test]
    fn food_id_from_bare_values() {
        assert_eq!(found_food_id(&json!({"food_id": "17"})).as_deref(), Some("17"));
        assert_eq!(found_food_id(&json!({"food_id": 99})).as_deref(), Some("99"));
    }

    #[test]
    fn zero_or_missing_food_id_is_no_match() {
        assert_eq!(found_food_id(&json!({"food_id": {"value": "0"}})), None);
        assert_eq!(found_food_id(&json!({"error": {"code": 211}})), None);
    }

    #[tokio::test]
    async fn unconfigured_client_fails_before_network() {
        let client = FatSecretClient::new(
            None,
            FatSecretEndpoints {
                token_url: "http://127.0.0.1:1/token".into(),
                api_url: "http://127.0.0.1:1/api".into(),
            },
        );
        assert!(!client.is_configured());
        let err = client.search_foods("apple", 0, 20).await.unwrap_err();
        assert!(matches!(err, ProxyError::MissingCredentials));
    }
}
