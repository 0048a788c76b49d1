use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Every way a proxy request can fail. All of them reach the caller as
/// `500 {"error": <message>}`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("FatSecret credentials not configured")]
    MissingCredentials,

    #[error("Search expression is required")]
    MissingSearchExpression,

    #[error("Barcode is required")]
    MissingBarcode,

    #[error("Food ID is required")]
    MissingFoodId,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Failed to get access token ({status}): {body}")]
    TokenExchange { status: u16, body: String },

    #[error("FatSecret API error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid upstream response: {0}")]
    Decode(String),
}

impl ProxyError {
    /// Short machine-readable category for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::MissingSearchExpression | Self::MissingBarcode | Self::MissingFoodId => {
                "missing_field"
            }
            Self::InvalidBody(_) => "invalid_body",
            Self::TokenExchange { .. } => "token_exchange",
            Self::Upstream { .. } => "upstream",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
