use secrecy::{ExposeSecret, SecretString};

/// Environment variable names read for credentials.
pub mod env_vars {
    pub const FATSECRET_CLIENT_ID: &str = "FATSECRET_CLIENT_ID";
    pub const FATSECRET_CLIENT_SECRET: &str = "FATSECRET_CLIENT_SECRET";
}

/// OAuth client-credentials pair with the secret kept out of Debug output.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }

    /// Read the FatSecret credentials from the environment. Empty values
    /// count as missing.
    pub fn fatsecret_from_env() -> Option<Self> {
        let id = std::env::var(env_vars::FATSECRET_CLIENT_ID).ok()?;
        let secret = std::env::var(env_vars::FATSECRET_CLIENT_SECRET).ok()?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(id, secret))
    }

    pub fn secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// FatSecret platform endpoints.
pub struct FatSecretEndpoints {
    pub token_url: &'static str,
    pub api_url: &'static str,
}

pub const FATSECRET: FatSecretEndpoints = FatSecretEndpoints {
    token_url: "https://oauth.fatsecret.com/connect/token",
    api_url: "https://platform.fatsecret.com/rest/server.api",
};
