use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub prokerala: ProkeralaConfig,
    pub openai: OpenAiConfig,
    pub geo: GeoConfig,
    pub allow_origins: String,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProkeralaConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    pub locationiq_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .context("Failed to parse PORT")?,
            },
            prokerala: ProkeralaConfig {
                client_id: env::var("PROKERALA_CLIENT_ID").ok(),
                client_secret: env::var("PROKERALA_CLIENT_SECRET").ok(),
                base_url: env::var("PROKERALA_BASE_URL")
                    .unwrap_or_else(|_| "https://api.prokerala.com/v2".to_string()),
            },
            openai: OpenAiConfig {
                api_key: env::var("OPENAI_API_KEY").ok(),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            },
            geo: GeoConfig {
                locationiq_key: env::var("LOCATIONIQ_KEY").ok(),
            },
            allow_origins: env::var("ALLOW_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            http_timeout_seconds: env::var("HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Failed to parse HTTP_TIMEOUT_SECONDS")?,
        };

        Ok(config)
    }

    pub fn has_prokerala(&self) -> bool {
        self.prokerala.client_id.is_some() && self.prokerala.client_secret.is_some()
    }

    pub fn has_openai(&self) -> bool {
        self.openai.api_key.is_some()
    }

    pub fn has_locationiq(&self) -> bool {
        self.geo.locationiq_key.is_some()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
