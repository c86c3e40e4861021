//! Client for the Prokerala astrology API (OAuth2 client-credentials).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Refresh the token this long before the provider-reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Upstream failure carrying the HTTP status so callers can branch on it
/// (the kundli call falls back to the basic tier on 403).
#[derive(Debug)]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "upstream status {}: {}", status, self.message),
            None => write!(f, "upstream error: {}", self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Explicit token holder with expiry state, owned by the client rather than
/// a module-level static, so nothing leaks across tenants if this ever runs
/// multi-tenant.
#[derive(Clone)]
struct TokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(UpstreamError {
                status: Some(status.as_u16()),
                message: truncate_body(&body),
            }));
        }
        let token: TokenResponse = resp.json().await.context("token response malformed")?;

        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN)
            .max(Duration::from_secs(30));
        let access = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(access)
    }
}

#[derive(Clone)]
pub struct ProkeralaClient {
    http: Client,
    base_url: String,
    token: Option<TokenProvider>,
}

impl ProkeralaClient {
    pub fn new(
        http: Client,
        base_url: String,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        let token = match (client_id, client_secret) {
            (Some(id), Some(secret)) => Some(TokenProvider {
                http: http.clone(),
                token_url: token_url_for(&base_url),
                client_id: id,
                client_secret: secret,
                cached: Arc::new(Mutex::new(None)),
            }),
            _ => None,
        };
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self.authorized_get(path, query).await?;
        resp.json().await.context("upstream response was not JSON")
    }

    async fn authorized_get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Prokerala credentials not configured"))?
            .access_token()
            .await?;
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {} failed", path))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(UpstreamError {
                status: Some(status.as_u16()),
                message: truncate_body(&body),
            }));
        }
        Ok(resp)
    }

    /// Natal chart summary. Tries the advanced tier first and degrades to
    /// the basic endpoint on an explicit permission-denied response.
    /// Returns the payload and whether the advanced tier succeeded.
    pub async fn kundli(
        &self,
        coordinates: &str,
        datetime: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<(Value, bool)> {
        let query = birth_query(coordinates, datetime, ayanamsa, Some(la));
        match self.get_json("astrology/kundli/advanced", &query).await {
            Ok(v) => Ok((v, true)),
            Err(err) => {
                let denied = err
                    .downcast_ref::<UpstreamError>()
                    .map(|u| u.status == Some(403))
                    .unwrap_or(false);
                if !denied {
                    return Err(err);
                }
                tracing::warn!("kundli advanced tier denied, falling back to basic");
                let v = self.get_json("astrology/kundli", &query).await?;
                Ok((v, false))
            }
        }
    }

    /// One divisional-chart document (D1, D9, ...).
    pub async fn divisional(
        &self,
        coordinates: &str,
        datetime: &str,
        chart_type: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<Value> {
        let mut query = birth_query(coordinates, datetime, ayanamsa, Some(la));
        query.push(("chart_type", chart_type.to_string()));
        self.get_json("astrology/divisional-chart", &query).await
    }

    /// Transit planet positions at the given instant.
    pub async fn transit(&self, coordinates: &str, datetime: &str, ayanamsa: i64) -> Result<Value> {
        let query = birth_query(coordinates, datetime, ayanamsa, None);
        self.get_json("astrology/planet-position", &query).await
    }

    /// Shadbala strength report rendered by the provider as a PDF.
    pub async fn shadbala_pdf(
        &self,
        name: &str,
        gender: &str,
        coordinates: &str,
        datetime: &str,
        place: &str,
        la: &str,
    ) -> Result<Vec<u8>> {
        let query = vec![
            ("coordinates", coordinates.to_string()),
            ("datetime", datetime.to_string()),
            ("name", name.to_string()),
            ("gender", gender.to_string()),
            ("place", place.to_string()),
            ("la", la.to_string()),
            ("format", "pdf".to_string()),
        ];
        let resp = self.authorized_get("astrology/shadbala-report", &query).await?;
        let bytes = resp.bytes().await.context("failed to read PDF body")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl super::AstroProvider for ProkeralaClient {
    async fn kundli(
        &self,
        coordinates: &str,
        datetime: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<(Value, bool)> {
        ProkeralaClient::kundli(self, coordinates, datetime, ayanamsa, la).await
    }

    async fn divisional(
        &self,
        coordinates: &str,
        datetime: &str,
        chart_type: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<Value> {
        ProkeralaClient::divisional(self, coordinates, datetime, chart_type, ayanamsa, la).await
    }

    async fn transit(&self, coordinates: &str, datetime: &str, ayanamsa: i64) -> Result<Value> {
        ProkeralaClient::transit(self, coordinates, datetime, ayanamsa).await
    }

    async fn shadbala_pdf(
        &self,
        name: &str,
        gender: &str,
        coordinates: &str,
        datetime: &str,
        place: &str,
        la: &str,
    ) -> Result<Vec<u8>> {
        ProkeralaClient::shadbala_pdf(self, name, gender, coordinates, datetime, place, la).await
    }
}

fn birth_query(
    coordinates: &str,
    datetime: &str,
    ayanamsa: i64,
    la: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("ayanamsa", ayanamsa.to_string()),
        ("coordinates", coordinates.to_string()),
        ("datetime", datetime.to_string()),
    ];
    if let Some(la) = la {
        query.push(("la", la.to_string()));
    }
    query
}

/// The OAuth token endpoint lives at the API origin, outside the /v2 prefix.
fn token_url_for(base_url: &str) -> String {
    let origin = base_url.trim_end_matches('/').trim_end_matches("/v2");
    format!("{}/token", origin)
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.len() > LIMIT {
        let mut cut = LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_outside_api_prefix() {
        assert_eq!(
            token_url_for("https://api.prokerala.com/v2"),
            "https://api.prokerala.com/token"
        );
        assert_eq!(
            token_url_for("https://api.prokerala.com/v2/"),
            "https://api.prokerala.com/token"
        );
    }

    #[test]
    fn unconfigured_client_reports_itself() {
        let client = ProkeralaClient::new(
            Client::new(),
            "https://api.prokerala.com/v2".to_string(),
            None,
            None,
        );
        assert!(!client.is_configured());
    }

    #[test]
    fn truncates_long_error_bodies() {
        let long = "x".repeat(500);
        let out = truncate_body(&long);
        assert!(out.len() < 320);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_body("short"), "short");
    }
}
