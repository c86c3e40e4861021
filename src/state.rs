use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::geo::GeoResolver;
use crate::providers::{AstroProvider, ChatModel, OpenAiChat, ProkeralaClient};

/// Application state shared across all handlers.
///
/// Holds the one shared HTTP client, the provider clients and the geo
/// resolver caches. The LLM is optional; endpoints that need it report a
/// configuration error when it is absent.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    pub astro: Arc<dyn AstroProvider>,
    pub geo: GeoResolver,
    pub model: Option<Arc<dyn ChatModel>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        let astro: Arc<dyn AstroProvider> = Arc::new(ProkeralaClient::new(
            http.clone(),
            config.prokerala.base_url.clone(),
            config.prokerala.client_id.clone(),
            config.prokerala.client_secret.clone(),
        ));
        let geo = GeoResolver::new(http.clone(), config.geo.locationiq_key.clone());
        let model: Option<Arc<dyn ChatModel>> = config.openai.api_key.clone().map(|key| {
            Arc::new(OpenAiChat::new(http.clone(), key, config.openai.model.clone()))
                as Arc<dyn ChatModel>
        });

        Ok(Self {
            config,
            http,
            astro,
            geo,
            model,
        })
    }

    /// Replace the chat model, used by tests to inject a scripted one.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Replace the astrology provider, used by tests to inject a scripted one.
    pub fn with_astro(mut self, astro: Arc<dyn AstroProvider>) -> Self {
        self.astro = astro;
        self
    }
}
