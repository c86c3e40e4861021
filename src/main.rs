use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jyotish_api::{config, routes, state};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = config::Config::from_env()?;
    tracing::info!(
        "Loaded configuration: server={}:{}",
        config.server.host,
        config.server.port
    );
    if !config.has_prokerala() {
        tracing::warn!("Prokerala credentials not found - chart computation will fail");
    }
    if !config.has_openai() {
        tracing::warn!("OpenAI API key not found - analysis and chat endpoints are disabled");
    }

    let state = state::AppState::new(config.clone())?;

    let app = routes::create_router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CorsLayer::permissive())
            .layer(CompressionLayer::new()),
    );

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check available at http://{}/api/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jyotish_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
