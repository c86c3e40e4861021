use std::convert::Infallible;

use axum::response::sse::Event;
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::refine::ChatEvent;
use crate::state::AppState;

pub mod analyze;
pub mod chart;
pub mod chat;
pub mod compute;
pub mod geo;
pub mod health;
pub mod shadbala;

pub fn create_router(state: AppState) -> Router {
    Router::new().nest("/api", api_routes()).with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/geo/resolve", get(geo::resolve))
        .route("/compute", post(compute::compute))
        .route("/analyze", post(analyze::analyze))
        .route("/analyze-llm", post(analyze::analyze_llm))
        .route("/chart", post(chart::chart_svg))
        .route("/chat", post(chat::chat))
        .route("/shadbala/pdf", post(shadbala::shadbala_pdf))
        .route("/shadbala/json", post(shadbala::shadbala_json))
}

pub(crate) fn to_sse_event(ev: ChatEvent) -> Event {
    match ev {
        ChatEvent::Trace(message) => Event::default().event("trace").data(message),
        ChatEvent::Token(token) => Event::default().event("token").data(token),
        ChatEvent::Done(payload) => Event::default().event("done").data(payload.to_string()),
        ChatEvent::Error(detail) => Event::default()
            .event("error")
            .data(serde_json::json!({ "detail": detail }).to_string()),
    }
}

/// Bridge a channel of loop events into an SSE body.
pub(crate) fn event_stream(
    mut rx: UnboundedReceiver<ChatEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(ev) = rx.recv().await {
            yield Ok(to_sse_event(ev));
        }
    }
}
