use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::errors::{AppError, Result};
use crate::models::ChatRequest;
use crate::providers::ChatModel;
use crate::refine::{
    clamp_iterations, run_refinement, ChatEvent, ProviderCharts, RefinementInput,
};
use crate::routes::event_stream;
use crate::state::AppState;

/// Grounded chat over a previously computed chart set. The loop may fetch
/// further divisional charts when the model asks for them, bounded by
/// `max_iterations`. With `stream: true` the reply arrives as SSE events.
pub async fn chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response> {
    if payload.message.trim().is_empty() {
        return Err(AppError::BadRequest("message required".to_string()));
    }
    let context = payload
        .context
        .ok_or_else(|| AppError::BadRequest("context required; call compute first".to_string()))?;
    let model: Arc<dyn ChatModel> = state
        .model
        .clone()
        .ok_or_else(|| AppError::BadRequest("OpenAI API key not configured".to_string()))?;

    let bound = clamp_iterations(payload.max_iterations);

    let birth = &context.meta.birth;
    let coordinates = match (birth.latitude, birth.longitude) {
        (Some(lat), Some(lon)) => format!("{},{}", lat, lon),
        _ => String::new(),
    };
    let source = ProviderCharts {
        client: state.astro.clone(),
        coordinates,
        datetime: context.meta.effective_datetime.clone(),
        ayanamsa: context.meta.ayanamsa,
        la: context.meta.language.clone(),
    };

    if payload.stream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let message = payload.message;
        tokio::spawn(async move {
            let input = RefinementInput {
                message: &message,
                context: &context,
                bound,
                stream_tokens: true,
            };
            if let Err(e) = run_refinement(model.as_ref(), &source, input, Some(&tx)).await {
                let _ = tx.send(ChatEvent::Error(e.to_string()));
            }
        });
        Ok(Sse::new(event_stream(rx))
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let input = RefinementInput {
            message: &payload.message,
            context: &context,
            bound,
            stream_tokens: false,
        };
        let out = run_refinement(model.as_ref(), &source, input, None).await?;
        Ok(Json(out).into_response())
    }
}
