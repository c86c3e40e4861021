use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::analysis::{
    build_report_prompt, extract_facts, extract_rationale, fetch_reference, render_analysis,
    REFERENCE_URLS,
};
use crate::errors::{AppError, Result};
use crate::models::{AnalyzeRequest, AnalyzeResponse, LlmAnalyzeResponse};
use crate::providers::{ChatModel, ChatTurn};
use crate::refine::ChatEvent;
use crate::routes::event_stream;
use crate::state::AppState;

/// Deterministic Markdown natal summary rendered from the computed payload.
/// Works without any LLM credentials.
pub async fn analyze(Json(payload): Json<AnalyzeRequest>) -> Json<AnalyzeResponse> {
    let facts = extract_facts(&payload.compute, Utc::now());
    Json(AnalyzeResponse {
        analysis: render_analysis(&facts),
    })
}

const REPORT_SYSTEM_PROMPT: &str = "You are a learned Vedic astrologer writing a \
client-facing natal report. Ground every statement in the supplied chart facts \
and reference excerpts; never invent placements.";

fn push_trace(trace: &mut Vec<String>, events: Option<&UnboundedSender<ChatEvent>>, msg: String) {
    if let Some(tx) = events {
        let _ = tx.send(ChatEvent::Trace(msg.clone()));
    }
    trace.push(msg);
}

async fn run_report(
    state: &AppState,
    model: &dyn ChatModel,
    payload: &AnalyzeRequest,
    stream_tokens: bool,
    events: Option<&UnboundedSender<ChatEvent>>,
) -> Result<LlmAnalyzeResponse> {
    let mut trace = Vec::new();

    let facts = extract_facts(&payload.compute, Utc::now());
    let available: Vec<String> = payload
        .compute
        .divisional
        .iter()
        .filter(|(_, v)| v.get("error").is_none())
        .map(|(k, _)| k.clone())
        .collect();
    push_trace(
        &mut trace,
        events,
        format!(
            "extracted {} placements across {} charts",
            facts.placements.len(),
            available.len()
        ),
    );

    let mut references = Vec::new();
    for url in REFERENCE_URLS {
        let text = fetch_reference(&state.http, url).await;
        if text.is_empty() {
            push_trace(&mut trace, events, format!("reference unavailable: {}", url));
        } else {
            push_trace(&mut trace, events, format!("reference loaded: {}", url));
        }
        references.push(text);
    }

    let mut prompt = build_report_prompt(&facts, &available, &references);
    if let Some(question) = payload.question.as_deref().filter(|q| !q.trim().is_empty()) {
        prompt.push_str("\nAdditionally address this question in the relevant section: ");
        prompt.push_str(question);
        prompt.push('\n');
    }

    let messages = vec![ChatTurn::system(REPORT_SYSTEM_PROMPT), ChatTurn::user(prompt)];
    push_trace(&mut trace, events, "requesting report from model".to_string());

    let raw = if stream_tokens {
        let mut stream = model
            .complete_stream(&messages)
            .await
            .map_err(|e| AppError::upstream("openai_failed", e))?;
        let mut acc = String::new();
        while let Some(token) = stream.next().await {
            let token = token.map_err(|e| AppError::upstream("openai_failed", e))?;
            if let Some(tx) = events {
                let _ = tx.send(ChatEvent::Token(token.clone()));
            }
            acc.push_str(&token);
        }
        acc
    } else {
        model
            .complete(&messages)
            .await
            .map_err(|e| AppError::upstream("openai_failed", e))?
    };

    let (analysis, rationale) = extract_rationale(&raw);
    push_trace(
        &mut trace,
        events,
        if rationale.is_some() {
            "structured rationale extracted".to_string()
        } else {
            "no structured rationale block found".to_string()
        },
    );

    let response = LlmAnalyzeResponse {
        analysis,
        rationale,
        trace,
    };
    if let Some(tx) = events {
        if let Ok(value) = serde_json::to_value(&response) {
            let _ = tx.send(ChatEvent::Done(value));
        }
    }
    Ok(response)
}

/// LLM-written structured report. With `stream: true` the response is an SSE
/// stream of trace/token events ending in a `done` event carrying the same
/// JSON the non-streaming variant returns.
pub async fn analyze_llm(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Response> {
    let model: Arc<dyn ChatModel> = state
        .model
        .clone()
        .ok_or_else(|| AppError::BadRequest("OpenAI API key not configured".to_string()))?;

    if payload.stream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(e) = run_report(&state, model.as_ref(), &payload, true, Some(&tx)).await {
                let _ = tx.send(ChatEvent::Error(e.to_string()));
            }
        });
        Ok(Sse::new(event_stream(rx))
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let report = run_report(&state, model.as_ref(), &payload, false, None).await?;
        Ok(Json(report).into_response())
    }
}
