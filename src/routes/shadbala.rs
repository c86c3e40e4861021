use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::{AppError, Result};
use crate::models::ShadbalaRequest;
use crate::providers::AstroProvider;
use crate::routes::compute::ensure_birth_resolved;
use crate::state::AppState;

const GRAHAS: &[&str] = &[
    "Sun", "Moon", "Mars", "Mercury", "Jupiter", "Venus", "Saturn",
];

async fn fetch_report(state: &AppState, payload: ShadbalaRequest) -> Result<Vec<u8>> {
    let mut birth = payload.birth;
    if birth.location.is_none() {
        birth.location = payload.place.clone();
    }
    ensure_birth_resolved(state, &mut birth).await?;

    let coordinates = birth.coordinates()?;
    let datetime = birth.iso_datetime()?;
    let place = payload
        .place
        .or_else(|| birth.location.clone())
        .unwrap_or_default();

    state
        .astro
        .shadbala_pdf(
            &payload.name,
            &payload.gender,
            &coordinates,
            &datetime,
            &place,
            &birth.la,
        )
        .await
        .map_err(|e| AppError::upstream("shadbala_failed", e))
}

/// Relay the provider's shadbala strength report as a PDF download.
pub async fn shadbala_pdf(
    State(state): State<AppState>,
    Json(payload): Json<ShadbalaRequest>,
) -> Result<Response> {
    let bytes = fetch_report(&state, payload).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"shadbala.pdf\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Same report, but with the planet strength table pulled out of the PDF
/// text layer as JSON. The extraction is line-based and best-effort; planets
/// whose row cannot be read are simply absent.
pub async fn shadbala_json(
    State(state): State<AppState>,
    Json(payload): Json<ShadbalaRequest>,
) -> Result<Json<Value>> {
    let bytes = fetch_report(&state, payload).await?;
    let text = extract_pdf_text(&bytes)
        .map_err(|e| AppError::Internal(format!("could not read PDF text: {}", e)))?;
    Ok(Json(parse_strengths(&text)))
}

fn extract_pdf_text(bytes: &[u8]) -> anyhow::Result<String> {
    let doc = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    Ok(doc.extract_text(&pages)?)
}

/// Pull per-planet strength scores out of the report text: lines starting
/// with a planet name, scored by the first numeric token that follows.
fn parse_strengths(text: &str) -> Value {
    let mut results = Vec::new();
    for line in text.lines() {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else { continue };
        let Some(planet) = GRAHAS.iter().find(|g| g.eq_ignore_ascii_case(first)) else {
            continue;
        };
        let score = words.find_map(|w| w.parse::<f64>().ok());
        if let Some(score) = score {
            results.push(json!({ "planet": planet, "score": score }));
        }
    }
    json!({ "shadbala": results })
}
