use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::charts::{canonical_chart_key, map_divisional_to_chart};
use crate::errors::{AppError, Result};
use crate::models::ChartRequest;
use crate::svg::render_chart;

/// Render one divisional chart from a computed payload as an SVG document.
pub async fn chart_svg(Json(payload): Json<ChartRequest>) -> Result<Response> {
    let key = canonical_chart_key(&payload.chart_type).ok_or_else(|| {
        AppError::BadRequest(format!("unknown chart_type '{}'", payload.chart_type))
    })?;

    let chart_payload = payload
        .compute
        .divisional
        .get(key)
        .filter(|v| v.get("error").is_none())
        .ok_or_else(|| {
            AppError::NotFound(format!("chart '{}' not present in computed payload", key))
        })?;

    let chart = map_divisional_to_chart(key, chart_payload);
    let svg = render_chart(&chart, &payload.chart_style)?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}
