use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::{AppError, Result};
use crate::models::GeoResolveResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    #[serde(default)]
    pub q: Option<String>,
}

/// Resolve a free-text place name into coordinates plus the current UTC
/// offset at that place.
pub async fn resolve(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<GeoResolveResponse>> {
    let q = params.q.unwrap_or_default();
    let q = q.trim();
    if q.is_empty() {
        return Err(AppError::BadRequest("q required".to_string()));
    }

    let place = state
        .geo
        .geocode(q)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no match for '{}'", q)))?;

    let tz = state
        .geo
        .timezone_for_coords(place.latitude, place.longitude)
        .await
        .ok_or_else(|| {
            AppError::BadRequest(
                "timezone_unresolved: unable to determine a UTC offset for this place".to_string(),
            )
        })?;

    Ok(Json(GeoResolveResponse {
        display_name: place.display_name.unwrap_or_else(|| q.to_string()),
        latitude: place.latitude,
        longitude: place.longitude,
        offset: tz.offset,
        time_zone: Some(tz.time_zone),
    }))
}
