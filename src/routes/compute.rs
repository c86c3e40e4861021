use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map};

use crate::errors::{AppError, Result};
use crate::geo::offset_from_tzid;
use crate::models::{BirthEcho, BirthInput, ComputeRequest, ComputeResponse, Meta};
use crate::providers::AstroProvider;
use crate::state::AppState;

/// Fill in coordinates and timezone offset from the free-text location when
/// the caller did not supply them. Fails only when no offset can be derived,
/// since every downstream call needs the full offset-qualified datetime.
pub(crate) async fn ensure_birth_resolved(state: &AppState, birth: &mut BirthInput) -> Result<()> {
    if birth.latitude.is_none() || birth.longitude.is_none() {
        let location = birth.location.clone().ok_or_else(|| {
            AppError::BadRequest("either coordinates or a location are required".to_string())
        })?;
        let place = state.geo.geocode(&location).await.ok_or_else(|| {
            AppError::BadRequest(format!("could not geocode location '{}'", location))
        })?;
        birth.latitude = Some(place.latitude);
        birth.longitude = Some(place.longitude);
        if birth.timezone.is_none() {
            if let Some(tzid) = place.timezone.as_deref() {
                // Offset at the birth instant, not today's offset
                birth.timezone = offset_from_tzid(&birth.date, &birth.time, tzid);
            }
        }
    }

    if birth.timezone.is_none() {
        if let (Some(lat), Some(lon)) = (birth.latitude, birth.longitude) {
            if let Some(tz) = state.geo.timezone_for_coords(lat, lon).await {
                birth.timezone = Some(tz.offset);
            }
        }
    }

    if birth.timezone.is_none() {
        return Err(AppError::BadRequest(
            "timezone_unresolved: unable to determine the timezone offset; please supply one or confirm the location".to_string(),
        ));
    }
    Ok(())
}

/// Orchestrate the full natal computation: kundli, the requested divisional
/// charts and an optional transit snapshot, all relayed verbatim from the
/// provider alongside request metadata.
pub async fn compute(
    State(state): State<AppState>,
    Json(payload): Json<ComputeRequest>,
) -> Result<Json<ComputeResponse>> {
    let mut birth = payload.birth;
    ensure_birth_resolved(&state, &mut birth).await?;

    let coordinates = birth.coordinates()?;
    let birth_datetime = birth.iso_datetime()?;
    let transit_datetime = payload
        .transit_datetime
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string());

    let (kundli, advanced) = state
        .astro
        .kundli(&coordinates, &birth_datetime, birth.ayanamsa, &birth.la)
        .await
        .map_err(|e| AppError::upstream("kundli_failed", e))?;

    // A failed divisional chart becomes an inline error marker instead of
    // failing the whole request.
    let mut divisional = Map::new();
    for chart_type in &payload.include_divisional {
        match state
            .astro
            .divisional(&coordinates, &birth_datetime, chart_type, birth.ayanamsa, &birth.la)
            .await
        {
            Ok(v) => {
                divisional.insert(chart_type.clone(), v);
            }
            Err(e) => {
                tracing::warn!(chart = %chart_type, error = %e, "divisional chart failed");
                divisional.insert(chart_type.clone(), json!({ "error": e.to_string() }));
            }
        }
    }

    let transits = if payload.include_transits {
        match state
            .astro
            .transit(&coordinates, &transit_datetime, birth.ayanamsa)
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "transit snapshot failed");
                Some(json!({ "error": e.to_string() }))
            }
        }
    } else {
        None
    };

    Ok(Json(ComputeResponse {
        kundli,
        divisional,
        transits,
        meta: Meta {
            provider: "prokerala".to_string(),
            ayanamsa: birth.ayanamsa,
            language: birth.la.clone(),
            advanced,
            birth: BirthEcho {
                date: birth.date.clone(),
                time: birth.normalized_time(),
                timezone: birth.timezone.clone(),
                latitude: birth.latitude,
                longitude: birth.longitude,
                location: birth.location.clone(),
            },
            effective_datetime: birth_datetime,
        },
    }))
}
