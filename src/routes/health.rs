use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        has_openai: state.config.has_openai(),
        account_bound: state.config.has_prokerala(),
        has_locationiq: state.config.has_locationiq(),
    })
}
