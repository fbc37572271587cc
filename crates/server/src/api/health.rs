use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::schemas::HealthResponse;

/// `GET /health` -- liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    summary = "Health check",
    description = "Returns a static status object while the server is accepting requests.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}
