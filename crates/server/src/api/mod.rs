pub mod exports;
pub mod health;
pub mod openapi;
pub mod schemas;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::AuthProvider;
use crate::auth::middleware::AuthLayer;
use crate::lifecycle::LifecycleCoordinator;

use self::openapi::ApiDoc;

/// Page size bounds for the export listing.
#[derive(Debug, Clone, Copy)]
pub struct ListLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ListLimits {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Artifact lifecycle operations.
    pub coordinator: Arc<LifecycleCoordinator>,
    /// Requester identification and anti-forgery settings.
    pub auth: Arc<AuthProvider>,
    pub limits: ListLimits,
    /// `Retry-After` hint for 429 responses.
    pub retry_after_seconds: u64,
}

/// Build the Axum router with all API routes, middleware, and Swagger UI.
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        .route("/exports", get(exports::list_exports))
        .route("/exports/list", get(exports::list_exports))
        // Artifact IDs contain a `/`, hence the catch-all segments.
        .route("/exports/download/{*id}", get(exports::download_export))
        .route("/exports/delete/{*id}", delete(exports::delete_export))
        .layer(AuthLayer::new(Arc::clone(&state.auth)));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
