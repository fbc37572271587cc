#![allow(clippy::needless_for_each)]

use strongbox_core::ExportFormat;

use super::schemas::{ErrorResponse, ExportSummary, HealthResponse, ListExportsResponse};

#[derive(utoipa::OpenApi)]
#[openapi(
    info(
        title = "Strongbox Export API",
        version = "0.1.0",
        description = "List, download and delete your own data export artifacts.",
        license(name = "MIT")
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Exports", description = "Export artifact listing, streaming download and deletion")
    ),
    paths(
        super::health::health,
        super::exports::list_exports,
        super::exports::download_export,
        super::exports::delete_export,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        ExportSummary,
        ListExportsResponse,
        ExportFormat,
    ))
)]
pub struct ApiDoc;
