use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use strongbox_archive::ARCHIVE_CONTENT_TYPE;
use strongbox_catalog::Page;
use strongbox_core::ArtifactId;

use super::AppState;
use super::schemas::{ErrorResponse, ExportSummary, ListExportsResponse};
use crate::auth::identity::RequesterIdentity;
use crate::delivery;
use crate::error::ServerError;

/// Pagination for the export listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListExportsParams {
    /// Page size. Clamped to the configured maximum.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

/// Options for a download.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadParams {
    /// Remove the export once the archive has been delivered in full.
    #[serde(default)]
    pub delete_after: bool,
}

fn parse_id(raw: String) -> Result<ArtifactId, ServerError> {
    let id = ArtifactId::new(raw);
    id.segments()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    Ok(id)
}

/// `GET /exports` -- the requester's own exports, newest first.
#[utoipa::path(
    get,
    path = "/exports",
    tag = "Exports",
    summary = "List exports",
    description = "Returns the requester's exports, newest first. Other owners' exports are never included.",
    params(ListExportsParams),
    responses(
        (status = 200, description = "One page of exports", body = ListExportsResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse)
    )
)]
pub async fn list_exports(
    State(state): State<AppState>,
    axum::Extension(identity): axum::Extension<RequesterIdentity>,
    Query(params): Query<ListExportsParams>,
) -> Result<Json<ListExportsResponse>, ServerError> {
    let limit = params
        .limit
        .unwrap_or(state.limits.default_page_size)
        .clamp(1, state.limits.max_page_size);
    let offset = params.offset.unwrap_or(0);

    let artifacts = state
        .coordinator
        .list(&identity.owner, Page::new(limit, offset))
        .await
        .map_err(|e| ServerError::from_lifecycle(e, state.retry_after_seconds))?;

    Ok(Json(ListExportsResponse {
        exports: artifacts.into_iter().map(ExportSummary::from).collect(),
        limit,
        offset,
    }))
}

/// `GET /exports/download/{id}` -- stream an export as a gzip-compressed tar.
#[utoipa::path(
    get,
    path = "/exports/download/{id}",
    tag = "Exports",
    summary = "Download export",
    description = "Streams the export directory as a tar.gz archive. With `delete_after=true` the export is removed only after the archive was delivered in full; an interrupted transfer leaves it intact.",
    params(
        ("id" = String, Path, description = "Artifact ID, `{owner}/{timestamp}`"),
        DownloadParams
    ),
    responses(
        (status = 200, description = "Streamed `application/gzip` tar archive"),
        (status = 400, description = "Malformed artifact ID", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Requester does not own the export", body = ErrorResponse),
        (status = 404, description = "Export record or files not found", body = ErrorResponse),
        (status = 429, description = "Too many concurrent downloads", body = ErrorResponse),
        (status = 500, description = "Archive stream failed", body = ErrorResponse)
    )
)]
pub async fn download_export(
    State(state): State<AppState>,
    axum::Extension(identity): axum::Extension<RequesterIdentity>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ServerError> {
    let id = parse_id(id)?;
    let coordinator = Arc::clone(&state.coordinator);

    let prepared = coordinator
        .prepare(&id, &identity.owner)
        .await
        .map_err(|e| ServerError::from_lifecycle(e, state.retry_after_seconds))?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        prepared.artifact().archive_file_name()
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ServerError::Internal(format!("invalid file name: {e}")))?;

    info!(
        artifact_id = %id,
        owner = %identity.owner,
        delete_after = params.delete_after,
        "download started"
    );

    let (sink, body) = delivery::channel();
    let delete_after = params.delete_after;
    let task = tokio::spawn(async move {
        coordinator
            .deliver(prepared, sink, delete_after)
            .await
            .is_ok()
    });

    let mut response = Body::from_stream(body.settled_by(task)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ARCHIVE_CONTENT_TYPE),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// `DELETE /exports/delete/{id}` -- remove an export's files and record.
#[utoipa::path(
    delete,
    path = "/exports/delete/{id}",
    tag = "Exports",
    summary = "Delete export",
    description = "Removes the export. Requires the `x-csrf-token` header to match the `csrf_token` cookie. Responds 200 with an empty body.",
    params(("id" = String, Path, description = "Artifact ID, `{owner}/{timestamp}`")),
    responses(
        (status = 200, description = "Export deleted"),
        (status = 400, description = "Malformed artifact ID", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Anti-forgery check failed or requester does not own the export", body = ErrorResponse),
        (status = 404, description = "Export not found", body = ErrorResponse)
    )
)]
pub async fn delete_export(
    State(state): State<AppState>,
    axum::Extension(identity): axum::Extension<RequesterIdentity>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    state
        .auth
        .csrf()
        .verify(&headers)
        .map_err(|e| ServerError::Forbidden(e.to_string()))?;
    let id = parse_id(id)?;

    state
        .coordinator
        .delete(&id, &identity.owner)
        .await
        .map_err(|e| ServerError::from_lifecycle(e, state.retry_after_seconds))?;

    Ok(StatusCode::OK)
}
