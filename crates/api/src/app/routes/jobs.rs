//! Batch upload, status polling and archive download.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Multipart, Path},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{info, warn};

use certdrop_infra::jobs::{BatchService, JobId};

use crate::app::dto::{UploadForm, UploadResponse};
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/status/:job_id", get(status))
        .route("/download/:job_id", get(download))
}

/// POST /api/upload
///
/// Accept a batch and start it in the background.
pub async fn upload(
    Extension(service): Extension<Arc<dyn BatchService>>,
    multipart: Multipart,
) -> axum::response::Response {
    let form = match UploadForm::from_multipart(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };
    let (input, template, settings) = match form.into_batch() {
        Ok(parts) => parts,
        Err(response) => {
            warn!("upload rejected");
            return response;
        }
    };

    match service.submit(input, template, settings).await {
        Ok(job_id) => {
            info!(job_id = %job_id, "upload accepted");
            (
                StatusCode::ACCEPTED,
                Json(UploadResponse {
                    job_id: job_id.to_string(),
                    message: "Processing started".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// GET /api/status/:job_id
///
/// Ids that are not job ids are simply unknown.
pub async fn status(
    Extension(service): Extension<Arc<dyn BatchService>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {job_id} not found"),
        );
    };

    match service.status(job_id).await {
        Ok(Some(snapshot)) => (StatusCode::OK, Json(snapshot)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {job_id} not found"),
        ),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// GET /api/download/:job_id
///
/// The archive of a completed job; 404 for anything else.
pub async fn download(
    Extension(service): Extension<Arc<dyn BatchService>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "archive not found");
    };

    match service.archive(job_id).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{job_id}.zip\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
