use axum::extract::{Multipart, Query, State};
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::iteration::StoredIteration;
use crate::models::job::{Job, SubmitRequest, SubmitResponse};
use crate::routes::error::ApiError;
use crate::services::upload::{allowed_file, detect_image};

const INVALID_FILE: &str = "Invalid file or file type.";

/// POST /api/v1/jobs — Upload a seed image and run the pipeline to completion.
///
/// Blocks for the full duration of the job. The response lists only the
/// iterations that completed.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut iterations: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                image = Some((filename, data.to_vec()));
            }
            Some("iterations") => {
                iterations = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let (filename, data) = image.ok_or_else(|| ApiError::BadRequest(INVALID_FILE.to_string()))?;
    if !allowed_file(&filename) {
        return Err(ApiError::BadRequest(INVALID_FILE.to_string()));
    }

    let request = SubmitRequest {
        filename,
        iterations: parse_iterations(iterations.as_deref())?,
    };
    request
        .validate()
        .map_err(|report| ApiError::BadRequest(report.to_string()))?;

    detect_image(&data).ok_or(ApiError::NotAnImage)?;

    let job = Job::new(data, request.iterations);
    let job_id = job.id;

    tracing::info!(
        job_id = %job_id,
        filename = %request.filename,
        iterations = job.iterations,
        "Job submitted"
    );

    // The pipeline runs on its own task so an unexpected panic is reported as a
    // server error instead of tearing down the connection.
    let pipeline = Arc::clone(&state.pipeline);
    let handle = tokio::spawn(async move { pipeline.run(job.seed_image, job.iterations, job.id).await });

    let results = match handle.await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => return Err(ApiError::BadRequest(e.to_string())),
        Err(e) => {
            return Err(ApiError::Internal(format!("An error occurred: {e}")));
        }
    };

    Ok(Json(SubmitResponse { job_id, results }))
}

/// Parse the optional `iterations` form field. Missing means one iteration.
pub fn parse_iterations(raw: Option<&str>) -> Result<u32, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(1),
        Some(value) => value
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid iteration count: {value}"))),
    }
}

/// GET /api/v1/iterations — Every recorded iteration, oldest first.
pub async fn list_iterations(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredIteration>>, ApiError> {
    let rows = queries::list_iterations(&state.db).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

/// GET /api/search?query= — Free-text match over descriptive fields.
pub async fn search_iterations(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<StoredIteration>>, ApiError> {
    let rows = queries::search_iterations(&state.db, params.query.trim()).await?;
    tracing::info!(query = %params.query, matches = rows.len(), "Search completed");
    Ok(Json(rows))
}
