use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::SubmitError, extractors::AppJson, models::SubmitCodeRequest, services::AppState,
};

fn error_response(e: SubmitError) -> (StatusCode, String) {
    let status = match &e {
        SubmitError::UnknownProblem { .. } | SubmitError::AttemptNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SubmitError::InvalidLanguage(_) | SubmitError::InvalidCode(_) => StatusCode::BAD_REQUEST,
        SubmitError::Problem(_) | SubmitError::Store(_) | SubmitError::Queue(_) => {
            tracing::error!(error = %e, "submission request failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    (status, e.to_string())
}

pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SubmitCodeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    tracing::info!(
        "Submitting code for user_id={}, problem={}/{}",
        req.user_id,
        req.challenge,
        req.problem
    );

    match state.submissions.submit_code(&req).await {
        Ok(response) => Ok((StatusCode::CREATED, Json(response))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.submissions.attempt_view(&attempt_id).await {
        Ok(view) => Ok((StatusCode::OK, Json(view))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn recorrect_submission(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Recorrection requested for attempt {}", attempt_id);

    match state.submissions.recorrect(&attempt_id).await {
        Ok(view) => Ok((StatusCode::ACCEPTED, Json(view))),
        Err(e) => Err(error_response(e)),
    }
}
