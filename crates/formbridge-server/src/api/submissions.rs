//! Public form endpoints used by respondents. No session is required.
//!
//! Provides:
//! - GET /forms/forms/{id} - The form definition
//! - POST /forms/forms/{id}/visibility - Which questions to show for the answers so far
//! - POST /forms/forms/{id}/submit - Validate answers and write them to Airtable

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use formbridge_core::api::{AnswersRequest, FormBody, SubmissionAccepted, SubmissionRejected};
use formbridge_core::forms::{render_plan, validate_submission};
use formbridge_core::{
    Form, FormError, FormRepository, ResponseRepository, UserError, UserRepository,
};

use crate::AppState;
use crate::api::{ApiError, airtable_client, airtable_error};

/// Create the public form router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forms/{id}", get(get_form))
        .route("/forms/{id}/visibility", post(visibility))
        .route("/forms/{id}/submit", post(submit))
}

async fn load_form(state: &AppState, form_id: &str) -> Result<Form, Response> {
    match FormRepository::new(state.db.clone()).get_by_id(form_id).await {
        Ok(form) => Ok(form),
        Err(FormError::NotFound(_)) => {
            Err(ApiError::not_found("Form not found").with_status(StatusCode::NOT_FOUND))
        }
        Err(e) => {
            tracing::error!("Failed to load form {}: {}", form_id, e);
            Err(ApiError::internal("Failed to fetch form")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// GET /forms/forms/{id}
async fn get_form(State(state): State<AppState>, Path(form_id): Path<String>) -> Response {
    match load_form(&state, &form_id).await {
        Ok(form) => Json(FormBody { form }).into_response(),
        Err(response) => response,
    }
}

/// POST /forms/forms/{id}/visibility
///
/// The viewer calls this as answers change. Answers to questions that are
/// now hidden are dropped from the returned plan.
async fn visibility(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    Json(request): Json<AnswersRequest>,
) -> Response {
    match load_form(&state, &form_id).await {
        Ok(form) => Json(render_plan(&form, &request.answers)).into_response(),
        Err(response) => response,
    }
}

/// POST /forms/forms/{id}/submit
///
/// Answers are checked against the form and the live Airtable schema. Nothing
/// is written unless every visible question passes.
async fn submit(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    Json(request): Json<AnswersRequest>,
) -> Response {
    let form = match load_form(&state, &form_id).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let owner = match UserRepository::new(state.db.clone())
        .get_by_id(&form.owner_user_id)
        .await
    {
        Ok(owner) => owner,
        Err(UserError::NotFound(_)) => {
            tracing::warn!(form_id = %form.id, "form owner no longer exists");
            return ApiError::not_found("Form not found").with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            tracing::error!("Failed to load owner of form {}: {}", form.id, e);
            return ApiError::internal("Failed to submit form")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let client = airtable_client(&state, &owner);
    let table_fields = match client
        .table_fields(&form.airtable_base_id, &form.airtable_table_id)
        .await
    {
        Ok(fields) => fields,
        Err(e) => return airtable_error(e, "load the form's table"),
    };

    let submission = match validate_submission(&form, &request.answers, &table_fields) {
        Ok(submission) => submission,
        Err(errors) => {
            tracing::debug!(form_id = %form.id, count = errors.0.len(), "submission rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmissionRejected { errors: errors.0 }),
            )
                .into_response();
        }
    };

    let record = match client
        .create_record(
            &form.airtable_base_id,
            &form.airtable_table_id,
            &submission.fields,
        )
        .await
    {
        Ok(record) => record,
        Err(e) => return airtable_error(e, "save the response to Airtable"),
    };

    match ResponseRepository::new(state.db.clone())
        .create(&form.id, &record.id, &request.answers)
        .await
    {
        Ok(response) => {
            tracing::info!(form_id = %form.id, record_id = %record.id, "stored form response");
            (StatusCode::CREATED, Json(SubmissionAccepted { response })).into_response()
        }
        Err(e) => {
            tracing::error!(
                "Airtable record {} created but response for form {} was not stored: {}",
                record.id,
                form.id,
                e
            );
            ApiError::internal("Failed to store response")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
