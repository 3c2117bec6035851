//! Form builder endpoints. All routes require a signed-in user.
//!
//! Provides:
//! - GET /forms/me/bases - Airtable bases the user can see
//! - GET /forms/me/bases/{base_id}/tables - Tables in a base
//! - GET /forms/me/bases/{base_id}/tables/{table_id}/fields - Fields a form can use
//! - POST /forms/forms - Create a form
//! - GET /forms/forms - The user's forms, newest first
//! - GET /forms/forms/{id}/responses - Responses to one of the user's forms

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use formbridge_core::airtable::supported_fields;
use formbridge_core::api::{
    BasesResponse, FieldsResponse, FormBody, FormsResponse, ResponsesResponse, TablesResponse,
};
use formbridge_core::forms::{FormDefinitionRequest, validate_definition};
use formbridge_core::responses::ResponsePreview;
use formbridge_core::{FormError, FormRepository, ResponseRepository};

use crate::AppState;
use crate::api::auth::AuthUser;
use crate::api::{ApiError, airtable_client, airtable_error};

/// Create the builder router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me/bases", get(list_bases))
        .route("/me/bases/{base_id}/tables", get(list_tables))
        .route("/me/bases/{base_id}/tables/{table_id}/fields", get(list_fields))
        .route("/forms", get(list_forms).post(create_form))
        .route("/forms/{id}/responses", get(list_responses))
}

/// GET /forms/me/bases
async fn list_bases(State(state): State<AppState>, AuthUser(user): AuthUser) -> Response {
    match airtable_client(&state, &user).list_bases().await {
        Ok(bases) => Json(BasesResponse { bases }).into_response(),
        Err(e) => airtable_error(e, "fetch bases"),
    }
}

/// GET /forms/me/bases/{base_id}/tables
async fn list_tables(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(base_id): Path<String>,
) -> Response {
    match airtable_client(&state, &user).list_tables(&base_id).await {
        Ok(tables) => Json(TablesResponse { tables }).into_response(),
        Err(e) => airtable_error(e, "fetch tables"),
    }
}

/// GET /forms/me/bases/{base_id}/tables/{table_id}/fields
///
/// Only fields with a question type are listed, so the builder never offers
/// a field it cannot write.
async fn list_fields(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((base_id, table_id)): Path<(String, String)>,
) -> Response {
    match airtable_client(&state, &user)
        .table_fields(&base_id, &table_id)
        .await
    {
        Ok(fields) => Json(FieldsResponse {
            fields: supported_fields(&fields),
        })
        .into_response(),
        Err(e) => airtable_error(e, "fetch fields"),
    }
}

/// POST /forms/forms
async fn create_form(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<FormDefinitionRequest>,
) -> Response {
    let definition = match validate_definition(&request) {
        Ok(definition) => definition,
        Err(e) => {
            return ApiError::bad_request(e.to_string()).with_status(StatusCode::BAD_REQUEST);
        }
    };

    match FormRepository::new(state.db.clone())
        .create(&user.id, definition)
        .await
    {
        Ok(form) => {
            tracing::info!(form_id = %form.id, user_id = %user.id, "created form");
            (StatusCode::CREATED, Json(FormBody { form })).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to create form: {}", e);
            ApiError::internal("Failed to create form")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /forms/forms
async fn list_forms(State(state): State<AppState>, AuthUser(user): AuthUser) -> Response {
    match FormRepository::new(state.db.clone())
        .list_for_owner(&user.id)
        .await
    {
        Ok(forms) => Json(FormsResponse { forms }).into_response(),
        Err(e) => {
            tracing::error!("Failed to list forms: {}", e);
            ApiError::internal("Failed to fetch forms")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /forms/forms/{id}/responses
///
/// Another user's form is reported as missing.
async fn list_responses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(form_id): Path<String>,
) -> Response {
    let form = match FormRepository::new(state.db.clone())
        .get_for_owner(&user.id, &form_id)
        .await
    {
        Ok(form) => form,
        Err(FormError::NotFound(_)) => {
            return ApiError::not_found("Form not found").with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            tracing::error!("Failed to load form {}: {}", form_id, e);
            return ApiError::internal("Failed to fetch responses")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match ResponseRepository::new(state.db.clone())
        .list_for_form(&form.id)
        .await
    {
        Ok(responses) => Json(ResponsesResponse {
            responses: responses.into_iter().map(ResponsePreview::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to list responses for form {}: {}", form.id, e);
            ApiError::internal("Failed to fetch responses")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_json, seed_user, test_state};
    use formbridge_core::forms::FormDefinition;
    use formbridge_core::{Question, QuestionType, User};
    use serde_json::{Map, json};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn builder_request(title: &str) -> FormDefinitionRequest {
        serde_json::from_value(json!({
            "airtableBaseId": "app1",
            "airtableTableId": "tbl1",
            "title": title,
            "questions": [
                {
                    "questionKey": "name",
                    "airtableFieldId": "fldName",
                    "label": "Name",
                    "type": "singleLineText",
                    "required": true
                },
                {
                    "questionKey": "role",
                    "airtableFieldId": "fldRole",
                    "label": "Role",
                    "type": "singleSelect",
                    "conditionalRules": {
                        "logic": "AND",
                        "conditions": [
                            { "questionKey": "name", "operator": "notEquals", "value": "" }
                        ]
                    }
                }
            ]
        }))
        .expect("request")
    }

    async fn seed_form(state: &AppState, owner: &User, title: &str) -> String {
        FormRepository::new(state.db.clone())
            .create(
                &owner.id,
                FormDefinition {
                    airtable_base_id: "app1".into(),
                    airtable_table_id: "tbl1".into(),
                    title: title.into(),
                    questions: vec![Question {
                        question_key: "name".into(),
                        airtable_field_id: "fldName".into(),
                        label: "Name".into(),
                        question_type: QuestionType::SingleLineText,
                        required: false,
                        conditional_rules: None,
                        options: json!({}),
                    }],
                },
            )
            .await
            .expect("seed form")
            .id
    }

    #[tokio::test]
    async fn list_bases_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases"))
            .and(query_param("offset", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bases": [{ "id": "app2", "name": "Second", "permissionLevel": "create" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases"))
            .and(header("authorization", "Bearer access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bases": [{ "id": "app1", "name": "First", "permissionLevel": "create" }],
                "offset": "page2"
            })))
            .mount(&server)
            .await;

        let (state, _dir) = test_state(&server.uri()).await;
        let user = seed_user(&state, "usr1").await;

        let response = list_bases(State(state), AuthUser(user)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let ids: Vec<&str> = body["bases"]
            .as_array()
            .expect("bases")
            .iter()
            .filter_map(|b| b["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["app1", "app2"]);
    }

    #[tokio::test]
    async fn list_fields_keeps_only_supported_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases/app1/tables"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tables": [{
                    "id": "tbl1",
                    "name": "Applicants",
                    "fields": [
                        { "id": "fldName", "name": "Name", "type": "singleLineText" },
                        { "id": "fldNotes", "name": "Notes", "type": "multilineText" },
                        { "id": "fldScore", "name": "Score", "type": "number" },
                        {
                            "id": "fldRole",
                            "name": "Role",
                            "type": "singleSelect",
                            "options": { "choices": [{ "id": "sel1", "name": "Engineer" }] }
                        }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let (state, _dir) = test_state(&server.uri()).await;
        let user = seed_user(&state, "usr1").await;

        let response = list_fields(
            State(state),
            AuthUser(user),
            Path(("app1".to_string(), "tbl1".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let fields = body["fields"].as_array().expect("fields");
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1]["mappedType"], "longText");
        assert_eq!(fields[0]["options"], json!({}));
        assert_eq!(fields[2]["options"]["choices"][0]["name"], "Engineer");
    }

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases/app1/tables"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tables": [] })))
            .mount(&server)
            .await;

        let (state, _dir) = test_state(&server.uri()).await;
        let user = seed_user(&state, "usr1").await;

        let response = list_fields(
            State(state),
            AuthUser(user),
            Path(("app1".to_string(), "tblMissing".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn airtable_failures_map_to_gateway_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases/app1/tables"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let (state, _dir) = test_state(&server.uri()).await;
        let user = seed_user(&state, "usr1").await;

        let response = list_tables(State(state), AuthUser(user), Path("app1".to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "airtable_error");
    }

    #[tokio::test]
    async fn create_form_validates_and_stores_definition() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let user = seed_user(&state, "usr1").await;

        let response = create_form(
            State(state.clone()),
            AuthUser(user.clone()),
            Json(builder_request("  Applications  ")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["form"]["title"], "Applications");
        assert_eq!(body["form"]["ownerUserId"], user.id.as_str());
        assert_eq!(
            body["form"]["questions"][1]["conditionalRules"]["conditions"][0]["operator"],
            "notEquals"
        );

        let stored = FormRepository::new(state.db.clone())
            .list_for_owner(&user.id)
            .await
            .expect("list");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn create_form_rejects_invalid_definitions() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let user = seed_user(&state, "usr1").await;

        let mut missing_title = builder_request("x");
        missing_title.title = None;
        let response =
            create_form(State(state.clone()), AuthUser(user.clone()), Json(missing_title)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Missing required fields");

        let mut bad_type = builder_request("x");
        bad_type.questions = Some(json!([{
            "questionKey": "q",
            "airtableFieldId": "fld",
            "label": "Q",
            "type": "rating"
        }]));
        let response = create_form(State(state), AuthUser(user), Json(bad_type)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "Unsupported question type: rating"
        );
    }

    #[tokio::test]
    async fn list_forms_is_scoped_to_owner() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let owner = seed_user(&state, "usr1").await;
        let other = seed_user(&state, "usr2").await;
        seed_form(&state, &owner, "First").await;
        seed_form(&state, &other, "Not mine").await;

        let response = list_forms(State(state), AuthUser(owner)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let forms = body["forms"].as_array().expect("forms");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["title"], "First");
    }

    #[tokio::test]
    async fn list_responses_previews_owned_forms_only() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let owner = seed_user(&state, "usr1").await;
        let other = seed_user(&state, "usr2").await;
        let form_id = seed_form(&state, &owner, "First").await;

        let mut answers = Map::new();
        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
            answers.insert(key.into(), json!(value));
        }
        ResponseRepository::new(state.db.clone())
            .create(&form_id, "rec1", &answers)
            .await
            .expect("response");

        let response =
            list_responses(State(state.clone()), AuthUser(owner), Path(form_id.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let responses = body["responses"].as_array().expect("responses");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["airtableRecordId"], "rec1");
        assert_eq!(responses[0]["status"], "active");
        assert_eq!(
            responses[0]["previewAnswers"],
            json!({ "a": "1", "b": "2", "c": "3" })
        );

        let response = list_responses(State(state), AuthUser(other), Path(form_id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
