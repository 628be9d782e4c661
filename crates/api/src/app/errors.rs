use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use stockloan_workflow::WorkflowError;

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    let status = match &err {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Conflict(_) | WorkflowError::ConstraintViolation(_) => StatusCode::CONFLICT,
        WorkflowError::InvalidState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Relocation(_) => StatusCode::BAD_GATEWAY,
        WorkflowError::Configuration(_) | WorkflowError::Store(_) => {
            error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut body = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    if let WorkflowError::InvalidState { current, .. } = &err {
        body["current_status"] = json!(current);
    }
    (status, axum::Json(body)).into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}
