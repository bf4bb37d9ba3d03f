use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use services::services::activation::ActivationError;
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Activation(#[from] ActivationError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0} no longer exists")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            ApiError::Activation(err) => match err {
                ActivationError::TaskNotFound(id) => {
                    tracing::error!(%id, "task no longer exists");
                    (StatusCode::NOT_FOUND, self.to_string())
                }
                ActivationError::ProcessNotFound(id) => {
                    tracing::error!(%id, "process no longer exists");
                    (StatusCode::NOT_FOUND, self.to_string())
                }
                ActivationError::DeviceNotFound(id) => {
                    tracing::error!(%id, "device no longer exists");
                    (StatusCode::NOT_FOUND, self.to_string())
                }
                ActivationError::IllegalTransition { .. } => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                ActivationError::ActiveInvestigation(_) => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                ActivationError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                ActivationError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, err.to_string())
                }
                ActivationError::UnknownNode(node) => {
                    tracing::error!(%node, "task references a node missing from the flow");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Unexpected error, please contact the administrator".to_string(),
                    )
                }
                ActivationError::Database(e) => {
                    tracing::error!(error = %e, "database error during transition");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Unexpected error, please contact the administrator".to_string(),
                    )
                }
            },
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unexpected error, please contact the administrator".to_string(),
                )
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        };

        let response = ApiResponse::<()>::error(&message);
        (status_code, Json(response)).into_response()
    }
}
