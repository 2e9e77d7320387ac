use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Tokenizer(_)
            | ServiceError::Inference(_)
            | ServiceError::ModelLoad(_)
            | ServiceError::Io(_)
            | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Caught errors carry their message back in a `detail` field.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "generation failed");
        }

        let body = serde_json::json!({
            "detail": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Unclassified failure: the caller only sees a bare 500, the message goes to
/// the log.
#[derive(Debug)]
pub struct Unhandled(pub ServiceError);

impl From<ServiceError> for Unhandled {
    fn from(err: ServiceError) -> Self {
        Unhandled(err)
    }
}

impl IntoResponse for Unhandled {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "unhandled error while serving request");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}
