use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetplotError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("could not parse line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("could not render the chart: {0}")]
    Render(String),
    #[error("could not render the page: {0}")]
    Template(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, NetplotError>;

impl IntoResponse for NetplotError {
    fn into_response(self) -> Response {
        let status = match self {
            NetplotError::Validation(_) => StatusCode::BAD_REQUEST,
            NetplotError::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            NetplotError::NotFound(_) => StatusCode::NOT_FOUND,
            NetplotError::Render(_) | NetplotError::Template(_) | NetplotError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}
