use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::core::errors::WstError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    /// `{"error": "<message>"}`
    Json(String),
    /// `echo "<message>"` so a piped shell prints the reason.
    Shell(String),
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: Body,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Body::Json(message.into()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn shell(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Body::Shell(message.into()),
        }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<WstError> for HttpError {
    fn from(err: WstError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl From<tokio::task::JoinError> for HttpError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker task failed: {err}"),
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.status.is_server_error()
            && let Body::Json(message) = &self.body
        {
            eprintln!("[WST-HTTP] {}: {message}", self.status.as_u16());
        }
        match self.body {
            Body::Json(message) => (self.status, Json(json!({ "error": message }))).into_response(),
            Body::Shell(message) => (self.status, format!("echo \"{message}\"")).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let err = HttpError::from(WstError::invalid_input("no path"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = HttpError::from(WstError::Runtime {
            details: "boom".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn shell_errors_keep_status() {
        let response = HttpError::shell(StatusCode::UNAUTHORIZED, "nope").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
