use crate::{models::requests::ErrorMessageResponse, services::broker_service::BrokerError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use tracing::error;

/// The one error type handlers return. Renders as `{"description": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(status = self.status.as_u16(), "{}", self.message);
        let body = Json(ErrorMessageResponse {
            description: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}
