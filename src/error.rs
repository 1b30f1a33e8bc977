use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::statistics::StatisticsError;
use crate::tickets::{Denial, TicketError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        if status.is_server_error() {
            tracing::error!(%status, error = %self.message, "request failed");
        }
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<TicketError> for AppError {
    fn from(value: TicketError) -> Self {
        match value {
            TicketError::Validation(message) => AppError::bad_request(message),
            TicketError::TransitionDenied(denial @ Denial::Unauthorized(_)) => {
                AppError::forbidden(denial.to_string())
            }
            TicketError::TransitionDenied(denial @ Denial::InvalidTransition(_)) => {
                AppError::conflict(denial.to_string())
            }
            TicketError::NotFound(what) => {
                AppError::new(StatusCode::NOT_FOUND, format!("{what} not found"))
            }
            TicketError::Database(err) => AppError::from(err),
            TicketError::Queue(err) => AppError::internal(err),
        }
    }
}

impl From<StatisticsError> for AppError {
    fn from(value: StatisticsError) -> Self {
        match value {
            StatisticsError::InvalidMonth { .. } => AppError::bad_request(value.to_string()),
            StatisticsError::Database(err) => AppError::from(err),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_ticket_errors_to_status_codes() {
        let cases = [
            (
                TicketError::Validation("title must not be empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                TicketError::TransitionDenied(Denial::Unauthorized("nope".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                TicketError::TransitionDenied(Denial::InvalidTransition("DONE -> REVIEW".into())),
                StatusCode::CONFLICT,
            ),
            (TicketError::NotFound("ticket"), StatusCode::NOT_FOUND),
            (
                TicketError::Database(diesel::result::Error::NotFound),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(AppError::from(error).status(), expected);
        }
    }
}
