use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::redeem::RedeemError, cache::FileCacheError, config::LoadError,
    infra::error::InfraError, users::UserStoreError,
};

/// Diagnostic chain attached to error responses for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error response: the public message is the body, the report
/// carries the detail.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<FileCacheError> for HttpError {
    fn from(error: FileCacheError) -> Self {
        const SOURCE: &str = "infra::http::files";
        match error {
            FileCacheError::InvalidPath { .. } | FileCacheError::NotFound { .. } => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "File Not Found", &error)
            }
            FileCacheError::Io { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

impl From<RedeemError> for HttpError {
    fn from(error: RedeemError) -> Self {
        const SOURCE: &str = "application::redeem";
        match error {
            RedeemError::AlreadyUnlocked => {
                HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "already logged in", &error)
            }
            RedeemError::MissingPassword => {
                HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "missing body", &error)
            }
            RedeemError::InvalidPassword => {
                HttpError::from_error(SOURCE, StatusCode::UNAUTHORIZED, "invalid password", &error)
            }
            RedeemError::Disabled => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "red33m access is unavailable",
                &error,
            ),
            RedeemError::Store(UserStoreError::Closed) => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service shutting down",
                &error,
            ),
            RedeemError::Hash(_) | RedeemError::Store(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] UserStoreError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Store(UserStoreError::UserNotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Store(UserStoreError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_)
            | AppError::Infra(_)
            | AppError::Config(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Request could not be processed",
            AppError::Store(UserStoreError::UserNotFound { .. }) => "Visitor not found",
            AppError::Store(UserStoreError::Closed) => "Service shutting down",
            AppError::Store(_) => "Visitor store failure",
            AppError::Infra(InfraError::Io(_) | InfraError::Writer(_)) => {
                "I/O failure during request"
            }
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Config(_) => "Service misconfigured",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
