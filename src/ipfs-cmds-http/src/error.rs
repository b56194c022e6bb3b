//! Error types for the HTTP transport.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ipfs_cmds::{CmdError, ErrorKind, ErrorObject, RequestError};
use thiserror::Error;

/// Transport error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request did not resolve to a valid command invocation.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The command failed before producing output.
    #[error(transparent)]
    Command(#[from] CmdError),

    /// Query string could not be decoded.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// Client side transport failure.
    #[error("API request failed: {0}")]
    Transport(String),

    /// The daemon answered with something that is not a command response.
    #[error("unexpected response from API: {0}")]
    Protocol(String),
}

impl HttpError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Request(RequestError::UnknownCommand { .. }) => StatusCode::NOT_FOUND,
            Self::Request(_) | Self::BadQuery(_) => StatusCode::BAD_REQUEST,
            Self::Command(err) => match err {
                CmdError::Request(RequestError::UnknownCommand { .. }) => StatusCode::NOT_FOUND,
                _ => kind_status(err.kind()),
            },
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Request(err) => err.error_code(),
            Self::Command(err) => err.error_code(),
            Self::BadQuery(_) => "bad_query",
            Self::Transport(_) => "transport_error",
            Self::Protocol(_) => "protocol_error",
        }
    }

    /// The command error this transport error stands for.
    pub fn into_cmd_error(self) -> CmdError {
        match self {
            Self::Request(err) => err.into(),
            Self::Command(err) => err,
            Self::BadQuery(msg) => CmdError::client(msg),
            other => CmdError::normal(other.to_string()),
        }
    }

    fn to_object(&self) -> ErrorObject {
        match self {
            Self::Request(err) => CmdError::Request(err.clone()).to_object(),
            Self::Command(err) => err.to_object(),
            other => ErrorObject {
                kind_tag: ErrorObject::TAG.to_string(),
                kind: if matches!(other, Self::BadQuery(_)) { ErrorKind::Client } else { ErrorKind::Normal },
                code: other.error_code().to_string(),
                message: other.to_string(),
                details: None,
            },
        }
    }
}

/// Status code for an error reported before any output was sent.
pub fn kind_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Client | ErrorKind::ClientOffline => StatusCode::BAD_REQUEST,
        ErrorKind::Normal | ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.error_code(), error = %self, "request rejected");
        }
        (status, Json(self.to_object())).into_response()
    }
}

/// Result type alias for transport operations.
pub type HttpResult<T> = Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let unknown = HttpError::Request(RequestError::UnknownCommand {
            token: "nosuch".into(),
            path: vec![],
        });
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            HttpError::Request(RequestError::UnknownOption("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::Command(CmdError::offline("offline")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::Command(CmdError::normal("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            HttpError::Command(CmdError::Cancelled(ipfs_cmds::CancelCause::Timeout)).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_error_object_round_trip() {
        let err = HttpError::Command(CmdError::exit(3, "verification failed"));
        let object = err.to_object();
        assert_eq!(object.code, "exit_status");
        assert_eq!(object.into_error(), CmdError::exit(3, "verification failed"));
    }
}
