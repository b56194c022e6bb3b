//! Error types for the command framework.
//!
//! Every failure that can reach a caller is a [`CmdError`]. Its
//! [`ErrorKind`] decides the CLI exit code and the HTTP status, so the same
//! command reports identically whether it runs in-process or behind the API.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code for a successful invocation.
pub const EXIT_OK: i32 = 0;

/// Exit code for client and normal errors.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for fatal errors (invariant violations, panics).
pub const EXIT_FATAL: i32 = 2;

/// Exit code when the user interrupted the command.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Failure while executing against external state.
    Normal,
    /// The caller's input was invalid.
    Client,
    /// The operation needs an online node.
    ClientOffline,
    /// Programmer error or invariant violation.
    Fatal,
    /// The request context was cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Stable name used in JSON error objects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Client => "client",
            Self::ClientOffline => "client-offline",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the caller is to blame.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client | Self::ClientOffline)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelCause {
    /// The user interrupted the process (Ctrl+C).
    Interrupt,
    /// A deadline derived from the context expired.
    Timeout,
    /// The caller cancelled explicitly.
    Caller,
    /// The consuming side went away.
    Disconnected,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Interrupt => "interrupted",
            Self::Timeout => "context deadline exceeded",
            Self::Caller => "context canceled",
            Self::Disconnected => "receiver disconnected",
        };
        f.write_str(text)
    }
}

/// Failures raised while turning raw invocation input into a request.
///
/// All of them are client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// A token did not name a subcommand of a non-runnable command.
    #[error("unknown command: '{token}'")]
    UnknownCommand {
        /// Offending token.
        token: String,
        /// Path resolved before the offending token.
        path: Vec<String>,
    },

    /// An option is not declared anywhere along the command path.
    #[error("unknown option: '{0}'")]
    UnknownOption(String),

    /// An option value could not be converted to the declared kind.
    #[error("could not convert value '{value}' to type {kind} (for option '{name}')")]
    BadOptionType {
        /// Primary option name.
        name: String,
        /// Declared kind name.
        kind: &'static str,
        /// Raw value.
        value: String,
    },

    /// Two spellings of the same option carried different values.
    #[error("option '{name}' given conflicting values via '{first}' and '{second}'")]
    ConflictingOption {
        /// Primary option name.
        name: String,
        /// First spelling.
        first: String,
        /// Second spelling.
        second: String,
    },

    /// A numeric option fell outside its declared range.
    #[error("value {value} out of range for option '{name}' ({range})")]
    OutOfRange {
        /// Primary option name.
        name: String,
        /// Raw value.
        value: String,
        /// Human readable range.
        range: String,
    },

    /// A required argument was not supplied.
    #[error("argument '{0}' is required")]
    MissingArgument(String),

    /// More positional arguments than the command accepts.
    #[error("expected {expected} argument(s), got {got}")]
    TooManyArguments {
        /// Number of arguments the command accepts.
        expected: usize,
        /// Number of arguments supplied.
        got: usize,
    },

    /// The command has status Removed.
    #[error("{path}: {message}")]
    Removed {
        /// Space-joined command path.
        path: String,
        /// Short explanation.
        message: String,
    },

    /// A file argument could not be used.
    #[error("invalid path '{path}': {reason}")]
    BadPath {
        /// Path as given.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A command without a run function was invoked.
    #[error("This command can't be called directly. Try one of its subcommands.")]
    NotCallable,

    /// The command cannot run in the current execution context.
    #[error("{0}")]
    ContextMismatch(String),
}

impl RequestError {
    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownCommand { .. } => "unknown_command",
            Self::UnknownOption(_) => "unknown_option",
            Self::BadOptionType { .. } => "bad_option_type",
            Self::ConflictingOption { .. } => "conflicting_option",
            Self::OutOfRange { .. } => "bad_option_type",
            Self::MissingArgument(_) => "missing_required_argument",
            Self::TooManyArguments { .. } => "too_many_arguments",
            Self::Removed { .. } => "removed_command",
            Self::BadPath { .. } => "bad_path",
            Self::NotCallable => "not_callable",
            Self::ContextMismatch(_) => "context_mismatch",
        }
    }
}

/// Error carried on a response stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmdError {
    /// The request could not be built.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Invalid caller input detected by the command itself.
    #[error("{0}")]
    Client(String),

    /// The command needs an online node.
    #[error("{0}")]
    Offline(String),

    /// Failure against external state.
    #[error("{0}")]
    Normal(String),

    /// Invariant violation.
    #[error("{0}")]
    Fatal(String),

    /// A value of the wrong dynamic type was emitted or encoded.
    #[error("the command returned a value of type {actual}, expected {expected}")]
    TypeMismatch {
        /// Declared type name.
        expected: &'static str,
        /// Actual type name.
        actual: &'static str,
    },

    /// Emit after close or after an error was set.
    #[error("emitter is closed")]
    Closed,

    /// The request context was cancelled.
    #[error("{0}")]
    Cancelled(CancelCause),

    /// Command specific failure with a dedicated exit code (3..=127).
    #[error("{message}")]
    Exit {
        /// Exit code.
        code: u8,
        /// Message.
        message: String,
    },
}

impl CmdError {
    /// Create a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Create a normal (server-side) error.
    pub fn normal(message: impl Into<String>) -> Self {
        Self::Normal(message.into())
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Create an error signalling that an online node is required.
    pub fn offline(message: impl Into<String>) -> Self {
        Self::Offline(message.into())
    }

    /// Create a command specific error. Codes outside 3..=127 are clamped.
    pub fn exit(code: u8, message: impl Into<String>) -> Self {
        Self::Exit {
            code: code.clamp(3, 127),
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(_) | Self::Client(_) => ErrorKind::Client,
            Self::Offline(_) => ErrorKind::ClientOffline,
            Self::Normal(_) | Self::Exit { .. } => ErrorKind::Normal,
            Self::Fatal(_) | Self::TypeMismatch { .. } | Self::Closed => ErrorKind::Fatal,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } => i32::from(*code),
            Self::Cancelled(CancelCause::Interrupt) => EXIT_INTERRUPTED,
            _ => match self.kind() {
                ErrorKind::Fatal => EXIT_FATAL,
                _ => EXIT_FAILURE,
            },
        }
    }

    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Request(err) => err.error_code(),
            Self::Client(_) => "client_error",
            Self::Offline(_) => "offline",
            Self::Normal(_) => "error",
            Self::Fatal(_) => "fatal",
            Self::TypeMismatch { .. } => "incorrect_type",
            Self::Closed => "emitter_closed",
            Self::Cancelled(_) => "cancelled",
            Self::Exit { .. } => "exit_status",
        }
    }

    /// Whether this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Structured details for JSON error objects.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Request(RequestError::BadOptionType { name, kind, value }) => Some(
                serde_json::json!({ "Option": name, "Type": kind, "Value": value }),
            ),
            Self::Request(RequestError::UnknownCommand { token, path }) => {
                Some(serde_json::json!({ "Token": token, "Path": path }))
            }
            Self::TypeMismatch { expected, actual } => {
                Some(serde_json::json!({ "Expected": expected, "Actual": actual }))
            }
            Self::Exit { code, .. } => Some(serde_json::json!({ "ExitCode": code })),
            _ => None,
        }
    }

    /// Convert to the JSON error object written at the end of a stream.
    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            kind_tag: ErrorObject::TAG.to_string(),
            kind: self.kind(),
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

impl From<std::io::Error> for CmdError {
    fn from(error: std::io::Error) -> Self {
        Self::Normal(error.to_string())
    }
}

/// Terminal error object of a JSON response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorObject {
    /// Always `"error"`.
    #[serde(rename = "Type")]
    pub kind_tag: String,
    /// Error category.
    pub kind: ErrorKind,
    /// Stable error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorObject {
    /// Value of the `Type` field.
    pub const TAG: &'static str = "error";

    /// Whether a decoded JSON value is an error object.
    pub fn is_error_object(value: &serde_json::Value) -> bool {
        value.get("Type").and_then(|v| v.as_str()) == Some(Self::TAG)
            && value.get("Message").is_some()
    }

    /// Rebuild a [`CmdError`] on the receiving side of a transport.
    pub fn into_error(self) -> CmdError {
        match self.kind {
            ErrorKind::Client => CmdError::Client(self.message),
            ErrorKind::ClientOffline => CmdError::Offline(self.message),
            ErrorKind::Normal => {
                let code = self
                    .details
                    .as_ref()
                    .and_then(|d| d.get("ExitCode"))
                    .and_then(|c| c.as_u64())
                    .and_then(|c| u8::try_from(c).ok());
                match code {
                    Some(code) => CmdError::exit(code, self.message),
                    None => CmdError::Normal(self.message),
                }
            }
            ErrorKind::Fatal => CmdError::Fatal(self.message),
            ErrorKind::Cancelled => CmdError::Cancelled(CancelCause::Caller),
        }
    }
}

/// Result type for command operations.
pub type CmdResult<T> = Result<T, CmdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CmdError::client("bad").exit_code(), EXIT_FAILURE);
        assert_eq!(CmdError::normal("boom").exit_code(), EXIT_FAILURE);
        assert_eq!(CmdError::fatal("bug").exit_code(), EXIT_FATAL);
        assert_eq!(CmdError::Closed.exit_code(), EXIT_FATAL);
        assert_eq!(
            CmdError::Cancelled(CancelCause::Interrupt).exit_code(),
            EXIT_INTERRUPTED
        );
        assert_eq!(CmdError::Cancelled(CancelCause::Timeout).exit_code(), 1);
        assert_eq!(CmdError::exit(42, "verify failed").exit_code(), 42);
    }

    #[test]
    fn test_exit_code_clamped_away_from_reserved() {
        assert_eq!(CmdError::exit(1, "x").exit_code(), 3);
        assert_eq!(CmdError::exit(200, "x").exit_code(), 127);
    }

    #[test]
    fn test_kinds() {
        let err: CmdError = RequestError::UnknownOption("x".into()).into();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.error_code(), "unknown_option");
        assert_eq!(CmdError::offline("x").kind(), ErrorKind::ClientOffline);
        assert!(ErrorKind::ClientOffline.is_client());
        assert_eq!(
            CmdError::TypeMismatch {
                expected: "A",
                actual: "B"
            }
            .kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_error_object_shape() {
        let err: CmdError = RequestError::BadOptionType {
            name: "recursive".into(),
            kind: "bool",
            value: "maybe".into(),
        }
        .into();
        let json = serde_json::to_value(err.to_object()).unwrap();
        assert_eq!(json["Type"], "error");
        assert_eq!(json["Kind"], "client");
        assert_eq!(json["Code"], "bad_option_type");
        assert_eq!(json["Details"]["Option"], "recursive");
        assert!(ErrorObject::is_error_object(&json));
    }

    #[test]
    fn test_error_object_round_trip_keeps_exit_code() {
        let obj = CmdError::exit(9, "verification failed").to_object();
        let back = obj.into_error();
        assert_eq!(back.exit_code(), 9);
        assert_eq!(back.to_string(), "verification failed");
    }
}
