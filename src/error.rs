use std::time::Duration;
use thiserror::Error;

/// Error codes the classifier keys on. Client-side codes live in the
/// 1000-range; everything below comes from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NetworkFailed,
    ParserError,
    SocketClosed,
    SocketFailure,
    CantParseConnectionEvent,
    CantParseEvent,
    NoErrorBody,
    ApiKeyNotFound,
    ValidationError,
    TokenExpired,
    TokenNotValid,
    TokenDateIncorrect,
    TokenSignatureInvalid,
    UndefinedToken,
    InvalidToken,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::NetworkFailed => 1000,
            ErrorCode::ParserError => 1001,
            ErrorCode::SocketClosed => 1002,
            ErrorCode::SocketFailure => 1003,
            ErrorCode::CantParseConnectionEvent => 1004,
            ErrorCode::CantParseEvent => 1005,
            ErrorCode::NoErrorBody => 1009,
            ErrorCode::ApiKeyNotFound => 2,
            ErrorCode::ValidationError => 4,
            ErrorCode::TokenExpired => 40,
            ErrorCode::TokenNotValid => 41,
            ErrorCode::TokenDateIncorrect => 42,
            ErrorCode::TokenSignatureInvalid => 43,
            ErrorCode::UndefinedToken => 1006,
            ErrorCode::InvalidToken => 1007,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::NetworkFailed => "Response is failed. See cause",
            ErrorCode::ParserError => "Unable to parse error",
            ErrorCode::SocketClosed => "Server closed the connection",
            ErrorCode::SocketFailure => "See stack trace in logs. Intercept error in error handler",
            ErrorCode::CantParseConnectionEvent => "Unable to parse connection event",
            ErrorCode::CantParseEvent => "Unable to parse event",
            ErrorCode::NoErrorBody => "No error body. See http status code",
            ErrorCode::ApiKeyNotFound => "Api key is not found",
            ErrorCode::ValidationError => "Validation error, check your credentials",
            ErrorCode::TokenExpired => "Token expired, new one must be requested",
            ErrorCode::TokenNotValid => "Unauthenticated, token not defined",
            ErrorCode::TokenDateIncorrect => "Unauthenticated, token date incorrect",
            ErrorCode::TokenSignatureInvalid => "Unauthenticated, token signature invalid",
            ErrorCode::UndefinedToken => "No defined token. Check if client was connected",
            ErrorCode::InvalidToken => "Invalid token",
        }
    }

    /// Server codes 40..43 all mean the presented credential is bad in a
    /// way the server could authenticate against a fresh one.
    pub fn is_authentication_error(code: i32) -> bool {
        (ErrorCode::TokenExpired.code()..=ErrorCode::TokenSignatureInvalid.code()).contains(&code)
    }
}

/// A typed error carrying the server-supplied code, as delivered on the
/// errors stream and inside `TemporaryFailure`/`PermanentFailure` states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkError {
    pub message: String,
    pub server_error_code: i32,
    pub status_code: i32,
}

impl NetworkError {
    pub fn new(message: impl Into<String>, server_error_code: i32, status_code: i32) -> Self {
        Self {
            message: message.into(),
            server_error_code,
            status_code,
        }
    }

    pub fn from_error_code(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            server_error_code: code.code(),
            status_code: -1,
        }
    }

    pub fn with_cause(code: ErrorCode, cause: impl std::fmt::Display) -> Self {
        Self {
            message: format!("{}: {}", code.message(), cause),
            server_error_code: code.code(),
            status_code: -1,
        }
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (server code: {}, status: {})",
            self.message, self.server_error_code, self.status_code
        )
    }
}

impl std::error::Error for NetworkError {}

/// Why a channel left the connected state, as reported to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectCause {
    /// The connection was released on purpose (stop or explicit disconnect).
    ConnectionReleased,
    NetworkNotAvailable,
    /// Recoverable error; the health monitor will drive a retry.
    Error(NetworkError),
    /// Unrecoverable error; only a forced reconnect with fresh credentials
    /// can bring the channel back.
    UnrecoverableError(NetworkError),
    /// The server went silent while the transport still looked open.
    SocketNotAvailable,
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("timed out after {0:?} waiting for the connected state")]
    ConnectionTimeout(Duration),
    #[error("socket was stopped while waiting for the connected state")]
    Stopped,
    #[error("current state carries no connection id")]
    NoConnectionId,
}
