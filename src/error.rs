// error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::dispatch::DispatchError;
use crate::signature::SecretError;

/// Broad failure classes, each with a fixed status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    UnsupportedType,
    Handler,
    Internal,
    // Dispatch queue full; the sender should retry.
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[source] chrono::ParseError),

    #[error("timestamp is {age_secs}s old")]
    ExpiredTimestamp { age_secs: u64 },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("webhook secret unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid challenge body: {0}")]
    Challenge(#[source] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl WebhookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSignature => ErrorKind::Authentication,
            Self::Secret(_) => ErrorKind::Internal,
            Self::Dispatch(DispatchError::UnsupportedType(_)) => ErrorKind::UnsupportedType,
            Self::Dispatch(DispatchError::Payload { .. }) => ErrorKind::Handler,
            Self::Dispatch(DispatchError::Saturated { .. }) => ErrorKind::Unavailable,
            _ => ErrorKind::Validation,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Authentication => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Short plaintext reason returned to the sender.
    pub fn reason(&self) -> String {
        match self {
            Self::MissingHeader(_) => "missing headers".to_string(),
            Self::InvalidTimestamp(_) => "invalid timestamp".to_string(),
            Self::ExpiredTimestamp { .. } => "expired timestamp".to_string(),
            Self::BodyRead(_) => "failed to read body".to_string(),
            Self::InvalidSignature => "invalid signature".to_string(),
            Self::Secret(_) => "internal error".to_string(),
            Self::UnknownMessageType(_) => "unknown message type".to_string(),
            Self::Challenge(_) => "failed challenge".to_string(),
            Self::Dispatch(DispatchError::UnsupportedType(kind)) => {
                format!("unsupported subscription type: {}", kind)
            }
            Self::Dispatch(DispatchError::Saturated { .. }) => "dispatcher busy".to_string(),
            Self::Dispatch(_) => "failed to process notification".to_string(),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::Authentication => {
                warn!(security_event = true, error = %self, "rejected webhook request")
            }
            ErrorKind::Internal => error!(error = %self, "webhook request failed"),
            ErrorKind::Unavailable => warn!(error = %self, "webhook request deferred"),
            _ => warn!(error = %self, "rejected webhook request"),
        }

        (self.status_code(), self.reason()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failure_is_forbidden() {
        assert_eq!(
            WebhookError::InvalidSignature.status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn validation_failures_are_bad_request() {
        let errors = [
            WebhookError::MissingHeader("Message-Id"),
            WebhookError::ExpiredTimestamp { age_secs: 660 },
            WebhookError::UnknownMessageType("ping".to_string()),
            WebhookError::Dispatch(DispatchError::UnsupportedType("x".to_string())),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn unsupported_type_reason_names_the_type() {
        let err = WebhookError::Dispatch(DispatchError::UnsupportedType(
            "channel.follow".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(err.reason(), "unsupported subscription type: channel.follow");
    }

    #[test]
    fn missing_secret_is_internal() {
        let err = WebhookError::from(SecretError::Empty);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.reason(), "internal error");
    }

    #[test]
    fn saturated_dispatcher_is_unavailable() {
        let err = WebhookError::Dispatch(DispatchError::Saturated { limit: 8 });
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.reason(), "dispatcher busy");
    }
}
