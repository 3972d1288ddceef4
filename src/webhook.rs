// webhook.rs
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    cache::DedupeCache,
    challenge::handle_challenge,
    config::Config,
    dispatch::{peek_envelope, DispatchError, DispatchTicket, Dispatcher, RouteTable},
    error::WebhookError,
    signature::{EnvSecret, SecretProvider, SignatureVerifier, StaticSecret},
    MessageType, HEADER_MESSAGE_ID, HEADER_MESSAGE_SIGNATURE, HEADER_MESSAGE_TIMESTAMP,
    HEADER_MESSAGE_TYPE,
};

/// Successful terminal states. Every variant answers 200.
#[derive(Debug)]
pub enum WebhookOutcome {
    Dispatched(DispatchTicket),
    /// Already accepted within the dedupe window; nothing was dispatched.
    Duplicate,
    Challenge(Bytes),
    Revoked,
}

impl IntoResponse for WebhookOutcome {
    fn into_response(self) -> Response {
        match self {
            WebhookOutcome::Challenge(challenge) => (StatusCode::OK, challenge).into_response(),
            _ => StatusCode::OK.into_response(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RequiredHeaders<'a> {
    message_id: &'a str,
    message_type: &'a str,
    timestamp: &'a str,
    signature: &'a str,
}

impl<'a> RequiredHeaders<'a> {
    fn extract(headers: &'a HeaderMap) -> Result<Self, WebhookError> {
        Ok(Self {
            message_id: header(headers, HEADER_MESSAGE_ID)?,
            message_type: header(headers, HEADER_MESSAGE_TYPE)?,
            timestamp: header(headers, HEADER_MESSAGE_TIMESTAMP)?,
            signature: header(headers, HEADER_MESSAGE_SIGNATURE)?,
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(WebhookError::MissingHeader(name))
}

/// Parses an RFC 3339 timestamp and rejects it if older than `window`.
pub fn check_timestamp(
    raw: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<DateTime<Utc>, WebhookError> {
    let sent = DateTime::parse_from_rfc3339(raw)
        .map_err(WebhookError::InvalidTimestamp)?
        .with_timezone(&Utc);

    // Timestamps ahead of the local clock count as zero age.
    let age = now.signed_duration_since(sent).to_std().unwrap_or_default();
    if age > window {
        return Err(WebhookError::ExpiredTimestamp {
            age_secs: age.as_secs(),
        });
    }
    Ok(sent)
}

#[derive(Debug)]
pub struct WebhookEndpoint {
    verifier: SignatureVerifier,
    cache: DedupeCache,
    dispatcher: Dispatcher,
    freshness_window: Duration,
    max_body_bytes: usize,
}

impl WebhookEndpoint {
    pub fn new(
        verifier: SignatureVerifier,
        cache: DedupeCache,
        dispatcher: Dispatcher,
        freshness_window: Duration,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            verifier,
            cache,
            dispatcher,
            freshness_window,
            max_body_bytes,
        }
    }

    pub fn from_config(config: &Config, routes: RouteTable) -> Self {
        let secrets: Box<dyn SecretProvider> = match &config.secret_env {
            Some(var) => Box::new(EnvSecret::new(var)),
            None => Box::new(StaticSecret::new(
                config.webhook_secret.clone().unwrap_or_default(),
            )),
        };

        Self::new(
            SignatureVerifier::new(secrets),
            DedupeCache::new(config.dedupe_ttl(), config.dedupe_capacity),
            Dispatcher::new(
                routes,
                config.max_concurrent_dispatches,
                config.max_queued_dispatches,
                config.handler_timeout(),
            ),
            config.freshness_window(),
            config.max_body_bytes,
        )
    }

    pub fn cache(&self) -> &DedupeCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn handle(
        &self,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<WebhookOutcome, WebhookError> {
        let required = RequiredHeaders::extract(headers)?;
        debug!(
            message_id = %required.message_id,
            message_type = %required.message_type,
            timestamp = %required.timestamp,
            "extracted headers"
        );

        check_timestamp(required.timestamp, Utc::now(), self.freshness_window)?;

        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| WebhookError::BodyRead(e.to_string()))?;
        debug!(body_bytes = body.len(), "read request body");

        let verified = self.verifier.verify_request(
            required.message_id,
            required.timestamp,
            &body,
            required.signature,
        )?;
        if !verified {
            return Err(WebhookError::InvalidSignature);
        }
        debug!(message_id = %required.message_id, "signature verified");

        if !self.cache.insert_if_absent(required.message_id) {
            debug!(message_id = %required.message_id, "duplicate message; already processed");
            return Ok(WebhookOutcome::Duplicate);
        }

        match MessageType::parse(required.message_type) {
            Some(MessageType::Notification) => {
                let ticket = match self.dispatcher.dispatch(&body) {
                    Ok(ticket) => ticket,
                    Err(err @ DispatchError::Saturated { .. }) => {
                        // Nothing ran, so the redelivery must not count as a duplicate.
                        self.cache.remove(required.message_id);
                        return Err(err.into());
                    }
                    Err(err) => return Err(err.into()),
                };
                debug!(
                    message_id = %required.message_id,
                    dispatch_id = %ticket.id,
                    route = %ticket.route,
                    "notification dispatched"
                );
                Ok(WebhookOutcome::Dispatched(ticket))
            }
            Some(MessageType::Challenge) => {
                let challenge = handle_challenge(&body).map_err(WebhookError::Challenge)?;
                debug!(message_id = %required.message_id, "answered callback verification");
                Ok(WebhookOutcome::Challenge(challenge))
            }
            Some(MessageType::Revocation) => {
                match peek_envelope(&body) {
                    Ok(envelope) => warn!(
                        message_id = %required.message_id,
                        subscription_id = %envelope.subscription.id,
                        subscription_type = %envelope.subscription.kind,
                        status = %envelope.subscription.status,
                        "received subscription revocation"
                    ),
                    Err(_) => warn!(
                        message_id = %required.message_id,
                        "received subscription revocation"
                    ),
                }
                Ok(WebhookOutcome::Revoked)
            }
            None => Err(WebhookError::UnknownMessageType(
                required.message_type.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use chrono::Duration as ChronoDuration;

    const WINDOW: Duration = Duration::from_secs(600);

    #[test]
    fn fresh_timestamp_is_accepted() {
        let now = Utc::now();
        let raw = (now - ChronoDuration::minutes(9)).to_rfc3339();
        assert!(check_timestamp(&raw, now, WINDOW).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = Utc::now();
        let raw = (now - ChronoDuration::minutes(11)).to_rfc3339();
        assert!(matches!(
            check_timestamp(&raw, now, WINDOW),
            Err(WebhookError::ExpiredTimestamp { age_secs: 660 })
        ));
    }

    #[test]
    fn future_timestamp_counts_as_fresh() {
        let now = Utc::now();
        let raw = (now + ChronoDuration::minutes(30)).to_rfc3339();
        assert!(check_timestamp(&raw, now, WINDOW).is_ok());
    }

    #[test]
    fn nanosecond_timestamps_parse() {
        let now = DateTime::parse_from_rfc3339("2023-07-19T14:56:51Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(check_timestamp("2023-07-19T14:56:51.634234626Z", now, WINDOW).is_ok());
    }

    #[test]
    fn garbage_timestamp_is_invalid() {
        assert!(matches!(
            check_timestamp("yesterday", Utc::now(), WINDOW),
            Err(WebhookError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn empty_header_counts_as_missing() {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (HEADER_MESSAGE_ID, ""),
            (HEADER_MESSAGE_TYPE, "notification"),
            (HEADER_MESSAGE_TIMESTAMP, "2024-01-01T00:00:00Z"),
            (HEADER_MESSAGE_SIGNATURE, "sha256=00"),
        ] {
            headers.insert(
                HeaderName::try_from(name).unwrap(),
                HeaderValue::from_static(value),
            );
        }

        assert!(matches!(
            RequiredHeaders::extract(&headers),
            Err(WebhookError::MissingHeader(HEADER_MESSAGE_ID))
        ));
    }
}
