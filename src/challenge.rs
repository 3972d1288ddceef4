// challenge.rs
use axum::body::Bytes;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChallengeRequest {
    challenge: String,
}

/// Extracts the `challenge` value to echo back for a callback verification.
pub fn handle_challenge(body: &[u8]) -> Result<Bytes, serde_json::Error> {
    let request: ChallengeRequest = serde_json::from_slice(body)?;
    Ok(Bytes::from(request.challenge))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_challenge_string() {
        let body = br#"{"challenge":"abc123","subscription":{"type":"channel.chat.message"}}"#;
        assert_eq!(handle_challenge(body).unwrap(), Bytes::from_static(b"abc123"));
    }

    #[test]
    fn missing_field_is_an_error() {
        assert!(handle_challenge(br#"{"other":"x"}"#).is_err());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(handle_challenge(b"not json").is_err());
        assert!(handle_challenge(br#"{"challenge":42}"#).is_err());
    }
}
