//! Bearer tokens carried in call headers.

use rand::Rng;
use streamfile_protocol::Headers;
use streamfile_protocol::constants::AUTHORIZATION_HEADER;

/// Token length in bytes (rendered as 32 hex characters).
const TOKEN_BYTES: usize = 16;

const BEARER_PREFIX: &str = "Bearer ";

/// Generates a CSPRNG token as a lowercase hex string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Builds the header set that authenticates with `token`.
pub fn bearer_headers(token: &str) -> Headers {
    Headers::new().with(AUTHORIZATION_HEADER, format!("{BEARER_PREFIX}{token}"))
}

/// Extracts the token from the first `authorization: Bearer ...` header.
pub fn bearer_token(headers: &Headers) -> Option<&str> {
    headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
}

/// Compares two tokens in constant time (for equal lengths).
pub fn tokens_match(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let diff = received
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn bearer_roundtrip() {
        let headers = bearer_headers("abc123");
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_requires_scheme() {
        let headers = Headers::new().with("authorization", "Basic abc123");
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&Headers::new()), None);
    }

    #[test]
    fn token_comparison() {
        let token = generate_token();
        assert!(tokens_match(&token, &token));
        assert!(!tokens_match(&token, &generate_token()));
        assert!(!tokens_match("short", "this_is_longer"));
    }
}
