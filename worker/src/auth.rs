//! Bearer token handling for player-scoped writes.
//!
//! Trust boundary: the JWT payload is decoded but its signature is not
//! checked here. The token is issued to the host page by the mini-app
//! client's sign-in, and the worker only trusts the `sub` fid and `exp` it
//! carries. Anyone able to mint a well-formed token can act as any fid, so
//! routes guarded by this module must only write data owned by that fid.
//! Issuer verification belongs in front of this worker.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use worker::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    sub: Value,
    exp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedPlayer {
    pub fid: i64,
}

pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token == "null" || token == "undefined" {
        return None;
    }
    Some(token)
}

fn parse_token_claims_unverified(token: &str) -> Result<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::RustError("invalid token format".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::RustError("invalid token payload encoding".into()))?;

    serde_json::from_slice::<TokenClaims>(&payload)
        .map_err(|_| Error::RustError("invalid token payload".into()))
}

/// The token subject is the player's farcaster id.
pub fn authenticate_bearer(
    header: Option<&str>,
    now_seconds: i64,
    leeway_seconds: i64,
) -> Result<AuthenticatedPlayer> {
    let token =
        bearer_token(header).ok_or_else(|| Error::RustError("missing bearer token".into()))?;
    let claims = parse_token_claims_unverified(token)?;

    let fid = match &claims.sub {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .filter(|fid| *fid > 0)
    .ok_or_else(|| Error::RustError("token subject is not a player id".into()))?;

    let exp = claims
        .exp
        .ok_or_else(|| Error::RustError("token missing exp claim".into()))?;
    if exp + leeway_seconds <= now_seconds {
        return Err(Error::RustError("token expired".into()));
    }

    Ok(AuthenticatedPlayer { fid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    fn assert_error_contains<T: std::fmt::Debug>(result: Result<T>, expected_substring: &str) {
        let error = result.expect_err("authentication should fail");
        let message = format!("{error}");
        assert!(
            message.contains(expected_substring),
            "expected error containing `{expected_substring}`, got `{message}`"
        );
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer null")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn numeric_and_string_subjects_authenticate() {
        let numeric = format!("Bearer {}", token(json!({ "sub": 4242, "exp": 2_000 })));
        let string = format!("Bearer {}", token(json!({ "sub": "77", "exp": 2_000 })));

        assert_eq!(
            authenticate_bearer(Some(&numeric), 1_000, 0).unwrap(),
            AuthenticatedPlayer { fid: 4242 }
        );
        assert_eq!(authenticate_bearer(Some(&string), 1_000, 0).unwrap().fid, 77);
    }

    #[test]
    fn expired_and_malformed_tokens_are_rejected() {
        let expired = format!("Bearer {}", token(json!({ "sub": 1, "exp": 1_000 })));
        assert_error_contains(authenticate_bearer(Some(&expired), 1_000, 0), "token expired");
        assert!(authenticate_bearer(Some(&expired), 1_000, 30).is_ok());

        let no_exp = format!("Bearer {}", token(json!({ "sub": 1 })));
        assert_error_contains(authenticate_bearer(Some(&no_exp), 0, 0), "missing exp");

        let bad_sub = format!("Bearer {}", token(json!({ "sub": "user_abc", "exp": 9 })));
        assert_error_contains(authenticate_bearer(Some(&bad_sub), 0, 0), "not a player id");

        assert_error_contains(authenticate_bearer(Some("Bearer a.b"), 0, 0), "invalid token format");
        assert_error_contains(authenticate_bearer(None, 0, 0), "missing bearer token");
    }
}
