//! HS256-only bearer token validation.
//!
//! Narrows the JWT middleware's `AnyVerifyKey` multi-algorithm dispatch down to the single
//! algorithm this proxy accepts, and borrows the bearer extractor's per-variant
//! `BearerAuthError` -> `Responder` idiom for the distinct failure kinds below. Issuer and
//! audience are compared as exact strings here rather than handed to `jwt-simple`'s own
//! `VerificationOptions` allow-lists, so a mismatch can be reported as its own error kind instead
//! of collapsing into one generic signature-verification failure.

use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use http::HeaderName;
use http::StatusCode;
use jwt_simple::prelude::*;
use uuid::Uuid;

use crate::responder::Responder;
use crate::types::{Request, Response};

/// Claims this proxy expects to find on every bearer token, beyond the registered `iss`/`aud`/
/// `sub`/`exp`/`iat` fields `jwt-simple` already parses into `JWTClaims`. Extra claims (including
/// ones not listed here) are ignored.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProxyClaims {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sid: Option<String>,
}

/// The authenticated caller, derived from a validated token. Bound to the request; never stored.
#[derive(Debug, Clone)]
pub struct UserContext {
  pub user_id: Uuid,
  pub email: Option<String>,
  pub role: Option<String>,
  pub session_id: Option<String>,
  pub issued_at: SystemTime,
  pub expires_at: SystemTime,
}

/// Distinct authentication failure kinds. Kept separate (rather than one opaque "invalid token")
/// so logs and metrics can distinguish a misconfigured client from an actual attack.
#[derive(Debug)]
pub enum AuthError {
  MissingHeader,
  MalformedHeader,
  MalformedToken,
  WrongAlgorithm,
  BadSignature,
  Expired,
  WrongIssuer,
  WrongAudience,
  UnparseableSubject,
}

impl Responder for AuthError {
  /// Every variant maps to 401: the response body never leaks which check failed, since that
  /// information is only useful to an attacker probing for a weaker validation path.
  fn into_response(self) -> Response {
    (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response()
  }
}

/// Validates HS256 bearer tokens against a single shared secret, issuer, and audience. The
/// header the token is read from is injected too, since it's a configurable name
/// (`ALTPROXY_BACKEND_AUTH_HEADER`), not the standard `Authorization` bearer scheme.
pub struct TokenValidator {
  key: HS256Key,
  issuer: String,
  audience: String,
  header_name: HeaderName,
}

impl TokenValidator {
  pub fn new(
    secret: &[u8],
    issuer: impl Into<String>,
    audience: impl Into<String>,
    header_name: HeaderName,
  ) -> Self {
    Self {
      key: HS256Key::from_bytes(secret),
      issuer: issuer.into(),
      audience: audience.into(),
      header_name,
    }
  }

  /// Extracts and validates the token from the configured backend-auth header, returning the
  /// caller's identity on success.
  pub fn authenticate(&self, req: &Request) -> Result<UserContext, AuthError> {
    let token = extract_token(req.headers(), &self.header_name)?;
    self.validate_token(token)
  }

  fn validate_token(&self, token: &str) -> Result<UserContext, AuthError> {
    let metadata = jwt_simple::token::Token::decode_metadata(token)
      .map_err(|_| AuthError::MalformedToken)?;
    if metadata.algorithm() != "HS256" {
      return Err(AuthError::WrongAlgorithm);
    }

    // No allowed_issuers/allowed_audiences here: those options fold a mismatch into jwt-simple's
    // generic verification error, which would erase the distinction this validator needs.
    let options = VerificationOptions::default();
    let claims = self
      .key
      .verify_token::<ProxyClaims>(token, Some(options))
      .map_err(classify_verify_error)?;

    match &claims.issuer {
      Some(issuer) if issuer == &self.issuer => {}
      _ => return Err(AuthError::WrongIssuer),
    }

    let audience_matches = claims
      .audiences
      .as_ref()
      .map(|aud| aud.contains(&self.audience))
      .unwrap_or(false);
    if !audience_matches {
      return Err(AuthError::WrongAudience);
    }

    let subject = claims.subject.as_deref().ok_or(AuthError::UnparseableSubject)?;
    let user_id = Uuid::parse_str(subject).map_err(|_| AuthError::UnparseableSubject)?;

    let issued_at = claims
      .issued_at
      .map(duration_to_system_time)
      .unwrap_or(UNIX_EPOCH);
    let expires_at = claims
      .expires_at
      .map(duration_to_system_time)
      .unwrap_or(UNIX_EPOCH);

    Ok(UserContext {
      user_id,
      email: claims.custom.email,
      role: claims.custom.role,
      session_id: claims.custom.sid,
      issued_at,
      expires_at,
    })
  }
}

fn duration_to_system_time(d: jwt_simple::prelude::Duration) -> SystemTime {
  UNIX_EPOCH + StdDuration::from_secs(d.as_secs())
}

fn extract_token<'a>(headers: &'a http::HeaderMap, header_name: &HeaderName) -> Result<&'a str, AuthError> {
  let header = headers.get(header_name).ok_or(AuthError::MissingHeader)?;
  let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
  let trimmed = value.trim();
  if trimmed.is_empty() {
    return Err(AuthError::MalformedHeader);
  }
  Ok(trimmed)
}

fn classify_verify_error(err: jwt_simple::Error) -> AuthError {
  if message_indicates_expiry(&err.to_string()) {
    AuthError::Expired
  } else {
    AuthError::BadSignature
  }
}

fn message_indicates_expiry(message: &str) -> bool {
  message.to_ascii_lowercase().contains("expired")
}

trait AudiencesExt {
  fn contains(&self, expected: &str) -> bool;
}

impl AudiencesExt for Audiences {
  fn contains(&self, expected: &str) -> bool {
    match self {
      Audiences::AsString(s) => s == expected,
      Audiences::AsSet(set) => set.contains(expected),
    }
  }
}

/// Shared validator handle, cloneable across pipeline stages.
pub type SharedTokenValidator = Arc<TokenValidator>;

#[cfg(test)]
mod tests {
  use super::*;

  fn validator() -> TokenValidator {
    TokenValidator::new(
      b"test-secret-value-long-enough",
      "alt-bff",
      "alt-clients",
      HeaderName::from_static("x-alt-backend-token"),
    )
  }

  fn sign(key: &HS256Key, issuer: &str, audience: &str, subject: &str) -> String {
    let claims = Claims::with_custom_claims(ProxyClaims::default(), Duration::from_mins(5))
      .with_issuer(issuer)
      .with_audience(audience)
      .with_subject(subject);
    key.authenticate(claims).unwrap()
  }

  #[test]
  fn accepts_well_formed_token() {
    let v = validator();
    let token = sign(&v.key, "alt-bff", "alt-clients", "a3f1c2d4-5e6b-4a7c-8d9e-0f1a2b3c4d5e");
    let user = v.validate_token(&token).unwrap();
    assert_eq!(user.user_id.to_string(), "a3f1c2d4-5e6b-4a7c-8d9e-0f1a2b3c4d5e");
  }

  #[test]
  fn rejects_wrong_issuer() {
    let v = validator();
    let token = sign(&v.key, "someone-else", "alt-clients", "a3f1c2d4-5e6b-4a7c-8d9e-0f1a2b3c4d5e");
    assert!(matches!(v.validate_token(&token), Err(AuthError::WrongIssuer)));
  }

  #[test]
  fn rejects_wrong_audience() {
    let v = validator();
    let token = sign(&v.key, "alt-bff", "someone-else", "a3f1c2d4-5e6b-4a7c-8d9e-0f1a2b3c4d5e");
    assert!(matches!(v.validate_token(&token), Err(AuthError::WrongAudience)));
  }

  #[test]
  fn rejects_non_uuid_subject() {
    let v = validator();
    let token = sign(&v.key, "alt-bff", "alt-clients", "not-a-uuid");
    assert!(matches!(v.validate_token(&token), Err(AuthError::UnparseableSubject)));
  }

  #[test]
  fn classifies_expiry_messages_distinctly_from_signature_failures() {
    assert!(message_indicates_expiry("Token has Expired"));
    assert!(!message_indicates_expiry("signature mismatch"));
  }

  #[test]
  fn rejects_signature_from_a_different_key() {
    let v = validator();
    let other_key = HS256Key::generate();
    let token = sign(&other_key, "alt-bff", "alt-clients", "a3f1c2d4-5e6b-4a7c-8d9e-0f1a2b3c4d5e");
    assert!(matches!(v.validate_token(&token), Err(AuthError::BadSignature)));
  }

  #[test]
  fn missing_header_is_rejected() {
    let headers = http::HeaderMap::new();
    let name = HeaderName::from_static("x-alt-backend-token");
    assert!(matches!(extract_token(&headers, &name), Err(AuthError::MissingHeader)));
  }

  #[test]
  fn blank_header_value_is_rejected() {
    let mut headers = http::HeaderMap::new();
    let name = HeaderName::from_static("x-alt-backend-token");
    headers.insert(name.clone(), "   ".parse().unwrap());
    assert!(matches!(extract_token(&headers, &name), Err(AuthError::MalformedHeader)));
  }

  #[test]
  fn malformed_token_value_is_rejected_at_validation() {
    let v = validator();
    assert!(matches!(
      v.validate_token("invalid-token"),
      Err(AuthError::MalformedToken)
    ));
  }
}
