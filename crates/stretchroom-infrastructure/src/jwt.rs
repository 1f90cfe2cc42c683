//! HS256 bearer tokens.
//!
//! [`JwtGenerator`] issues `Bearer <jwt>` values, [`JwtValidator`] reads or
//! verifies them, and [`Authenticated`] guards handlers that need a valid token.
//!
//! # Environment Variables
//!
//! - `JWT_ISSUER`, `JWT_AUDIENCE`: required
//! - `JWT_KEY`: base64 encoded signing key, required
//! - `JWT_TTL_SECONDS`: token lifetime; tokens never expire when unset

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{
    dangerous::insecure_decode, decode, encode, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{env_seconds, env_var, ConfigError};
use crate::error::ApiError;
use crate::problem::ProblemDetails;

/// Claim holding the user name.
pub const NAME_ID_CLAIM: &str = "nameid";

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid signing key: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("token rejected: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token lifetime of {0:?} overflows the expiry timestamp")]
    Lifetime(Duration),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Signing and validation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtOptions {
    pub issuer: String,
    pub audience: String,
    pub token_time_to_live: Option<Duration>,
    pub base64_key: String,
}

impl JwtOptions {
    pub fn from_env() -> Result<Self, ConfigError> {
        let options = Self {
            issuer: env_var("JWT_ISSUER").unwrap_or_default(),
            audience: env_var("JWT_AUDIENCE").unwrap_or_default(),
            token_time_to_live: env_seconds("JWT_TTL_SECONDS")?,
            base64_key: env_var("JWT_KEY").unwrap_or_default(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::missing("issuer"));
        }
        if self.audience.trim().is_empty() {
            return Err(ConfigError::missing("audience"));
        }
        if self.base64_key.trim().is_empty() {
            return Err(ConfigError::missing("base64_key"));
        }
        STANDARD
            .decode(self.base64_key.trim())
            .map_err(|e| ConfigError::invalid("base64_key", e.to_string()))?;
        if let Some(ttl) = self.token_time_to_live {
            if ttl.is_zero() {
                return Err(ConfigError::invalid(
                    "token_time_to_live",
                    "must be greater than zero",
                ));
            }
            if i64::try_from(ttl.as_secs()).is_err() {
                return Err(ConfigError::invalid("token_time_to_live", "out of range"));
            }
        }
        Ok(())
    }
}

/// Registered claims plus everything else the token carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JwtClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl JwtClaims {
    /// Claims carrying only the user name.
    pub fn for_user(name: impl Into<String>) -> Self {
        let mut claims = Self::default();
        claims
            .extra
            .insert(NAME_ID_CLAIM.to_string(), Value::String(name.into()));
        claims
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The `nameid` claim.
    pub fn name_id(&self) -> Option<&str> {
        self.claim(NAME_ID_CLAIM).and_then(Value::as_str)
    }
}

fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    token.strip_prefix(BEARER_PREFIX).unwrap_or(token).trim()
}

/// Issues signed tokens.
#[derive(Clone)]
pub struct JwtGenerator {
    options: JwtOptions,
    key: EncodingKey,
}

impl std::fmt::Debug for JwtGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtGenerator")
            .field("issuer", &self.options.issuer)
            .field("audience", &self.options.audience)
            .finish()
    }
}

impl JwtGenerator {
    pub fn new(options: JwtOptions) -> Result<Self, JwtError> {
        options.validate()?;
        let key = EncodingKey::from_base64_secret(options.base64_key.trim()).map_err(JwtError::Key)?;
        Ok(Self { options, key })
    }

    /// Sign `claims` and return `Bearer <jwt>`.
    ///
    /// `iss`, `aud` and `iat` are always overwritten; `exp` is set only when a
    /// lifetime is configured.
    pub fn generate(&self, mut claims: JwtClaims) -> Result<String, JwtError> {
        let now = Utc::now().timestamp();
        claims.iss = Some(self.options.issuer.clone());
        claims.aud = Some(self.options.audience.clone());
        claims.iat = Some(now);
        claims.exp = match self.options.token_time_to_live {
            Some(ttl) => Some(
                i64::try_from(ttl.as_secs())
                    .ok()
                    .and_then(|secs| now.checked_add(secs))
                    .ok_or(JwtError::Lifetime(ttl))?,
            ),
            None => None,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.key).map_err(JwtError::Encode)?;
        Ok(format!("{BEARER_PREFIX}{token}"))
    }
}

/// Reads and verifies tokens issued by [`JwtGenerator`].
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .field("validate_exp", &self.validation.validate_exp)
            .finish()
    }
}

impl JwtValidator {
    pub fn new(options: &JwtOptions) -> Result<Self, JwtError> {
        options.validate()?;
        let key = DecodingKey::from_base64_secret(options.base64_key.trim()).map_err(JwtError::Key)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&options.issuer]);
        validation.set_audience(&[&options.audience]);
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("iss".to_string());
        validation.required_spec_claims.insert("aud".to_string());
        if options.token_time_to_live.is_some() {
            validation.required_spec_claims.insert("exp".to_string());
        } else {
            validation.validate_exp = false;
        }

        Ok(Self { key, validation })
    }

    /// Parse claims without checking the signature.
    ///
    /// Accepts the value with or without the `Bearer ` prefix. Returns `None`
    /// for anything that is not a well-formed JWT.
    pub fn read(&self, token: &str) -> Option<JwtClaims> {
        match insecure_decode::<JwtClaims>(strip_bearer(token)) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::warn!(error = %e, "unable to read token");
                None
            }
        }
    }

    /// Verify signature, issuer, audience and (when configured) lifetime.
    pub fn validate(&self, token: &str) -> Result<JwtClaims, JwtError> {
        decode::<JwtClaims>(strip_bearer(token), &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(JwtError::Invalid)
    }
}

/// Claims of a request carrying a valid bearer token.
///
/// Requires an `Arc<JwtValidator>` in the request extensions, which the
/// service host adds when JWT authentication is enabled.
#[derive(Debug, Clone)]
pub struct Authenticated(pub JwtClaims);

fn unauthorized(detail: &str) -> ApiError {
    ApiError::new(ProblemDetails::from_status(StatusCode::UNAUTHORIZED).with_detail(detail))
}

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let validator = parts
            .extensions
            .get::<Arc<JwtValidator>>()
            .cloned()
            .ok_or_else(|| unauthorized("Authentication is not configured"))?;

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing bearer token"))?;

        validator.validate(header).map(Authenticated).map_err(|e| {
            tracing::warn!(error = %e, "bearer token rejected");
            unauthorized("Invalid bearer token")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderValue, routing::get, Extension, Router};
    use axum_test::TestServer;

    fn options(ttl: Option<Duration>) -> JwtOptions {
        JwtOptions {
            issuer: "StretchRoom".to_string(),
            audience: "StretchRoom.Services".to_string(),
            token_time_to_live: ttl,
            base64_key: STANDARD.encode(b"a-very-secret-key-of-32-bytes!!!"),
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(options(None).validate().is_ok());

        let mut bad = options(None);
        bad.issuer = " ".to_string();
        assert_eq!(bad.validate(), Err(ConfigError::missing("issuer")));

        let mut bad = options(None);
        bad.base64_key = "not base64 !!".to_string();
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { field, .. }) if field == "base64_key"));

        let bad = options(Some(Duration::ZERO));
        assert!(bad.validate().is_err());

        let bad = options(Some(Duration::from_secs(u64::MAX)));
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { field, .. }) if field == "token_time_to_live"));
        assert!(JwtGenerator::new(bad).is_err());
    }

    #[test]
    fn test_lifetime_past_timestamp_range_fails_to_sign() {
        let ttl = Duration::from_secs(i64::MAX as u64);
        let generator = JwtGenerator::new(options(Some(ttl))).unwrap();
        let error = generator.generate(JwtClaims::for_user("Vitalik")).unwrap_err();
        assert!(matches!(error, JwtError::Lifetime(d) if d == ttl));
    }

    #[test]
    fn test_generate_and_validate() {
        let opts = options(Some(Duration::from_secs(60)));
        let token = JwtGenerator::new(opts.clone())
            .unwrap()
            .generate(JwtClaims::for_user("Vitalik"))
            .unwrap();
        assert!(token.starts_with("Bearer "));

        let claims = JwtValidator::new(&opts).unwrap().validate(&token).unwrap();
        assert_eq!(claims.name_id(), Some("Vitalik"));
        assert_eq!(claims.iss.as_deref(), Some("StretchRoom"));
        assert!(claims.exp.is_some());
    }

    #[test]
    fn test_no_ttl_means_no_exp() {
        let opts = options(None);
        let token = JwtGenerator::new(opts.clone())
            .unwrap()
            .generate(JwtClaims::for_user("Vitalik"))
            .unwrap();
        let claims = JwtValidator::new(&opts).unwrap().validate(&token).unwrap();
        assert_eq!(claims.exp, None);
    }

    #[test]
    fn test_wrong_key_or_audience_is_rejected() {
        let token = JwtGenerator::new(options(None))
            .unwrap()
            .generate(JwtClaims::for_user("Vitalik"))
            .unwrap();

        let mut other_key = options(None);
        other_key.base64_key = STANDARD.encode(b"another-secret-key-of-32-bytes!!");
        assert!(JwtValidator::new(&other_key).unwrap().validate(&token).is_err());

        let mut other_audience = options(None);
        other_audience.audience = "Elsewhere".to_string();
        assert!(JwtValidator::new(&other_audience).unwrap().validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let opts = options(Some(Duration::from_secs(60)));
        let claims = JwtClaims {
            iss: Some(opts.issuer.clone()),
            aud: Some(opts.audience.clone()),
            exp: Some(Utc::now().timestamp() - 30),
            iat: Some(Utc::now().timestamp() - 90),
            extra: BTreeMap::new(),
        };
        let key = EncodingKey::from_base64_secret(&opts.base64_key).unwrap();
        let token = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();
        assert!(JwtValidator::new(&opts).unwrap().validate(&token).is_err());
    }

    #[test]
    fn test_read_ignores_signature() {
        let token = JwtGenerator::new(options(None))
            .unwrap()
            .generate(JwtClaims::for_user("Vitalik").with_claim("role", "admin"))
            .unwrap();

        let mut other = options(None);
        other.base64_key = STANDARD.encode(b"another-secret-key-of-32-bytes!!");
        let validator = JwtValidator::new(&other).unwrap();

        let claims = validator.read(&token).unwrap();
        assert_eq!(claims.name_id(), Some("Vitalik"));
        assert_eq!(claims.claim("role"), Some(&Value::from("admin")));
        assert!(validator.read("Bearer garbage").is_none());
    }

    #[test]
    fn test_read_keeps_expired_claims() {
        let opts = options(Some(Duration::from_secs(60)));
        let claims = JwtClaims {
            iss: Some("Elsewhere".to_string()),
            aud: None,
            exp: Some(Utc::now().timestamp() - 30),
            iat: None,
            extra: BTreeMap::new(),
        }
        .with_claim(NAME_ID_CLAIM, "Vitalik");
        let key = EncodingKey::from_secret(b"unrelated");
        let token = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();

        let read = JwtValidator::new(&opts).unwrap().read(&token).unwrap();
        assert_eq!(read.name_id(), Some("Vitalik"));
        assert_eq!(read.iss.as_deref(), Some("Elsewhere"));
    }

    #[tokio::test]
    async fn test_authenticated_extractor() {
        async fn whoami(Authenticated(claims): Authenticated) -> String {
            claims.name_id().unwrap_or_default().to_string()
        }

        let opts = options(None);
        let validator = Arc::new(JwtValidator::new(&opts).unwrap());
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(Extension(validator));
        let server = TestServer::new(app).unwrap();

        server
            .get("/whoami")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .get("/whoami")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer nope"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let token = JwtGenerator::new(opts)
            .unwrap()
            .generate(JwtClaims::for_user("Vitalik"))
            .unwrap();
        server
            .get("/whoami")
            .add_header(AUTHORIZATION, HeaderValue::from_str(&token).unwrap())
            .await
            .assert_text("Vitalik");
    }
}
