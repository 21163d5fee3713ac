use crate::common::models::UserId;
use crate::server::config::ServerConfig;
use crate::server::error::MessagingError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by the access tokens issued by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
}

/// Verifies already-issued HS256 bearer tokens. Issuing tokens is not our job.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_issuer.as_deref())
    }

    pub fn verify(&self, token: &str) -> Result<UserId, MessagingError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| MessagingError::Authentication(e.to_string()))?;
        if data.claims.sub.trim().is_empty() {
            return Err(MessagingError::Authentication("token has no subject".to_string()));
        }
        Ok(data.claims.sub)
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_from_header(value: &str) -> Option<String> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

/// Token from the `token` query parameter of the upgrade request.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
