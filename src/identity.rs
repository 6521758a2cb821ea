//! Bearer-token user identity backed by a JWKS-publishing identity provider.
//!
//! Inbound requests carry an RS256 JWT; the key set is fetched from the
//! configured JWKS endpoint and cached in-process. The token's `sub` claim
//! maps 1:1 to a local user row, auto-created on first sight with
//! claims-derived defaults.

use crate::error::ApiError;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a fetched key set is trusted before re-fetching.
const JWKS_TTL: Duration = Duration::from_secs(300);

/// Claims Mission Control needs from an identity token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// RS256 token verifier with a cached JWKS.
pub struct IdentityVerifier {
    jwks_url: String,
    agent: ureq::Agent,
    cache: Mutex<Option<(Instant, Vec<Jwk>)>>,
}

impl IdentityVerifier {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build();
        Self {
            jwks_url: jwks_url.into(),
            agent,
            cache: Mutex::new(None),
        }
    }

    /// Whether a JWKS endpoint is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.jwks_url.is_empty()
    }

    /// Verify a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, ApiError> {
        if !self.is_configured() {
            return Err(ApiError::internal("JWKS_URL is not configured"));
        }

        let header =
            jsonwebtoken::decode_header(token).map_err(|_| ApiError::unauthorized())?;
        let keys = self.keys()?;

        // Prefer the kid-matched key; fall back to trying every RSA key so a
        // provider rotation mid-cache doesn't reject fresh tokens outright.
        let candidates: Vec<&Jwk> = match &header.kid {
            Some(kid) => keys
                .iter()
                .filter(|k| k.kid.as_deref() == Some(kid.as_str()))
                .collect(),
            None => keys.iter().collect(),
        };

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.validate_aud = false;

        for jwk in candidates {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                continue;
            };
            let Ok(key) = jsonwebtoken::DecodingKey::from_rsa_components(n, e) else {
                continue;
            };
            if let Ok(data) = jsonwebtoken::decode::<IdentityClaims>(token, &key, &validation) {
                if data.claims.sub.is_empty() {
                    return Err(ApiError::unauthorized());
                }
                return Ok(data.claims);
            }
        }

        Err(ApiError::unauthorized())
    }

    fn keys(&self) -> Result<Vec<Jwk>, ApiError> {
        let mut cache = self.cache.lock().unwrap();
        if let Some((fetched_at, keys)) = cache.as_ref()
            && fetched_at.elapsed() < JWKS_TTL
        {
            return Ok(keys.clone());
        }

        let set: JwkSet = self
            .agent
            .get(&self.jwks_url)
            .call()
            .map_err(|e| ApiError::internal(format!("JWKS fetch failed: {e}")))?
            .into_json()
            .map_err(|e| ApiError::internal(format!("JWKS parse failed: {e}")))?;

        *cache = Some((Instant::now(), set.keys.clone()));
        Ok(set.keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_verifier_rejects() {
        let verifier = IdentityVerifier::new("");
        assert!(!verifier.is_configured());
        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn garbage_token_is_unauthorized() {
        let verifier = IdentityVerifier::new("http://127.0.0.1:1/jwks");
        let err = verifier.verify("garbage").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
