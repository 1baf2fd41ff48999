//! JWT verification for work-order tokens (DCS/FIS) and UOS/WPS tokens
//! (UCS), grounded in `original_source`'s `WorkOrderContext`
//! (`dcs/core/auth_policies.py`) and `require_work_order_context`
//! (`dcs/adapters/inbound/fastapi_/http_authorization.py`). Verification
//! itself uses `jsonwebtoken` against a JWKS fetched per issuer; this
//! workspace never issues tokens (spec.md Non-goals), it only validates
//! presented ones.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AuthError as Error;

/// Claims carried by a work-order token (spec.md §6 "Authentication").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderClaims {
    #[serde(rename = "type")]
    pub type_: String,
    pub file_id: String,
    pub user_public_crypt4gh_key: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a UOS (box-scoped) or WPS (file-scoped) token, used by
/// UCS endpoints (spec.md §4.2/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTokenClaims {
    #[serde(rename = "type")]
    pub type_: String,
    pub resource_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a per-data-hub ingest token (FIS), identifying which
/// data hub an upload or interrogation-listing request originates from
/// (spec.md §6 "JWT-per-data-hub").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataHubClaims {
    pub data_hub: String,
    pub iat: i64,
    pub exp: i64,
}

/// A cached set of decoding keys for one issuer, refreshed lazily. Each
/// data hub / UOS / WPS issuer gets its own JWKS per spec.md §6's
/// "JWK sets per data hub and per UOS/WPS issuer".
#[derive(Clone)]
pub struct JwksCache {
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl JwksCache {
    pub async fn insert(&self, kid: impl Into<String>, key: DecodingKey) {
        self.keys.write().await.insert(kid.into(), key);
    }

    async fn get(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }
}

/// Verify a work-order token and return its claims. The caller is
/// responsible for the path-binding check (`claims.file_id == path id`,
/// spec.md §4.5 / §8 property 7) since that depends on the requested
/// resource, not on the token alone.
pub async fn verify_work_order_token(
    token: &str,
    issuer_keys: &JwksCache,
) -> Result<WorkOrderClaims, Error> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| Error::InvalidToken(e.to_string()))?;
    let kid = header.kid.ok_or_else(|| Error::InvalidToken("missing kid".into()))?;
    let key = issuer_keys
        .get(&kid)
        .await
        .ok_or_else(|| Error::UnknownIssuer { issuer: kid.clone() })?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = true;
    let data = decode::<WorkOrderClaims>(token, &key, &validation)
        .map_err(|e| Error::InvalidToken(e.to_string()))?;

    if data.claims.type_ != "download" && data.claims.type_ != "upload" {
        return Err(Error::ClaimMismatch {
            claim: "type".to_string(),
        });
    }
    Ok(data.claims)
}

/// Load one EC public key per `<kid>.pem` file under `dir` into a fresh
/// [`JwksCache`] (spec.md §6 "JWK sets per data hub and per UOS/WPS
/// issuer"). A missing or unreadable directory yields an empty cache, so
/// every presented token then fails with `UnknownIssuer`.
pub async fn load_jwks_dir(dir: &str) -> JwksCache {
    let cache = JwksCache::default();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return cache;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }
        let Some(kid) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if let Ok(pem) = tokio::fs::read(&path).await {
            if let Ok(key) = DecodingKey::from_ec_pem(&pem) {
                cache.insert(kid, key).await;
            }
        }
    }
    cache
}

/// Verify a UOS/WPS token's signature, expiry, and `type` claim, without
/// binding it to a specific resource id. Used for the creation endpoints
/// (`POST /boxes`, spec.md §6) where no resource exists yet to bind to.
pub async fn verify_token_type(
    token: &str,
    issuer_keys: &JwksCache,
    expected_type: &str,
) -> Result<ResourceTokenClaims, Error> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| Error::InvalidToken(e.to_string()))?;
    let kid = header.kid.ok_or_else(|| Error::InvalidToken("missing kid".into()))?;
    let key = issuer_keys
        .get(&kid)
        .await
        .ok_or_else(|| Error::UnknownIssuer { issuer: kid.clone() })?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = true;
    let data = decode::<ResourceTokenClaims>(token, &key, &validation)
        .map_err(|e| Error::InvalidToken(e.to_string()))?;

    if data.claims.type_ != expected_type {
        return Err(Error::ClaimMismatch {
            claim: "type".to_string(),
        });
    }
    Ok(data.claims)
}

/// Verify a data-hub ingest token. Each data hub's JWKS entry is keyed by
/// the hub's own alias (loaded via [`load_jwks_dir`] the same way work-order
/// issuers are), so the presented token's `kid` header doubles as the claimed
/// hub identity; this is cross-checked against the `data_hub` claim itself.
pub async fn verify_data_hub_token(token: &str, issuer_keys: &JwksCache) -> Result<DataHubClaims, Error> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| Error::InvalidToken(e.to_string()))?;
    let kid = header.kid.ok_or_else(|| Error::InvalidToken("missing kid".into()))?;
    let key = issuer_keys
        .get(&kid)
        .await
        .ok_or_else(|| Error::UnknownIssuer { issuer: kid.clone() })?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = true;
    let data = decode::<DataHubClaims>(token, &key, &validation).map_err(|e| Error::InvalidToken(e.to_string()))?;

    if data.claims.data_hub != kid {
        return Err(Error::ClaimMismatch {
            claim: "data_hub".to_string(),
        });
    }
    Ok(data.claims)
}

/// Verify a UOS/WPS resource-scoped token, and additionally check it binds
/// the specific resource the caller is about to act on (spec.md §6).
pub async fn verify_resource_token(
    token: &str,
    issuer_keys: &JwksCache,
    expected_type: &str,
    expected_resource_id: &str,
) -> Result<ResourceTokenClaims, Error> {
    let claims = verify_token_type(token, issuer_keys, expected_type).await?;
    if claims.resource_id != expected_resource_id {
        return Err(Error::ClaimMismatch {
            claim: "resource_id".to_string(),
        });
    }
    Ok(claims)
}
