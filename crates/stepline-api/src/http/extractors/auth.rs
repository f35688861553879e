//! API key principal extractor.
//!
//! Resolves the caller from:
//! - `Authorization: Bearer <key>` header
//! - `X-API-Key: <key>` header
//!
//! Keys are SHA-256 hashed and compared against the `api_keys` table. A
//! request without a key has no principal; it is rejected only when
//! `server.require_auth` is on. A key that is present but unknown is always
//! rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::state::AppState;

/// Prefix of generated keys.
const KEY_PREFIX: &str = "stp_";

/// The authenticated caller. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub key_id: String,
    pub name: String,
}

/// Optional principal of the current request.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Option<Principal>);

impl CurrentPrincipal {
    /// Name for log fields; `anonymous` without a principal.
    pub fn display_name(&self) -> &str {
        self.0.as_ref().map_or("anonymous", |p| p.name.as_str())
    }
}

impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(api_key) = extract_api_key(parts)? else {
            if state.config.server.require_auth {
                return Err(AppError::Unauthorized(
                    "Missing API key. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
                ));
            }
            return Ok(CurrentPrincipal(None));
        };

        let key_hash = hash_api_key(&api_key);

        let result = sqlx::query("SELECT id, name FROM api_keys WHERE key_hash = ?")
            .bind(&key_hash)
            .fetch_optional(&state.db_pool.reader)
            .await
            .map_err(|e| AppError::Internal(format!("Database error: {e}")))?;

        match result {
            Some(row) => {
                let principal = Principal {
                    key_id: row.get("id"),
                    name: row.get("name"),
                };
                // Update last_used_at (best effort, don't fail the request)
                let now = chrono::Utc::now().to_rfc3339();
                let _ = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
                    .bind(&now)
                    .bind(&principal.key_id)
                    .execute(&state.db_pool.writer)
                    .await;
                Ok(CurrentPrincipal(Some(principal)))
            }
            None => Err(AppError::Unauthorized(
                "Invalid API key. Provide a valid key via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
            )),
        }
    }
}

/// Extract the API key from request headers, if any.
fn extract_api_key(parts: &Parts) -> Result<Option<String>, AppError> {
    // Try Authorization: Bearer <key>
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(Some(key.trim().to_string()));
        }
    }

    // Try X-API-Key header
    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-API-Key header encoding".to_string())
        })?;
        return Ok(Some(key_str.trim().to_string()));
    }

    Ok(None)
}

/// Compute SHA-256 hash of an API key (lowercase hex).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

/// Create the first API key if none exists.
///
/// Returns the plaintext key when one was created; it is never stored and
/// cannot be shown again.
pub async fn ensure_api_key(state: &AppState) -> anyhow::Result<Option<String>> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM api_keys LIMIT 1")
        .fetch_optional(&state.db_pool.reader)
        .await?;

    if existing.is_some() {
        return Ok(None);
    }

    // Two random v4 UUIDs give 244 bits of key material.
    let plaintext_key = format!(
        "{KEY_PREFIX}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );

    let key_hash = hash_api_key(&plaintext_key);
    let id = Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query("INSERT INTO api_keys (id, key_hash, name, created_at) VALUES (?, ?, 'default', ?)")
        .bind(&id)
        .bind(&key_hash)
        .bind(&now)
        .execute(&state.db_pool.writer)
        .await?;

    tracing::info!(key_id = %id, "created default API key");
    Ok(Some(plaintext_key))
}
