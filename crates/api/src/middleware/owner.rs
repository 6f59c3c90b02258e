//! Caller identity extractor.
//!
//! Authentication happens upstream: the authenticating proxy sets the
//! `x-owner-id` header on every `/api/v1` request it forwards.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use unplugd_core::error::CoreError;
use unplugd_core::storage_keys::validate_owner_id;

use crate::error::AppError;

/// Header carrying the authenticated owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The authenticated caller. The owner id is a single key segment;
/// anything else is rejected with 401.
///
/// ```ignore
/// async fn my_handler(caller: Caller) -> AppResult<Json<()>> {
///     tracing::info!(owner_id = %caller.owner_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller {
    pub owner_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(format!(
                    "Missing {OWNER_HEADER} header"
                )))
            })?;
        validate_owner_id(owner_id)
            .map_err(|e| AppError::Core(CoreError::Unauthorized(e.to_string())))?;

        Ok(Caller {
            owner_id: owner_id.to_string(),
        })
    }
}
