//! The acting identity, taken from request headers.
//!
//! Authentication happens in front of this service; it forwards the user id
//! in `X-User-Id` and the kinds they may write in `X-Write-Kinds`
//! (comma-separated, e.g. `local_unit,legal_unit`).

use std::str::FromStr as _;

use axum::{extract::FromRequestParts, http::request::Parts};
use statreg_core::{hooks::IdentityContext, unit::UnitKind};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const WRITE_KINDS_HEADER: &str = "x-write-kinds";

/// Extractor wrapping the caller's [`IdentityContext`].
#[derive(Debug, Clone)]
pub struct Identity(pub IdentityContext);

impl<St: Send + Sync> FromRequestParts<St> for Identity {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

    let user_id = header(USER_ID_HEADER)
      .ok_or_else(|| ApiError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?;
    let user_id = Uuid::parse_str(user_id.trim())
      .map_err(|_| ApiError::Unauthenticated(format!("malformed {USER_ID_HEADER} header")))?;

    let writable = header(WRITE_KINDS_HEADER)
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .map(|k| UnitKind::from_str(k).map_err(|_| ApiError::BadRequest(format!("unknown unit kind {k:?}"))))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Identity(IdentityContext::new(user_id, writable)))
  }
}
