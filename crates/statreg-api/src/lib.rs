//! JSON REST API for the statistical business register.
//!
//! Exposes an axum [`Router`] backed by a [`Registry`] over any
//! [`UnitStore`] and [`SearchIndexClient`]. Authentication and TLS are the
//! caller's responsibility; the acting identity arrives in headers (see
//! [`identity`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", statreg_api::api_router(registry.clone()))
//! ```

pub mod error;
pub mod identity;
pub mod search;
pub mod units;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use statreg_core::{hooks::ValidationHook, index::SearchIndexClient, store::UnitStore};
use statreg_engine::Registry;

pub use error::ApiError;

/// Build the API router for `registry`.
pub fn api_router<S, I, V>(registry: Arc<Registry<S, I, V>>) -> Router<()>
where
  S: UnitStore + 'static,
  I: SearchIndexClient + 'static,
  V: ValidationHook + 'static,
{
  Router::new()
    // Units
    .route("/units", post(units::create::<S, I, V>))
    .route(
      "/units/{kind}/{id}",
      get(units::get_one::<S, I, V>)
        .put(units::update::<S, I, V>)
        .delete(units::delete::<S, I, V>),
    )
    .route("/units/{kind}/{id}/restore", post(units::restore::<S, I, V>))
    .route("/units/{kind}/{id}/history", get(units::history::<S, I, V>))
    // Search mirror
    .route("/search", get(search::handler::<S, I, V>))
    .route("/index/sync", post(search::sync::<S, I, V>))
    .with_state(registry)
}

// ─── Integration tests ────────────────────────────────────────────────────────
