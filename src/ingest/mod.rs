/// Upstream data clients.
///
/// Submodules:
/// - `api`      — venues, actual orders and predicted demand from the backend.
/// - `fallback` — local point-estimate model used when predictions are missing.
/// - `social`   — search-trend, mention and local-event signals with caching.

pub mod api;
pub mod fallback;
pub mod social;
