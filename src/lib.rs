//! Venue demand-surge monitoring service.
//!
//! Compares actual order volume against predicted demand for every active
//! venue, blends in social/virality signals, and raises a prioritised alert
//! when a sustained surge is confirmed.
//!
//! Pipeline, one pass per tick:
//!
//! ```text
//! ingest (orders, predictions, social) -> collector -> store
//!                                                       |
//!                      alert dispatcher <- detector <---+
//! ```
//!
//! The [`orchestrator::Orchestrator`] owns the cadence and lifecycle; every
//! other module is usable on its own.

pub mod alert;
pub mod analysis;
pub mod clock;
pub mod collector;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod store;
