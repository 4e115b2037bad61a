//! Alert construction and delivery.
//!
//! Submodules:
//! - `dispatcher` — builds alerts from surge events and hands them to the sink.
//! - `message`    — deterministic plain-text subject and body.
//! - `narrative`  — optional root-cause narrative from a reasoning service.

pub mod dispatcher;
pub mod message;
pub mod narrative;

pub use dispatcher::{AlertDispatcher, AlertSink, DeliveryStatus, DispatchReport, LoggingSink};
pub use narrative::{ChatNarrativeEnricher, NarrativeEnricher, NoopEnricher};
