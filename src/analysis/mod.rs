/// Surge analysis.
///
/// Submodules:
/// - `detector` — the multi-criteria surge rule and event construction.
/// - `scoring`  — trend, risk score, severity, root cause, recommendations.
/// - `cooldown` — per-venue alert suppression.

pub mod cooldown;
pub mod detector;
pub mod scoring;

pub use cooldown::CooldownTracker;
pub use detector::{evaluate_window, validate_metrics, SurgeDetector};
