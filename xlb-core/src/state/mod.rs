//! Mutable per-target runtime state: health, drain, and circuit-breaker
//! tracking. Each lives independently per `(proxy, target)` pair and feeds
//! into [`crate::weights`] once per orchestrator tick.

pub mod circuit;
pub mod drain;
pub mod health;

pub use circuit::{CircuitBreaker, CircuitState};
pub use drain::{DrainState, DrainStatus};
pub use health::{HealthState, HealthStatus};
