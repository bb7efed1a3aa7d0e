#![forbid(unsafe_code)]

pub mod config;
pub mod conntrack;
pub mod dns;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod maps;
pub mod orchestrator;
pub mod ratelimit;
pub mod reload;
pub mod state;
pub mod stats;
pub mod telemetry;
pub mod weights;

pub use config::{load_from_path, Config, ProxyConfig, Settings};
pub use error::{XlbError, Result};
pub use lifecycle::Lifecycle;
pub use reload::{ReloadCoordinator, ReloadOutcome};
