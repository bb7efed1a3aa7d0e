//! Declarative TOML configuration: types, loading/resolution, and diffing
//! against a previously loaded [`Config`] for reloads.

pub mod diff;
pub mod loader;
pub mod types;

pub use diff::{diff, ConfigDiff, ProxyDiff, TargetGroupDiff};
pub use loader::{load_from_path, validate};
pub use types::{
    AccessLogConfig, CircuitBreakerDefaults, Config, ConfigFile, DnsTargetGroupConfig,
    DrainDefaults, HealthCheckConfig, HealthCheckKind, LoadBalancingAlgorithm, ProxyConfig,
    ProxyConfigFile, RateLimitDefaults, Settings, SniRoute, SniRouteConfig, SourceRoute,
    SourceRouteConfig, Target, TargetGroup, WeightedTarget, WeightedTargetConfig,
    MAX_TARGETS_PER_GROUP,
};
