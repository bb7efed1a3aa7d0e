//! Typed configuration entities, deserialized directly from TOML and then
//! resolved into the runtime shapes [`crate::weights`] and the orchestrator
//! operate on. Every `#[serde(default = "...")]` here documents the
//! effective default the way `huginn-proxy-lib`'s config module does.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Result, XlbError};

/// A concrete, already-resolved backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Per-target health check descriptor.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthCheckConfig {
    /// "tcp" (bare connect) or "http" (GET against `path`).
    #[serde(default = "default_health_kind")]
    pub kind: HealthCheckKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Number of gradual-recovery steps (25/50/75/100%) to climb through
    /// before a recovered target takes its full configured weight.
    #[serde(default)]
    pub gradual_recovery: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    Tcp,
    Http,
}

fn default_health_kind() -> HealthCheckKind {
    HealthCheckKind::Tcp
}
fn default_interval_secs() -> u64 {
    5
}
fn default_timeout_ms() -> u64 {
    3_000
}
fn default_healthy_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    3
}

impl HealthCheckConfig {
    /// Clamp the configured timeout into the 100ms..60s range §5 requires.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(100, 60_000))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// One target address as written in the config file: either a literal
/// `ip:port` or a `host:port` pending DNS resolution.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WeightedTargetConfig {
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: u8,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

fn default_weight() -> u8 {
    100
}

/// A single target already carrying a concrete IP, plus its configured
/// weight and optional health-check descriptor. Multiple `WeightedTarget`s
/// in a group must have `configured_weight` summing to exactly 100; a lone
/// target carries an implicit weight of 100.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTarget {
    pub target: Target,
    pub configured_weight: u8,
    pub health_check: Option<HealthCheckConfig>,
    /// The original hostname this target's `ip` was resolved from, if the
    /// config entry named a host rather than a literal IP. Carried so the
    /// DNS refresher can re-resolve it without the original config text.
    pub hostname: Option<String>,
}

/// Ordered sequence of 1..=8 weighted targets plus the parallel cumulative
/// weight vector computed from them. See [`crate::weights::cumulative`].
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    pub targets: Vec<WeightedTarget>,
    pub cumulative_weights: Vec<u16>,
}

pub const MAX_TARGETS_PER_GROUP: usize = 8;

impl TargetGroup {
    /// Builds a group from already-resolved targets, validating the
    /// weight-sum invariant and computing the initial cumulative vector
    /// assuming every target starts out healthy.
    pub fn new(targets: Vec<WeightedTarget>) -> Result<Self> {
        validate_target_weights(&targets)?;
        let effective: Vec<u32> = if targets.len() == 1 {
            vec![100]
        } else {
            targets.iter().map(|t| t.configured_weight as u32).collect()
        };
        let cumulative = crate::weights::cumulative(&effective).iter().map(|w| *w as u16).collect();
        Ok(Self { targets, cumulative_weights: cumulative })
    }

    pub fn configured_weights(&self) -> Vec<u32> {
        self.targets.iter().map(|t| t.configured_weight as u32).collect()
    }
}

pub fn validate_target_weights(targets: &[WeightedTarget]) -> Result<()> {
    if targets.is_empty() {
        return Err(XlbError::ValidationFailed(crate::error::ValidationFailure {
            path: "targets".into(),
            reason: "a target group must have at least one target".into(),
        }));
    }
    if targets.len() > MAX_TARGETS_PER_GROUP {
        return Err(XlbError::ValidationFailed(crate::error::ValidationFailure {
            path: "targets".into(),
            reason: format!("at most {MAX_TARGETS_PER_GROUP} targets are supported, got {}", targets.len()),
        }));
    }
    if targets.len() == 1 {
        // A lone target carries an implicit weight of 100 regardless of
        // what was configured.
        return Ok(());
    }
    let sum: u32 = targets.iter().map(|t| t.configured_weight as u32).sum();
    if sum != 100 {
        return Err(XlbError::ValidationFailed(crate::error::ValidationFailure {
            path: "targets[].weight".into(),
            reason: format!("configured weights must sum to 100, got {sum}"),
        }));
    }
    Ok(())
}

/// A target group that may still contain hostnames pending resolution.
/// Superseded by a concrete [`TargetGroup`] on each DNS refresh.
#[derive(Debug, Clone)]
pub struct DnsTargetGroupConfig {
    pub entries: Vec<WeightedTargetConfig>,
    pub refresh_interval: Duration,
}

/// A CIDR-keyed route, selected by longest-prefix match.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRouteConfig {
    /// CIDR, e.g. "10.0.0.0/8".
    pub source: String,
    pub targets: Vec<WeightedTargetConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRoute {
    pub prefix_len: u32,
    pub ip: u32,
    pub group_name: String,
}

/// A route selected by exact-match FNV-1a-64 hash of a lowercased SNI
/// hostname.
#[derive(Debug, Clone, Deserialize)]
pub struct SniRouteConfig {
    pub hostname: String,
    pub targets: Vec<WeightedTargetConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SniRoute {
    pub hostname: String,
    pub group_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingAlgorithm {
    #[default]
    Weighted,
    LeastConnections,
    LeastConnectionsUnweighted,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CircuitBreakerDefaults {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Error rate (0.0..1.0) above which the breaker opens.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
    #[serde(default = "default_cb_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_cb_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Minimum number of requests observed in the window before the error
    /// rate is considered meaningful.
    #[serde(default = "default_cb_min_requests")]
    pub min_requests: u64,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            error_threshold: default_error_threshold(),
            window_secs: default_cb_window_secs(),
            cooldown_secs: default_cb_cooldown_secs(),
            min_requests: default_cb_min_requests(),
        }
    }
}

fn default_error_threshold() -> f64 {
    0.5
}
fn default_cb_window_secs() -> u64 {
    10
}
fn default_cb_cooldown_secs() -> u64 {
    30
}
fn default_cb_min_requests() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DrainDefaults {
    #[serde(default = "default_drain_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DrainDefaults {
    fn default() -> Self {
        Self { timeout_ms: default_drain_timeout_ms() }
    }
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RateLimitDefaults {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rate_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_rate_burst")]
    pub burst: f64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self { enabled: false, requests_per_second: default_rate_rps(), burst: default_rate_burst() }
    }
}

fn default_rate_rps() -> f64 {
    1000.0
}
fn default_rate_burst() -> f64 {
    2000.0
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Global flags shared across every proxy.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub stats_enabled: bool,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub drain: DrainDefaults,
    #[serde(default)]
    pub load_balancing: LoadBalancingAlgorithm,
    #[serde(default = "default_lb_refresh_interval_secs")]
    pub load_balancing_refresh_interval_secs: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerDefaults,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub rate_limit: RateLimitDefaults,
    #[serde(default = "default_dns_refresh_interval_secs")]
    pub dns_refresh_interval_secs: u64,
    #[serde(default = "default_conntrack_cleanup_interval_secs")]
    pub conntrack_cleanup_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stats_enabled: default_true(),
            connection_timeout_secs: default_connection_timeout_secs(),
            max_connections: default_max_connections(),
            drain: DrainDefaults::default(),
            load_balancing: LoadBalancingAlgorithm::default(),
            load_balancing_refresh_interval_secs: default_lb_refresh_interval_secs(),
            circuit_breaker: CircuitBreakerDefaults::default(),
            health_check: HealthCheckConfig::default(),
            access_log: AccessLogConfig::default(),
            rate_limit: RateLimitDefaults::default(),
            dns_refresh_interval_secs: default_dns_refresh_interval_secs(),
            conntrack_cleanup_interval_secs: default_conntrack_cleanup_interval_secs(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: default_health_kind(),
            path: None,
            interval_secs: default_interval_secs(),
            timeout_ms: default_timeout_ms(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            gradual_recovery: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_connection_timeout_secs() -> u32 {
    60
}
fn default_max_connections() -> u32 {
    65_536
}
fn default_lb_refresh_interval_secs() -> u64 {
    5
}
fn default_dns_refresh_interval_secs() -> u64 {
    30
}
fn default_conntrack_cleanup_interval_secs() -> u64 {
    60
}

/// A named proxy: a listen spec (interfaces + port), a default target
/// group, and zero or more source/SNI routes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfigFile {
    pub name: String,
    pub interfaces: Vec<String>,
    pub port: u16,
    pub targets: Vec<WeightedTargetConfig>,
    #[serde(default)]
    pub source_routes: Vec<SourceRouteConfig>,
    #[serde(default)]
    pub sni_routes: Vec<SniRouteConfig>,
    #[serde(default)]
    pub session_persistence: bool,
    #[serde(default)]
    pub proxy_protocol_v2: bool,
}

/// Resolved (DNS-free) proxy definition used by the orchestrator and
/// reload coordinator.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub name: String,
    pub interfaces: Vec<String>,
    pub port: u16,
    pub default_group: TargetGroup,
    pub source_routes: Vec<(SourceRoute, TargetGroup)>,
    pub sni_routes: Vec<(SniRoute, TargetGroup)>,
    pub session_persistence: bool,
    pub proxy_protocol_v2: bool,
}

impl ProxyConfig {
    pub fn listen_key(&self) -> (Vec<String>, u16) {
        (self.interfaces.clone(), self.port)
    }
}

/// Top-level configuration: one or more proxies plus global settings. The
/// single source of truth for control-plane state.
#[derive(Debug, Clone)]
pub struct Config {
    pub proxies: Vec<ProxyConfig>,
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: Settings,
    /// Defaults to empty so a file naming zero proxies still parses (the
    /// CLI's ad-hoc `--port`/`--target`/`--interface` flow seeds one in
    /// afterwards); `loader::validate` is what rejects an empty list once
    /// nothing has seeded it.
    #[serde(default)]
    pub proxies: Vec<ProxyConfigFile>,
}
