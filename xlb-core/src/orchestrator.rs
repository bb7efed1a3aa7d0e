//! Per-proxy weight orchestrator (§4.5): the background task that folds
//! health, drain, circuit-breaker and least-connections signals through
//! the [`crate::weights`] pipeline once per tick and pushes the result to
//! the kernel maps, but only when the cumulative vector actually changed.

use std::sync::Arc;
use std::time::Duration;

use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xlb_wire::classic::{ListenKey, LpmKey, RouteTargetSlot, SniKey, WeightedRouteValue};

use crate::config::{LoadBalancingAlgorithm, ProxyConfig, Settings, Target, TargetGroup};
use crate::conntrack::{ConntrackManager, TargetAggregate};
use crate::dns::DnsCache;
use crate::error::Result;
use crate::maps::{MapBackend, MapFacade};
use crate::state::{CircuitBreaker, CircuitState, DrainState, HealthState};
use crate::telemetry::Metrics;
use crate::weights::{compute_effective_weights, cumulative, LeastConnMode, PipelineInputs};
use std::collections::HashMap;

/// Mutable per-target signal state tracked between ticks, keyed by its
/// position in the owning [`TargetGroup`]'s target vector.
#[derive(Default)]
pub struct TargetRuntimeState {
    pub health: HealthState,
    pub drain: Option<DrainState>,
    pub circuit: Option<CircuitBreaker>,
    pub connection_count: u64,
}

/// One route's worth of orchestration state: the resolved group plus each
/// target's runtime state, and the map key the computed weights are
/// published under.
pub struct RouteRuntime {
    pub group: TargetGroup,
    pub targets: Vec<TargetRuntimeState>,
    pub last_pushed: Option<Vec<u32>>,
}

impl RouteRuntime {
    fn new(group: TargetGroup, cb_defaults: &crate::config::CircuitBreakerDefaults) -> Self {
        let targets = group
            .targets
            .iter()
            .map(|_| TargetRuntimeState {
                health: HealthState::new(),
                drain: None,
                circuit: Some(CircuitBreaker::new(cb_defaults.clone())),
                connection_count: 0,
            })
            .collect();
        Self { group, targets, last_pushed: None }
    }
}

/// Orchestrates exactly one proxy's default group, source routes, and SNI
/// routes. Holds the single writer lock for this proxy's route maps; the
/// reload coordinator replaces the whole orchestrator on a proxy-level
/// config change rather than mutating it concurrently.
pub struct WeightOrchestrator<B: MapBackend> {
    proxy_name: String,
    default_route: Mutex<RouteRuntime>,
    source_routes: Mutex<Vec<(xlb_wire::classic::LpmKey, RouteRuntime)>>,
    sni_routes: Mutex<Vec<(SniKey, RouteRuntime)>>,
    listen_key: ListenKey,
    route_map: Arc<MapFacade<B, LpmKey, WeightedRouteValue>>,
    listen_map: Arc<MapFacade<B, ListenKey, WeightedRouteValue>>,
    sni_map: Arc<MapFacade<B, SniKey, WeightedRouteValue>>,
    settings: Settings,
    session_persistence: bool,
    proxy_protocol_v2: bool,
    tick_interval: Duration,
    metrics: Arc<Metrics>,
    conntrack: Arc<ConntrackManager<B>>,
}

impl<B: MapBackend + Send + Sync + 'static> WeightOrchestrator<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proxy: &ProxyConfig,
        ifindex: u32,
        settings: Settings,
        route_map: Arc<MapFacade<B, LpmKey, WeightedRouteValue>>,
        listen_map: Arc<MapFacade<B, ListenKey, WeightedRouteValue>>,
        sni_map: Arc<MapFacade<B, SniKey, WeightedRouteValue>>,
        metrics: Arc<Metrics>,
        conntrack: Arc<ConntrackManager<B>>,
    ) -> Self {
        let cb_defaults = &settings.circuit_breaker;
        let default_route = RouteRuntime::new(proxy.default_group.clone(), cb_defaults);
        let source_routes = proxy
            .source_routes
            .iter()
            .map(|(route, group)| {
                let key = LpmKey { prefix_len: route.prefix_len, ip: route.ip };
                (key, RouteRuntime::new(group.clone(), cb_defaults))
            })
            .collect();
        let sni_routes = proxy
            .sni_routes
            .iter()
            .map(|(route, group)| {
                let key = SniKey::for_hostname(route.hostname.as_bytes());
                (key, RouteRuntime::new(group.clone(), cb_defaults))
            })
            .collect();

        Self {
            proxy_name: proxy.name.clone(),
            default_route: Mutex::new(default_route),
            source_routes: Mutex::new(source_routes),
            sni_routes: Mutex::new(sni_routes),
            listen_key: ListenKey { ifindex, port: proxy.port },
            route_map,
            listen_map,
            sni_map,
            tick_interval: Duration::from_secs(settings.load_balancing_refresh_interval_secs.max(1)),
            session_persistence: proxy.session_persistence,
            proxy_protocol_v2: proxy.proxy_protocol_v2,
            settings,
            metrics,
            conntrack,
        }
    }

    fn least_conn_mode(&self) -> Option<LeastConnMode> {
        match self.settings.load_balancing {
            LoadBalancingAlgorithm::Weighted => None,
            LoadBalancingAlgorithm::LeastConnections => Some(LeastConnMode::Weighted),
            LoadBalancingAlgorithm::LeastConnectionsUnweighted => Some(LeastConnMode::Unweighted),
        }
    }

    /// Runs one tick for every route this proxy owns, pushing a new
    /// cumulative-weight vector only where it changed. Polls the conntrack
    /// manager once per tick (§4.5) so every route this proxy owns sees
    /// the same connection-count snapshot for least-connections scaling.
    pub async fn tick(&self) -> Result<()> {
        let by_target = self.conntrack.by_target().unwrap_or_else(|err| {
            warn!(proxy = %self.proxy_name, %err, "conntrack snapshot failed, keeping stale connection counts");
            HashMap::new()
        });
        self.tick_default(&by_target).await?;
        self.tick_source_routes(&by_target).await?;
        self.tick_sni_routes(&by_target).await?;
        Ok(())
    }

    async fn tick_default(&self, by_target: &HashMap<(u32, u16), TargetAggregate>) -> Result<()> {
        let mut route = self.default_route.lock().unwrap();
        let new_weights = tick_route(&mut route, self.least_conn_mode(), by_target);
        if route.last_pushed.as_deref() != Some(new_weights.as_slice()) {
            let value = build_route_value(&route.group, &new_weights, &self.settings, self.session_persistence, self.proxy_protocol_v2)?;
            self.listen_map.put(&self.listen_key, &value)?;
            route.last_pushed = Some(new_weights);
            self.metrics.weight_pushes_total.add(1, &[]);
            debug!(proxy = %self.proxy_name, "pushed default route weights");
        }
        Ok(())
    }

    async fn tick_source_routes(&self, by_target: &HashMap<(u32, u16), TargetAggregate>) -> Result<()> {
        let mut routes = self.source_routes.lock().unwrap();
        for (key, route) in routes.iter_mut() {
            let new_weights = tick_route(route, self.least_conn_mode(), by_target);
            if route.last_pushed.as_deref() != Some(new_weights.as_slice()) {
                let value = build_route_value(&route.group, &new_weights, &self.settings, self.session_persistence, self.proxy_protocol_v2)?;
                self.route_map.put(key, &value)?;
                route.last_pushed = Some(new_weights);
                self.metrics.weight_pushes_total.add(1, &[]);
            }
        }
        Ok(())
    }

    async fn tick_sni_routes(&self, by_target: &HashMap<(u32, u16), TargetAggregate>) -> Result<()> {
        let mut routes = self.sni_routes.lock().unwrap();
        for (key, route) in routes.iter_mut() {
            let new_weights = tick_route(route, self.least_conn_mode(), by_target);
            if route.last_pushed.as_deref() != Some(new_weights.as_slice()) {
                let value = build_route_value(&route.group, &new_weights, &self.settings, self.session_persistence, self.proxy_protocol_v2)?;
                self.sni_map.put(key, &value)?;
                route.last_pushed = Some(new_weights);
                self.metrics.weight_pushes_total.add(1, &[]);
            }
        }
        Ok(())
    }

    /// Applies a health probe result to the target at `index` within the
    /// default group (used by the health prober; source/SNI routes share
    /// targets logically but are probed once per unique address upstream).
    /// Also feeds the same outcome to the target's circuit breaker, since
    /// no other request-outcome signal is available to user space (§4.9).
    /// Returns `true` if the health status actually transitioned.
    pub async fn record_health(&self, index: usize, success: bool) -> bool {
        let mut route = self.default_route.lock().unwrap();
        let Some(target) = route.targets.get_mut(index) else {
            return false;
        };
        let cfg = route
            .group
            .targets
            .get(index)
            .and_then(|t| t.health_check.clone())
            .unwrap_or_default();
        let transitioned = target.health.record(success, &cfg);
        if transitioned {
            self.metrics.health_transitions_total.add(1, &[]);
            info!(proxy = %self.proxy_name, index, healthy = target.health.is_healthy(), "target health transitioned");
        }
        if let Some(cb) = target.circuit.as_mut() {
            let previous = cb.state();
            match previous {
                CircuitState::HalfOpen => {
                    if success {
                        cb.close();
                    } else {
                        cb.reopen();
                    }
                }
                _ => cb.record(!success),
            }
            if cb.state() != previous {
                self.metrics.circuit_transitions_total.add(1, &[]);
            }
        }
        transitioned
    }

    /// Re-resolves every hostname-backed target this proxy owns against
    /// `dns` (§4.3, §4.8's DNS refresher) and, for any route where an
    /// address actually changed, pushes the update so the next tick
    /// re-publishes that route's weights under the new IP. Targets with no
    /// `hostname` (a literal IP was configured) are left untouched. Runtime
    /// state (health, drain, circuit) is preserved across a resolved-address
    /// change; only the IP moves.
    pub async fn refresh_dns(&self, dns: &DnsCache) {
        self.refresh_default_dns(dns).await;
        self.refresh_source_routes_dns(dns).await;
        self.refresh_sni_routes_dns(dns).await;
    }

    async fn refresh_default_dns(&self, dns: &DnsCache) {
        let group = self.default_route.lock().unwrap().group.clone();
        if let Some(resolved) = resolve_hostnames(&self.proxy_name, &group, dns).await {
            let mut route = self.default_route.lock().unwrap();
            route.group = resolved;
            route.last_pushed = None;
        }
    }

    async fn refresh_source_routes_dns(&self, dns: &DnsCache) {
        let groups: Vec<(LpmKey, TargetGroup)> = {
            let routes = self.source_routes.lock().unwrap();
            routes.iter().map(|(key, route)| (*key, route.group.clone())).collect()
        };
        for (key, group) in groups {
            if let Some(resolved) = resolve_hostnames(&self.proxy_name, &group, dns).await {
                let mut routes = self.source_routes.lock().unwrap();
                if let Some((_, route)) = routes.iter_mut().find(|(k, _)| *k == key) {
                    route.group = resolved;
                    route.last_pushed = None;
                }
            }
        }
    }

    async fn refresh_sni_routes_dns(&self, dns: &DnsCache) {
        let groups: Vec<(SniKey, TargetGroup)> = {
            let routes = self.sni_routes.lock().unwrap();
            routes.iter().map(|(key, route)| (*key, route.group.clone())).collect()
        };
        for (key, group) in groups {
            if let Some(resolved) = resolve_hostnames(&self.proxy_name, &group, dns).await {
                let mut routes = self.sni_routes.lock().unwrap();
                if let Some((_, route)) = routes.iter_mut().find(|(k, _)| *k == key) {
                    route.group = resolved;
                    route.last_pushed = None;
                }
            }
        }
    }

    /// Replaces the default group's targets in place (§4.7(c)): used when a
    /// reload's diff carries only a `default_target_diff` change with
    /// `listen_changed = false`, so the listen map key and attached
    /// interfaces are left untouched and traffic keeps flowing through the
    /// existing listen entry until the next tick pushes the new weights.
    pub fn replace_default_group(&self, new_group: TargetGroup) {
        let cb_defaults = self.settings.circuit_breaker.clone();
        let mut route = self.default_route.lock().unwrap();
        *route = RouteRuntime::new(new_group, &cb_defaults);
    }

    /// Reconciles this proxy's source-route and SNI-route sets against
    /// `proxy`'s current routes, removing stale map entries before adding
    /// new ones (§4.7(c)) and preserving the runtime state (health, drain,
    /// circuit) of routes that survive unchanged.
    pub fn replace_routes(&self, proxy: &ProxyConfig) {
        let cb_defaults = self.settings.circuit_breaker.clone();

        let mut source_routes = self.source_routes.lock().unwrap();
        let new_keys: std::collections::HashSet<LpmKey> = proxy
            .source_routes
            .iter()
            .map(|(route, _)| LpmKey { prefix_len: route.prefix_len, ip: route.ip })
            .collect();
        let mut removed_keys = Vec::new();
        source_routes.retain(|(key, _)| {
            let keep = new_keys.contains(key);
            if !keep {
                removed_keys.push(*key);
            }
            keep
        });
        for key in removed_keys {
            let _ = self.route_map.remove(&key);
        }
        for (route, group) in &proxy.source_routes {
            let key = LpmKey { prefix_len: route.prefix_len, ip: route.ip };
            match source_routes.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) if existing.group != *group => {
                    *existing = RouteRuntime::new(group.clone(), &cb_defaults);
                }
                Some(_) => {}
                None => source_routes.push((key, RouteRuntime::new(group.clone(), &cb_defaults))),
            }
        }
        drop(source_routes);

        let mut sni_routes = self.sni_routes.lock().unwrap();
        let new_sni_keys: std::collections::HashSet<SniKey> =
            proxy.sni_routes.iter().map(|(route, _)| SniKey::for_hostname(route.hostname.as_bytes())).collect();
        let mut removed_sni_keys = Vec::new();
        sni_routes.retain(|(key, _)| {
            let keep = new_sni_keys.contains(key);
            if !keep {
                removed_sni_keys.push(*key);
            }
            keep
        });
        for key in removed_sni_keys {
            let _ = self.sni_map.remove(&key);
        }
        for (route, group) in &proxy.sni_routes {
            let key = SniKey::for_hostname(route.hostname.as_bytes());
            match sni_routes.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) if existing.group != *group => {
                    *existing = RouteRuntime::new(group.clone(), &cb_defaults);
                }
                Some(_) => {}
                None => sni_routes.push((key, RouteRuntime::new(group.clone(), &cb_defaults))),
            }
        }
    }

    /// Begins draining the target at `index` in the default group.
    pub async fn start_drain(&self, index: usize) -> Result<()> {
        let mut route = self.default_route.lock().unwrap();
        let timeout = self.settings.drain.timeout_ms;
        if let Some(target) = route.targets.get_mut(index) {
            if target.drain.as_ref().is_some_and(|d| d.is_draining()) {
                return Err(crate::error::XlbError::DrainAlreadyDraining);
            }
            let connections = target.connection_count;
            target.drain = Some(DrainState::start(Duration::from_millis(timeout), connections));
            self.metrics.drain_events_total.add(1, &[]);
            Ok(())
        } else {
            Err(crate::error::XlbError::DrainTargetNotFound)
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Runs [`tick`](Self::tick) on `tick_interval` until `stop` is
    /// cancelled.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(proxy = %self.proxy_name, "orchestrator stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(proxy = %self.proxy_name, %err, "orchestrator tick failed, will retry next interval");
                        self.metrics.errors_total.add(1, &[]);
                    }
                }
            }
        }
    }
}

/// Re-resolves every hostname-backed target in `group`, returning
/// `Some(updated_group)` only if at least one address actually changed.
/// Weights are untouched by a DNS refresh, so the existing cumulative
/// vector is carried over rather than recomputed.
async fn resolve_hostnames(proxy_name: &str, group: &TargetGroup, dns: &DnsCache) -> Option<TargetGroup> {
    let mut changed = false;
    let mut targets = group.targets.clone();
    for target in targets.iter_mut() {
        let Some(hostname) = target.hostname.clone() else { continue };
        match dns.get_or_resolve(&hostname, target.target.port).await {
            Ok(addresses) => {
                let resolved = addresses.iter().find_map(|a| match a.ip() {
                    std::net::IpAddr::V4(v4) => Some(v4),
                    std::net::IpAddr::V6(_) => None,
                });
                if let Some(ip) = resolved {
                    if ip != target.target.ip {
                        target.target.ip = ip;
                        changed = true;
                    }
                }
            }
            Err(err) => {
                warn!(proxy = %proxy_name, %hostname, %err, "dns refresh failed, keeping last-known address");
            }
        }
    }
    changed.then_some(TargetGroup { targets, cumulative_weights: group.cumulative_weights.clone() })
}

fn tick_route(route: &mut RouteRuntime, least_conn_mode: Option<LeastConnMode>, by_target: &HashMap<(u32, u16), TargetAggregate>) -> Vec<u32> {
    for (target, state) in route.group.targets.iter().zip(route.targets.iter_mut()) {
        let key = (u32::from(target.target.ip), target.target.port);
        state.connection_count = by_target.get(&key).map(|agg| agg.connections).unwrap_or(0);
        if let Some(drain) = state.drain.as_mut() {
            drain.tick(state.connection_count);
        }
        if let Some(circuit) = state.circuit.as_mut() {
            circuit.evaluate();
        }
    }

    let configured: Vec<u32> = route.group.configured_weights();
    let healthy_mask: Vec<bool> = route.targets.iter().map(|t| t.health.is_healthy()).collect();
    let recovery_step: Vec<Option<u8>> = route.targets.iter().map(|t| t.health.recovery_step()).collect();
    let drain_mask: Vec<bool> = route.targets.iter().map(|t| t.drain.as_ref().is_some_and(|d| d.is_draining())).collect();
    let cb_states: Vec<CircuitState> = route
        .targets
        .iter()
        .map(|t| t.circuit.as_ref().map(|c| c.state()).unwrap_or(CircuitState::Closed))
        .collect();
    let conn_counts: Vec<u64> = route.targets.iter().map(|t| t.connection_count).collect();

    let inputs = PipelineInputs {
        configured: &configured,
        healthy_mask: &healthy_mask,
        recovery_step: &recovery_step,
        drain_mask: &drain_mask,
        cb_states: &cb_states,
        conn_counts: &conn_counts,
        least_conn_mode,
    };
    compute_effective_weights(&inputs)
}

fn build_route_value(
    group: &TargetGroup,
    effective_weights: &[u32],
    settings: &Settings,
    session_persistence: bool,
    proxy_protocol_v2: bool,
) -> Result<WeightedRouteValue> {
    let cumulative_weights = cumulative(effective_weights);
    let mut slots = [RouteTargetSlot::default(); 8];
    for (i, (target, cum)) in group.targets.iter().zip(&cumulative_weights).enumerate() {
        slots[i] = RouteTargetSlot {
            ip: u32::from(target.target.ip),
            port: target.target.port,
            cumulative_weight: *cum as u16,
        };
    }

    let mut flags = 0u16;
    if settings.stats_enabled {
        flags |= xlb_wire::classic::route_flags::STATS_ENABLED;
    }
    if session_persistence {
        flags |= xlb_wire::classic::route_flags::SESSION_PERSISTENCE;
    }
    if proxy_protocol_v2 {
        flags |= xlb_wire::classic::route_flags::PROXY_PROTOCOL_V2;
    }

    WeightedRouteValue::new(group.targets.len() as u8, flags, slots).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckConfig, WeightedTarget};
    use crate::conntrack::ConntrackFacade;
    use crate::maps::backend::MapKind;
    use crate::maps::mock::MockMapBackend;
    use std::net::Ipv4Addr;

    fn conntrack(backend: Arc<MockMapBackend>) -> Arc<ConntrackManager<MockMapBackend>> {
        let facade = Arc::new(ConntrackFacade::new(backend, "conntrack", MapKind::PerCpuHash, 16, 128, 4096).unwrap());
        Arc::new(ConntrackManager::new(facade, Duration::from_secs(60), Duration::from_secs(120)))
    }

    fn group(weights: &[u8]) -> TargetGroup {
        let targets = weights
            .iter()
            .enumerate()
            .map(|(i, w)| WeightedTarget {
                target: Target { ip: Ipv4Addr::new(10, 0, 0, i as u8 + 1), port: 8080 },
                configured_weight: *w,
                health_check: Some(HealthCheckConfig::default()),
                hostname: None,
            })
            .collect();
        TargetGroup::new(targets).unwrap()
    }

    #[tokio::test]
    async fn tick_pushes_weights_only_on_change() {
        let backend = Arc::new(MockMapBackend::new(1));
        let listen_map = Arc::new(MapFacade::new(backend.clone(), "listen", MapKind::Hash, 8, 72, 64).unwrap());
        let route_map = Arc::new(MapFacade::new(backend.clone(), "routes", MapKind::LpmTrie, 8, 72, 1024).unwrap());
        let sni_map = Arc::new(MapFacade::new(backend, "sni", MapKind::Hash, 8, 72, 1024).unwrap());

        let proxy = ProxyConfig {
            name: "web".into(),
            interfaces: vec!["eth0".into()],
            port: 443,
            default_group: group(&[60, 40]),
            source_routes: vec![],
            sni_routes: vec![],
            session_persistence: false,
            proxy_protocol_v2: false,
        };

        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let orchestrator = Arc::new(WeightOrchestrator::new(
            &proxy,
            2,
            Settings::default(),
            route_map,
            listen_map.clone(),
            sni_map,
            metrics,
            conntrack(backend),
        ));

        orchestrator.tick().await.unwrap();
        let pushed = listen_map.get(&ListenKey { ifindex: 2, port: 443 }).unwrap().unwrap();
        assert_eq!(pushed.target_count, 2);
        assert_eq!(pushed.targets[0].cumulative_weight, 60);
        assert_eq!(pushed.targets[1].cumulative_weight, 100);

        // No health/drain/circuit change occurred, so a second tick is a no-op.
        orchestrator.tick().await.unwrap();
    }

    #[tokio::test]
    async fn unhealthy_target_redistributes_weight_on_next_tick() {
        let backend = Arc::new(MockMapBackend::new(1));
        let listen_map = Arc::new(MapFacade::new(backend.clone(), "listen", MapKind::Hash, 8, 72, 64).unwrap());
        let route_map = Arc::new(MapFacade::new(backend.clone(), "routes", MapKind::LpmTrie, 8, 72, 1024).unwrap());
        let sni_map = Arc::new(MapFacade::new(backend, "sni", MapKind::Hash, 8, 72, 1024).unwrap());

        let proxy = ProxyConfig {
            name: "web".into(),
            interfaces: vec!["eth0".into()],
            port: 443,
            default_group: group(&[50, 30, 20]),
            source_routes: vec![],
            sni_routes: vec![],
            session_persistence: false,
            proxy_protocol_v2: false,
        };

        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let orchestrator = Arc::new(WeightOrchestrator::new(
            &proxy,
            3,
            Settings::default(),
            route_map,
            listen_map.clone(),
            sni_map,
            metrics,
            conntrack(backend),
        ));

        orchestrator.record_health(0, true).await;
        orchestrator.record_health(1, false).await;
        orchestrator.record_health(1, false).await;
        orchestrator.record_health(1, false).await;
        orchestrator.record_health(2, true).await;
        orchestrator.tick().await.unwrap();

        let pushed = listen_map.get(&ListenKey { ifindex: 3, port: 443 }).unwrap().unwrap();
        assert_eq!(pushed.targets[0].cumulative_weight, 71);
        assert_eq!(pushed.targets[1].cumulative_weight, 71);
        assert_eq!(pushed.targets[2].cumulative_weight, 100);
    }

    #[tokio::test]
    async fn replace_routes_updates_a_surviving_key_whose_group_changed() {
        let backend = Arc::new(MockMapBackend::new(1));
        let listen_map = Arc::new(MapFacade::new(backend.clone(), "listen", MapKind::Hash, 8, 72, 64).unwrap());
        let route_map = Arc::new(MapFacade::new(backend.clone(), "routes", MapKind::LpmTrie, 8, 72, 1024).unwrap());
        let sni_map = Arc::new(MapFacade::new(backend.clone(), "sni", MapKind::Hash, 8, 72, 1024).unwrap());

        let source_route = crate::config::SourceRoute { prefix_len: 16, ip: 0xc0a8_0000, group_name: "internal".into() };
        let mut proxy = ProxyConfig {
            name: "web".into(),
            interfaces: vec!["eth0".into()],
            port: 443,
            default_group: group(&[100]),
            source_routes: vec![(source_route.clone(), group(&[60, 40]))],
            sni_routes: vec![],
            session_persistence: false,
            proxy_protocol_v2: false,
        };

        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let orchestrator = Arc::new(WeightOrchestrator::new(
            &proxy,
            2,
            Settings::default(),
            route_map.clone(),
            listen_map,
            sni_map,
            metrics,
            conntrack(backend),
        ));

        orchestrator.tick().await.unwrap();
        let key = LpmKey { prefix_len: 16, ip: 0xc0a8_0000 };
        let pushed = route_map.get(&key).unwrap().unwrap();
        assert_eq!(pushed.target_count, 2);

        // Same key (CIDR unchanged), but the target group behind it changed.
        proxy.source_routes = vec![(source_route, group(&[100]))];
        orchestrator.replace_routes(&proxy);
        orchestrator.tick().await.unwrap();

        let pushed = route_map.get(&key).unwrap().unwrap();
        assert_eq!(pushed.target_count, 1);
        assert_eq!(pushed.targets[0].cumulative_weight, 100);
    }
}
