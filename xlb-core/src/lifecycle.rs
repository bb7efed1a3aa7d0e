//! Start/stop, interface attach/detach, and map creation/disposal (§4's
//! lifecycle component, §5's cancellation model). The smallest component
//! in the system: everything it owns is built elsewhere (the maps in
//! [`crate::maps`], the per-proxy orchestrator in [`crate::orchestrator`],
//! the conntrack cleanup loop in [`crate::conntrack`]); this module only
//! wires them together and tears them down in the right order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xlb_wire::classic::{
    settings_index, ConntrackKey, ConntrackValue, ListenKey, LpmKey, RateLimitBucketValue,
    RateLimitConfigValue, SniKey, WeightedRouteValue, CONNTRACK_KEY_LEN, CONNTRACK_VALUE_LEN,
    LISTEN_KEY_LEN, LPM_KEY_LEN, RATE_LIMIT_BUCKET_VALUE_LEN, RATE_LIMIT_CONFIG_VALUE_LEN,
    SETTINGS_ENTRY_LEN, SNI_KEY_LEN, WEIGHTED_ROUTE_VALUE_LEN,
};

use crate::config::{Config, ProxyConfig, ProxyDiff, Settings, TargetGroup, TargetGroupDiff};
use crate::conntrack::ConntrackManager;
use crate::error::{Result, XlbError};
use crate::health;
use crate::maps::backend::MapKind;
use crate::maps::{MapBackend, MapFacade, PerCpuMapFacade};
use crate::orchestrator::WeightOrchestrator;
use crate::reload::ReloadApplier;
use crate::stats::{self, RingBufSource};
use crate::telemetry::Metrics;

/// Attaches/detaches the in-kernel packet programs to a named network
/// interface. Implemented by `xlb-ebpf-loader` over `aya`; everything in
/// this crate treats it as an opaque external collaborator (§1) so it can
/// be swapped for a test double. Deliberately synchronous: attach/detach is
/// a short syscall-bound operation, and [`ReloadApplier`]'s methods (the
/// only callers during a running reload) are themselves synchronous.
pub trait InterfaceAttacher: Send + Sync {
    /// Attaches the XDP ingress program and returns the interface's
    /// `ifindex`, which becomes part of every [`ListenKey`] for proxies
    /// bound to this interface.
    fn attach_ingress(&self, interface: &str) -> Result<u32>;

    /// Attaches the TC egress program (for PROXY-protocol-v2 emission and
    /// connection teardown bookkeeping).
    fn attach_egress(&self, interface: &str) -> Result<()>;

    /// Detaches both programs. Idempotent: detaching an interface that was
    /// never attached is not an error.
    fn detach(&self, interface: &str) -> Result<()>;
}

const LISTEN_MAP_MAX: u32 = 4_096;
const ROUTE_MAP_MAX: u32 = 65_536;
const SNI_MAP_MAX: u32 = 65_536;
const CONNTRACK_MAP_MAX: u32 = 1_048_576;
const RATE_LIMIT_MAP_MAX: u32 = 1_048_576;

/// Every map the system provisions, created once at startup and held for
/// the process lifetime. Nothing outside [`Lifecycle`] owns an `Arc` to
/// these directly; orchestrators and the conntrack manager are handed
/// clones at construction.
struct Maps<B: MapBackend> {
    listen: Arc<MapFacade<B, ListenKey, WeightedRouteValue>>,
    routes: Arc<MapFacade<B, LpmKey, WeightedRouteValue>>,
    sni: Arc<MapFacade<B, SniKey, WeightedRouteValue>>,
    conntrack: Arc<PerCpuMapFacade<B, ConntrackKey, ConntrackValue>>,
    rate_limit_config: Arc<MapFacade<B, ListenKey, RateLimitConfigValue>>,
    rate_limit_buckets: Arc<PerCpuMapFacade<B, ConntrackKey, RateLimitBucketValue>>,
    /// The 4-byte-entry settings array (§6): stats-enabled, connection
    /// timeout, max connections, indexed by [`settings_index`].
    settings_array: Arc<MapFacade<B, u32, u32>>,
}

impl<B: MapBackend> Maps<B> {
    fn create(backend: Arc<B>) -> Result<Self> {
        Ok(Self {
            listen: Arc::new(MapFacade::new(
                backend.clone(),
                "xlb_listen",
                MapKind::Hash,
                LISTEN_KEY_LEN as u32,
                WEIGHTED_ROUTE_VALUE_LEN as u32,
                LISTEN_MAP_MAX,
            )?),
            routes: Arc::new(MapFacade::new(
                backend.clone(),
                "xlb_routes",
                MapKind::LpmTrie,
                LPM_KEY_LEN as u32,
                WEIGHTED_ROUTE_VALUE_LEN as u32,
                ROUTE_MAP_MAX,
            )?),
            sni: Arc::new(MapFacade::new(
                backend.clone(),
                "xlb_sni",
                MapKind::Hash,
                SNI_KEY_LEN as u32,
                WEIGHTED_ROUTE_VALUE_LEN as u32,
                SNI_MAP_MAX,
            )?),
            conntrack: Arc::new(PerCpuMapFacade::new(
                backend.clone(),
                "xlb_conntrack",
                MapKind::PerCpuHash,
                CONNTRACK_KEY_LEN as u32,
                CONNTRACK_VALUE_LEN as u32,
                CONNTRACK_MAP_MAX,
            )?),
            rate_limit_config: Arc::new(MapFacade::new(
                backend.clone(),
                "xlb_rate_limit_config",
                MapKind::Hash,
                LISTEN_KEY_LEN as u32,
                RATE_LIMIT_CONFIG_VALUE_LEN as u32,
                LISTEN_MAP_MAX,
            )?),
            rate_limit_buckets: Arc::new(PerCpuMapFacade::new(
                backend.clone(),
                "xlb_rate_limit_buckets",
                MapKind::LruPerCpuHash,
                CONNTRACK_KEY_LEN as u32,
                RATE_LIMIT_BUCKET_VALUE_LEN as u32,
                RATE_LIMIT_MAP_MAX,
            )?),
            settings_array: Arc::new(MapFacade::new(
                backend,
                "xlb_settings",
                MapKind::Array,
                4,
                SETTINGS_ENTRY_LEN as u32,
                settings_index::COUNT as u32,
            )?),
        })
    }
}

fn push_settings_array<B: MapBackend>(map: &MapFacade<B, u32, u32>, settings: &Settings) -> Result<()> {
    map.put(&(settings_index::STATS_ENABLED as u32), &(settings.stats_enabled as u32))?;
    map.put(
        &(settings_index::CONNECTION_TIMEOUT_SECONDS as u32),
        &settings.connection_timeout_secs,
    )?;
    map.put(&(settings_index::MAX_CONNECTIONS as u32), &settings.max_connections)?;
    Ok(())
}

struct RunningProxy<B: MapBackend> {
    orchestrator: Arc<WeightOrchestrator<B>>,
    stop: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    health_handles: Vec<tokio::task::JoinHandle<()>>,
    interfaces: Vec<String>,
    listen_key: ListenKey,
}

/// Join timeout for a stopped background task before the orchestrator
/// gives up waiting and moves on (§5).
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns every background task and map handle in the process: the
/// per-proxy weight orchestrators, the conntrack cleanup loop, and the set
/// of attached interfaces. Implements [`ReloadApplier`] so the
/// [`crate::reload::ReloadCoordinator`] can drive proxy add/modify/remove
/// without knowing how an orchestrator is built or torn down.
///
/// [`ReloadApplier`]'s methods are synchronous by contract, so every lock
/// here is a plain [`std::sync::Mutex`] held only across non-`await` code;
/// tearing down a proxy's background task is asynchronous and is pushed
/// onto a detached `tokio::spawn`'d cleanup task instead of being awaited
/// inline.
pub struct Lifecycle<B: MapBackend + 'static, I: InterfaceAttacher + 'static> {
    attacher: Arc<I>,
    maps: Maps<B>,
    proxies: Mutex<HashMap<String, RunningProxy<B>>>,
    interface_refcounts: Mutex<HashMap<String, (u32, usize)>>,
    conntrack_manager: Arc<ConntrackManager<B>>,
    conntrack_stop: CancellationToken,
    conntrack_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    stats_source: Option<Arc<dyn RingBufSource>>,
    stats_stop: CancellationToken,
    stats_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    metrics: Arc<Metrics>,
    settings: Mutex<Settings>,
}

impl<B: MapBackend + 'static, I: InterfaceAttacher + 'static> Lifecycle<B, I> {
    /// Creates every map the system needs. Map creation happens exactly
    /// once per process; a failure here is the one case (per §7) that is
    /// fatal rather than logged-and-retried, since nothing can run without
    /// the maps existing.
    pub fn new(backend: Arc<B>, attacher: Arc<I>, metrics: Arc<Metrics>, settings: Settings) -> Result<Self> {
        Self::with_stats_source(backend, attacher, metrics, settings, None)
    }

    /// Same as [`new`](Self::new), additionally wiring a ring-buffer source
    /// for the stats consumer (§4.10). Split out so tests and
    /// stats-less deployments don't need to provide a no-op source.
    pub fn with_stats_source(
        backend: Arc<B>,
        attacher: Arc<I>,
        metrics: Arc<Metrics>,
        settings: Settings,
        stats_source: Option<Arc<dyn RingBufSource>>,
    ) -> Result<Self> {
        let maps = Maps::create(backend)?;
        let conntrack_manager = Arc::new(ConntrackManager::new(
            maps.conntrack.clone(),
            Duration::from_secs(settings.conntrack_cleanup_interval_secs.max(1)),
            Duration::from_secs(settings.connection_timeout_secs as u64),
        ));
        Ok(Self {
            attacher,
            maps,
            proxies: Mutex::new(HashMap::new()),
            interface_refcounts: Mutex::new(HashMap::new()),
            conntrack_manager,
            conntrack_stop: CancellationToken::new(),
            conntrack_handle: AsyncMutex::new(None),
            stats_source,
            stats_stop: CancellationToken::new(),
            stats_handle: AsyncMutex::new(None),
            metrics,
            settings: Mutex::new(settings),
        })
    }

    /// Brings up every proxy in `config`: attaches each proxy's interfaces
    /// (skipping and logging ones that fail to attach, per §7's
    /// `Interface::NotFound` degrade-and-continue policy) and starts its
    /// weight orchestrator, then starts the conntrack cleanup loop.
    pub async fn start(&self, config: &Config) -> Result<()> {
        *self.settings.lock().unwrap() = config.settings.clone();
        push_settings_array(&self.maps.settings_array, &config.settings)?;
        for proxy in &config.proxies {
            if let Err(err) = self.add_proxy(proxy) {
                warn!(proxy = %proxy.name, %err, "failed to start proxy, skipping");
            }
        }

        let handle = tokio::spawn(
            self.conntrack_manager
                .clone()
                .run_cleanup_loop(self.conntrack_stop.clone(), self.metrics.clone()),
        );
        *self.conntrack_handle.lock().await = Some(handle);

        if let Some(source) = self.stats_source.clone() {
            let access_log_enabled = config.settings.access_log.enabled;
            let handle = tokio::spawn(stats::run_consumer(
                source,
                self.metrics.clone(),
                access_log_enabled,
                self.stats_stop.clone(),
            ));
            *self.stats_handle.lock().await = Some(handle);
        }

        info!(proxies = config.proxies.len(), "lifecycle started");
        Ok(())
    }

    /// Stops every running orchestrator and the conntrack cleanup loop,
    /// detaches every interface with no remaining proxy attached to it,
    /// and releases every map handle. Each background task gets
    /// [`TASK_JOIN_TIMEOUT`] to drain before it is abandoned.
    pub async fn stop(&self) {
        self.conntrack_stop.cancel();
        if let Some(handle) = self.conntrack_handle.lock().await.take() {
            join_with_timeout(handle).await;
        }

        self.stats_stop.cancel();
        if let Some(handle) = self.stats_handle.lock().await.take() {
            join_with_timeout(handle).await;
        }

        let running: Vec<RunningProxy<B>> = self.proxies.lock().unwrap().drain().map(|(_, v)| v).collect();
        for proxy in running {
            proxy.stop.cancel();
            join_with_timeout(proxy.handle).await;
            for handle in proxy.health_handles {
                join_with_timeout(handle).await;
            }
            for interface in &proxy.interfaces {
                self.release_interface(interface);
            }
        }

        let _ = self.maps.listen.close();
        let _ = self.maps.routes.close();
        let _ = self.maps.sni.close();
        let _ = self.maps.conntrack.close();
        let _ = self.maps.rate_limit_config.close();
        let _ = self.maps.rate_limit_buckets.close();
        let _ = self.maps.settings_array.close();

        let interfaces: Vec<String> = self.interface_refcounts.lock().unwrap().drain().map(|(k, _)| k).collect();
        for interface in interfaces {
            if let Err(err) = self.attacher.detach(&interface) {
                warn!(interface, %err, "failed to detach interface during shutdown");
            }
        }
        info!("lifecycle stopped");
    }

    /// Attaches `interface` if this is the first proxy to reference it,
    /// otherwise bumps its refcount and returns the already-known ifindex.
    fn acquire_interface(&self, interface: &str) -> Result<u32> {
        let mut refcounts = self.interface_refcounts.lock().unwrap();
        if let Some((ifindex, count)) = refcounts.get_mut(interface) {
            *count += 1;
            return Ok(*ifindex);
        }
        let ifindex = self.attacher.attach_ingress(interface)?;
        if let Err(err) = self.attacher.attach_egress(interface) {
            // Ingress stays attached; a TC egress failure degrades
            // PROXY-protocol emission but not basic routing.
            warn!(interface, %err, "TC egress attach failed, continuing ingress-only");
        }
        refcounts.insert(interface.to_string(), (ifindex, 1));
        Ok(ifindex)
    }

    /// Drops this proxy's reference to `interface`, detaching it once no
    /// proxy references it anymore.
    fn release_interface(&self, interface: &str) {
        let mut refcounts = self.interface_refcounts.lock().unwrap();
        match refcounts.get_mut(interface) {
            Some((_, count)) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                refcounts.remove(interface);
                drop(refcounts);
                if let Err(err) = self.attacher.detach(interface) {
                    warn!(interface, %err, "failed to detach interface");
                }
            }
            None => {}
        }
    }

    /// Begins draining the target at `index` within `proxy`'s default
    /// group.
    pub async fn start_drain(&self, proxy: &str, index: usize) -> Result<()> {
        let orchestrator = {
            let proxies = self.proxies.lock().unwrap();
            proxies.get(proxy).map(|r| r.orchestrator.clone())
        };
        match orchestrator {
            Some(orchestrator) => orchestrator.start_drain(index).await,
            None => Err(XlbError::DrainTargetNotFound),
        }
    }

    /// Records a health-probe result for the target at `index` within
    /// `proxy`'s default group. Health probing itself lives outside this
    /// crate (§1); this is the narrow seam it reports through.
    pub async fn record_health(&self, proxy: &str, index: usize, success: bool) {
        let orchestrator = {
            let proxies = self.proxies.lock().unwrap();
            proxies.get(proxy).map(|r| r.orchestrator.clone())
        };
        if let Some(orchestrator) = orchestrator {
            orchestrator.record_health(index, success).await;
        }
    }

    pub fn conntrack(&self) -> Arc<ConntrackManager<B>> {
        self.conntrack_manager.clone()
    }

    /// Count of currently running proxies, for tests and diagnostics.
    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().unwrap().len()
    }
}

/// Spawns one [`health::run_prober`] per target in `group` that carries a
/// health-check descriptor (§4.8), sharing `stop` with the proxy's
/// orchestrator task so [`Lifecycle::stop`] and a torn-down reload cancel
/// both together. Targets with no `health_check` stay `HealthState::Unknown`
/// forever and are never probed, matching §4.3's "health checks are opt-in
/// per target" rule.
fn spawn_health_probers<B: MapBackend + Send + Sync + 'static>(
    proxy_name: &str,
    group: &TargetGroup,
    orchestrator: &Arc<WeightOrchestrator<B>>,
    stop: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    group
        .targets
        .iter()
        .enumerate()
        .filter_map(|(index, weighted)| {
            let cfg = weighted.health_check.clone()?;
            Some(tokio::spawn(health::run_prober(
                proxy_name.to_string(),
                index,
                weighted.target,
                cfg,
                orchestrator.clone(),
                stop.clone(),
            )))
        })
        .collect()
}

impl<B: MapBackend + 'static, I: InterfaceAttacher + 'static> ReloadApplier for Lifecycle<B, I> {
    fn apply_settings(&self, settings: &Settings) -> Result<()> {
        // Settings that flip at the map level (stats-enabled, connection
        // timeout, max connections) are written to the settings array; the
        // rest only influence the next orchestrator tick's inputs and need
        // no map write.
        push_settings_array(&self.maps.settings_array, settings)?;
        *self.settings.lock().unwrap() = settings.clone();
        Ok(())
    }

    fn add_proxy(&self, proxy: &ProxyConfig) -> Result<()> {
        let settings = self.settings.lock().unwrap().clone();
        let mut interfaces = Vec::with_capacity(proxy.interfaces.len());
        let mut ifindex = None;
        for interface in &proxy.interfaces {
            match self.acquire_interface(interface) {
                Ok(idx) => {
                    ifindex.get_or_insert(idx);
                    interfaces.push(interface.clone());
                }
                Err(err) => {
                    warn!(interface, %err, "interface attach failed, skipping");
                }
            }
        }
        let Some(ifindex) = ifindex else {
            return Err(XlbError::InterfaceNotFound(proxy.interfaces.join(",")));
        };

        let listen_key = ListenKey { ifindex, port: proxy.port };
        if settings.rate_limit.enabled {
            crate::ratelimit::provision(
                &self.maps.rate_limit_config,
                &listen_key,
                settings.rate_limit.requests_per_second,
                settings.rate_limit.burst,
            )?;
        }

        let orchestrator = Arc::new(WeightOrchestrator::new(
            proxy,
            ifindex,
            settings,
            self.maps.routes.clone(),
            self.maps.listen.clone(),
            self.maps.sni.clone(),
            self.metrics.clone(),
            self.conntrack_manager.clone(),
        ));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(orchestrator.clone().run(stop.clone()));
        let health_handles = spawn_health_probers(&proxy.name, &proxy.default_group, &orchestrator, &stop);

        let mut proxies = self.proxies.lock().unwrap();
        proxies.insert(
            proxy.name.clone(),
            RunningProxy { orchestrator, stop, handle, health_handles, interfaces, listen_key },
        );
        debug!(proxy = %proxy.name, "proxy added");
        Ok(())
    }

    fn modify_proxy(&self, diff: &ProxyDiff) -> Result<()> {
        // A listen-key change (port or interface set) can only be applied by
        // detaching and reattaching, so it still goes through the full
        // remove+add path. Everything else is reconciled in place against
        // the running orchestrator, so the listen map entry and attached
        // interfaces are left untouched and traffic keeps flowing (§4.7(c)).
        if diff.listen_changed {
            self.remove_proxy(&diff.name)?;
            return self.add_proxy(&diff.new);
        }

        let mut proxies = self.proxies.lock().unwrap();
        let Some(running) = proxies.get_mut(&diff.name) else {
            drop(proxies);
            return self.add_proxy(&diff.new);
        };

        if diff.default_target_diff == TargetGroupDiff::Changed {
            running.orchestrator.replace_default_group(diff.new.default_group.clone());
            for handle in std::mem::take(&mut running.health_handles) {
                handle.abort();
            }
            running.health_handles = spawn_health_probers(
                &diff.name,
                &diff.new.default_group,
                &running.orchestrator,
                &running.stop,
            );
        }
        running.orchestrator.replace_routes(&diff.new);
        debug!(proxy = %diff.name, "proxy modified in place");
        Ok(())
    }

    fn remove_proxy(&self, name: &str) -> Result<()> {
        let removed = self.proxies.lock().unwrap().remove(name);
        if let Some(running) = removed {
            running.stop.cancel();
            let _ = self.maps.listen.remove(&running.listen_key);
            let _ = self.maps.rate_limit_config.remove(&running.listen_key);
            for interface in &running.interfaces {
                self.release_interface(interface);
            }
            // The tasks themselves may still be mid-tick/mid-probe; give them
            // up to `TASK_JOIN_TIMEOUT` to notice cancellation on detached
            // tasks rather than blocking this synchronous call on them.
            tokio::spawn(join_with_timeout(running.handle));
            for handle in running.health_handles {
                tokio::spawn(join_with_timeout(handle));
            }
            debug!(proxy = name, "proxy removed");
        }
        Ok(())
    }
}

async fn join_with_timeout(handle: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await.is_err() {
        warn!("background task did not stop within the join timeout, abandoning");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckConfig, Target, WeightedTarget};
    use crate::maps::mock::MockMapBackend;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeAttacher {
        next_ifindex: AtomicU32,
    }

    impl FakeAttacher {
        fn new() -> Self {
            Self { next_ifindex: AtomicU32::new(1) }
        }
    }

    impl InterfaceAttacher for FakeAttacher {
        fn attach_ingress(&self, _interface: &str) -> Result<u32> {
            Ok(self.next_ifindex.fetch_add(1, Ordering::SeqCst))
        }
        fn attach_egress(&self, _interface: &str) -> Result<()> {
            Ok(())
        }
        fn detach(&self, _interface: &str) -> Result<()> {
            Ok(())
        }
    }

    fn proxy(name: &str, port: u16) -> ProxyConfig {
        let targets = vec![WeightedTarget {
            target: Target { ip: Ipv4Addr::new(10, 0, 0, 1), port: 8080 },
            configured_weight: 100,
            health_check: Some(HealthCheckConfig::default()),
            hostname: None,
        }];
        ProxyConfig {
            name: name.to_string(),
            interfaces: vec!["eth0".to_string()],
            port,
            default_group: crate::config::TargetGroup::new(targets).unwrap(),
            source_routes: vec![],
            sni_routes: vec![],
            session_persistence: false,
            proxy_protocol_v2: false,
        }
    }

    #[tokio::test]
    async fn start_and_stop_tears_down_cleanly() {
        let backend = Arc::new(MockMapBackend::new(1));
        let attacher = Arc::new(FakeAttacher::new());
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let lifecycle = Lifecycle::new(backend, attacher, metrics, Settings::default()).unwrap();

        let config = Config { proxies: vec![proxy("web", 443)], settings: Settings::default() };
        lifecycle.start(&config).await.unwrap();
        assert_eq!(lifecycle.proxy_count(), 1);

        lifecycle.stop().await;
        assert_eq!(lifecycle.proxy_count(), 0);
    }

    #[tokio::test]
    async fn add_then_remove_proxy_releases_interface_refcount() {
        let backend = Arc::new(MockMapBackend::new(1));
        let attacher = Arc::new(FakeAttacher::new());
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let lifecycle = Lifecycle::new(backend, attacher, metrics, Settings::default()).unwrap();

        lifecycle.add_proxy(&proxy("web", 443)).unwrap();
        assert_eq!(lifecycle.interface_refcounts.lock().unwrap().get("eth0").map(|(_, c)| *c), Some(1));

        lifecycle.remove_proxy("web").unwrap();
        assert!(lifecycle.interface_refcounts.lock().unwrap().get("eth0").is_none());
    }

    #[tokio::test]
    async fn duplicate_interface_across_two_proxies_shares_refcount() {
        let backend = Arc::new(MockMapBackend::new(1));
        let attacher = Arc::new(FakeAttacher::new());
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let lifecycle = Lifecycle::new(backend, attacher, metrics, Settings::default()).unwrap();

        lifecycle.add_proxy(&proxy("web", 443)).unwrap();
        lifecycle.add_proxy(&proxy("web2", 444)).unwrap();
        assert_eq!(lifecycle.interface_refcounts.lock().unwrap().get("eth0").map(|(_, c)| *c), Some(2));

        lifecycle.remove_proxy("web").unwrap();
        assert_eq!(lifecycle.interface_refcounts.lock().unwrap().get("eth0").map(|(_, c)| *c), Some(1));
        lifecycle.remove_proxy("web2").unwrap();
        assert!(lifecycle.interface_refcounts.lock().unwrap().get("eth0").is_none());
    }
}
