//! Reload coordination (§4.7): validate-then-apply config reloads behind a
//! single global lock, in a fixed apply order, plus a debounced file
//! watcher that triggers reloads automatically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{diff, loader, Config, ConfigDiff};
use crate::error::{Result, XlbError};
use crate::telemetry::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The new config was identical to the running one; nothing applied.
    NoChange,
    Applied,
    Rejected,
}

/// Applies the pieces of a [`ConfigDiff`] to the running system. Lifecycle
/// implements this; the coordinator only knows the fixed apply order, not
/// how to attach/detach an orchestrator or push a settings map entry.
///
/// Every map write these methods perform is synchronous (the backend trait
/// itself is sync); anything genuinely asynchronous, like spawning a new
/// proxy's background tasks, happens after `apply` returns, keyed off the
/// same [`ConfigDiff`] the coordinator already computed.
pub trait ReloadApplier: Send + Sync {
    fn apply_settings(&self, settings: &crate::config::Settings) -> Result<()>;
    fn add_proxy(&self, proxy: &crate::config::ProxyConfig) -> Result<()>;
    fn modify_proxy(&self, diff: &crate::config::ProxyDiff) -> Result<()>;
    fn remove_proxy(&self, name: &str) -> Result<()>;
}

/// Lets a single `Arc<Lifecycle<..>>` serve both as the thing the CLI calls
/// `start`/`stop`/`start_drain` on directly and as the [`ReloadCoordinator`]'s
/// applier, instead of needing two handles onto the same state.
impl<A: ReloadApplier + ?Sized> ReloadApplier for Arc<A> {
    fn apply_settings(&self, settings: &crate::config::Settings) -> Result<()> {
        (**self).apply_settings(settings)
    }
    fn add_proxy(&self, proxy: &crate::config::ProxyConfig) -> Result<()> {
        (**self).add_proxy(proxy)
    }
    fn modify_proxy(&self, diff: &crate::config::ProxyDiff) -> Result<()> {
        (**self).modify_proxy(diff)
    }
    fn remove_proxy(&self, name: &str) -> Result<()> {
        (**self).remove_proxy(name)
    }
}

/// Owns the single source of truth for the running [`Config`] and the
/// global reload lock. Only one reload may be in flight at a time; a
/// concurrent attempt is rejected rather than queued, so an operator
/// retries explicitly instead of reloads silently piling up.
pub struct ReloadCoordinator<A: ReloadApplier> {
    current: ArcSwap<Config>,
    lock: Mutex<()>,
    applier: A,
    metrics: Arc<Metrics>,
}

impl<A: ReloadApplier> ReloadCoordinator<A> {
    pub fn new(initial: Config, applier: A, metrics: Arc<Metrics>) -> Self {
        Self { current: ArcSwap::from_pointee(initial), lock: Mutex::new(()), applier, metrics }
    }

    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Validates `new_config`, diffs it against the running config, applies
    /// the changeset in the fixed order (settings, added proxies, modified
    /// proxies [removals within a proxy before additions], removed
    /// proxies), then commits the new config as current.
    ///
    /// A failure partway through an apply leaves the map state partially
    /// updated; the running [`Config`] is only swapped in on full success,
    /// so the next reload attempt (even of the same file) is the recovery
    /// path rather than an automatic rollback.
    pub async fn reload(&self, new_config: Config) -> Result<ReloadOutcome> {
        let guard = self.lock.try_lock();
        let _guard = match guard {
            Ok(g) => g,
            Err(_) => return Err(XlbError::ReloadAlreadyInProgress),
        };

        loader::validate(&new_config)?;

        let old_config = self.current.load();
        let changeset = diff(&old_config, &new_config);
        if changeset.is_empty() {
            self.metrics.reload_outcomes_total.add(1, &[opentelemetry::KeyValue::new("outcome", "no_change")]);
            return Ok(ReloadOutcome::NoChange);
        }

        if let Err(err) = self.apply(&changeset, &new_config).await {
            error!(%err, "reload apply failed, running config left unchanged");
            self.metrics.reload_outcomes_total.add(1, &[opentelemetry::KeyValue::new("outcome", "rejected")]);
            return Err(err);
        }

        self.current.store(Arc::new(new_config));
        self.metrics.reload_outcomes_total.add(1, &[opentelemetry::KeyValue::new("outcome", "applied")]);
        info!(
            added = changeset.added_proxies.len(),
            modified = changeset.modified_proxies.len(),
            removed = changeset.removed_proxies.len(),
            "reload applied"
        );
        Ok(ReloadOutcome::Applied)
    }

    async fn apply(&self, changeset: &ConfigDiff, new_config: &Config) -> Result<()> {
        if changeset.settings_changed {
            self.applier.apply_settings(&new_config.settings)?;
        }
        for proxy in &changeset.added_proxies {
            self.applier.add_proxy(proxy)?;
        }
        for proxy_diff in &changeset.modified_proxies {
            self.applier.modify_proxy(proxy_diff)?;
        }
        for proxy in &changeset.removed_proxies {
            self.applier.remove_proxy(&proxy.name)?;
        }
        Ok(())
    }
}

impl<A: ReloadApplier + 'static> ReloadCoordinator<A> {
    /// Watches `path` for writes and triggers [`reload`](Self::reload) on
    /// each, debounced by `debounce` so an editor's temp-file-then-rename
    /// save sequence produces one reload instead of several.
    pub async fn watch_file(self: Arc<Self>, path: PathBuf, debounce: Duration, stop: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| XlbError::Io(std::io::Error::other(e.to_string())))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| XlbError::Io(std::io::Error::other(e.to_string())))?;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(path = %path.display(), "config file watcher stopping");
                    return Ok(());
                }
                event = rx.recv() => {
                    let Some(_event) = event else { return Ok(()); };
                    // Drain additional events for `debounce` so a burst of
                    // writes (rename + chmod + write) collapses into one.
                    tokio::select! {
                        _ = stop.cancelled() => return Ok(()),
                        _ = async {
                            loop {
                                tokio::select! {
                                    _ = tokio::time::sleep(debounce) => break,
                                    Some(_) = rx.recv() => continue,
                                }
                            }
                        } => {}
                    }
                    self.reload_from_path(&path).await;
                }
            }
        }
    }

    async fn reload_from_path(&self, path: &Path) {
        match loader::load_from_path(path) {
            Ok(config) => match self.reload(config).await {
                Ok(ReloadOutcome::Applied) => info!(path = %path.display(), "config file change applied"),
                Ok(ReloadOutcome::NoChange) => debug!(path = %path.display(), "config file changed but produced no diff"),
                Ok(ReloadOutcome::Rejected) | Err(_) => {
                    warn!(path = %path.display(), "config file reload rejected");
                }
            },
            Err(err) => warn!(path = %path.display(), %err, "failed to parse reloaded config file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_and_resolve;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingApplier {
        settings_applied: AtomicUsize,
        proxies_added: AtomicUsize,
        proxies_modified: AtomicUsize,
        proxies_removed: AtomicUsize,
    }

    impl ReloadApplier for RecordingApplier {
        fn apply_settings(&self, _settings: &crate::config::Settings) -> Result<()> {
            self.settings_applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn add_proxy(&self, _proxy: &crate::config::ProxyConfig) -> Result<()> {
            self.proxies_added.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn modify_proxy(&self, _diff: &crate::config::ProxyDiff) -> Result<()> {
            self.proxies_modified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn remove_proxy(&self, _name: &str) -> Result<()> {
            self.proxies_removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const BASE: &str = r#"
        [[proxies]]
        name = "web"
        interfaces = ["eth0"]
        port = 443
        [[proxies.targets]]
        address = "10.0.0.1:8080"
    "#;

    #[tokio::test]
    async fn identical_reload_reports_no_change() {
        let config = parse_and_resolve(BASE).unwrap();
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let coordinator = ReloadCoordinator::new(config, RecordingApplier::default(), metrics);

        let same = parse_and_resolve(BASE).unwrap();
        let outcome = coordinator.reload(same).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::NoChange);
        assert_eq!(coordinator.applier.settings_applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn added_proxy_is_applied_and_committed() {
        let config = parse_and_resolve(BASE).unwrap();
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let coordinator = ReloadCoordinator::new(config, RecordingApplier::default(), metrics);

        let with_second = parse_and_resolve(&format!(
            "{BASE}\n[[proxies]]\nname = \"api\"\ninterfaces = [\"eth0\"]\nport = 444\n[[proxies.targets]]\naddress = \"10.0.0.2:8080\"\n"
        ))
        .unwrap();
        let outcome = coordinator.reload(with_second).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Applied);
        assert_eq!(coordinator.applier.proxies_added.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.current().proxies.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_reload_is_rejected() {
        let config = parse_and_resolve(BASE).unwrap();
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let coordinator = Arc::new(ReloadCoordinator::new(config, RecordingApplier::default(), metrics));

        let _held = coordinator.lock.lock().await;
        let other = parse_and_resolve(BASE).unwrap();
        let err = coordinator.reload(other).await.unwrap_err();
        assert!(matches!(err, XlbError::ReloadAlreadyInProgress));
    }
}
