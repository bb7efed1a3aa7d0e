use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xlb_core::config::{Config, HealthCheckConfig, ProxyConfig, Target, TargetGroup, WeightedTarget};
use xlb_core::{load_from_path, Lifecycle, ReloadCoordinator, ReloadOutcome};
use xlb_ebpf_loader::AyaLoader;

#[derive(Parser, Debug)]
#[command(author, version, about = "xlb: user-space control plane for an XDP/TC load balancer")]
struct Cli {
    /// Path to a declarative TOML configuration file.
    #[arg(short, long, value_name = "FILE", required = true)]
    config: PathBuf,

    /// Interface to attach to; repeatable. Combined with --port and
    /// --target to seed a single ad-hoc proxy when `config` defines none.
    #[arg(short, long = "interface", value_name = "NAME")]
    interfaces: Vec<String>,

    /// Listen port for the ad-hoc proxy.
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend target as `ip:port` for the ad-hoc proxy.
    #[arg(short, long)]
    target: Option<String>,

    /// Enable the stats ring-buffer consumer and access logging.
    #[arg(long)]
    stats: bool,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the precompiled XDP/TC object exporting `xlb_ingress` (XDP)
    /// and `xlb_egress` (TC), plus the maps in §6.
    #[arg(long, value_name = "FILE", default_value = "xlb.bpf.o")]
    bpf_object: PathBuf,
}

/// Builds the single proxy `--port`/`--target`/`--interface` describe, used
/// to seed `config.proxies` when the parsed file defines none.
fn ad_hoc_proxy(cli: &Cli) -> Result<ProxyConfig, String> {
    let port = cli.port.ok_or("--port is required when the config file defines no proxies")?;
    let target = cli.target.as_deref().ok_or("--target is required when the config file defines no proxies")?;
    let (ip, tport) = target.rsplit_once(':').ok_or("--target must be `ip:port`")?;
    let ip = Ipv4Addr::from_str(ip).map_err(|e| format!("invalid target IP: {e}"))?;
    let tport: u16 = tport.parse().map_err(|e| format!("invalid target port: {e}"))?;
    if cli.interfaces.is_empty() {
        return Err("at least one --interface is required when the config file defines no proxies".to_string());
    }

    let target_group = TargetGroup::new(vec![WeightedTarget {
        target: Target { ip, port: tport },
        configured_weight: 100,
        health_check: Some(HealthCheckConfig::default()),
        hostname: None,
    }])
    .map_err(|e| e.to_string())?;

    Ok(ProxyConfig {
        name: "adhoc".to_string(),
        interfaces: cli.interfaces.clone(),
        port,
        default_group: target_group,
        source_routes: vec![],
        sni_routes: vec![],
        session_persistence: false,
        proxy_protocol_v2: false,
    })
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut config = load_from_path(&cli.config).map_err(|e| e.to_string())?;
    if config.proxies.is_empty() {
        config.proxies.push(ad_hoc_proxy(cli)?);
    }
    if cli.stats {
        config.settings.stats_enabled = true;
        config.settings.access_log.enabled = true;
    }
    xlb_core::config::validate(&config).map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let loader = match AyaLoader::load(&cli.bpf_object) {
        Ok(loader) => loader,
        Err(err) => {
            error!(%err, path = %cli.bpf_object.display(), "failed to load BPF object");
            std::process::exit(1);
        }
    };
    let backend = Arc::new(loader.map_backend());
    let attacher = Arc::new(loader.attacher());

    let (metrics, _registry) = match xlb_core::telemetry::init_metrics() {
        Ok(m) => m,
        Err(err) => {
            error!(%err, "failed to initialize metrics pipeline");
            std::process::exit(1);
        }
    };

    let stats_source = if cli.stats {
        Some(Arc::new(loader.ring_buf_source()) as Arc<dyn xlb_core::stats::RingBufSource>)
    } else {
        None
    };

    let lifecycle = match Lifecycle::with_stats_source(
        backend,
        attacher,
        metrics.clone(),
        config.settings.clone(),
        stats_source,
    ) {
        Ok(l) => Arc::new(l),
        Err(err) => {
            error!(%err, "failed to initialize lifecycle");
            std::process::exit(1);
        }
    };

    if let Err(err) = lifecycle.start(&config).await {
        error!(%err, "failed to start proxies");
        std::process::exit(1);
    }
    info!(proxies = config.proxies.len(), "xlb started");

    let coordinator = Arc::new(ReloadCoordinator::new(config, lifecycle.clone(), metrics.clone()));

    let watch_stop = CancellationToken::new();
    let watch_handle = {
        let coordinator = coordinator.clone();
        let path = cli.config.clone();
        let stop = watch_stop.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.watch_file(path, std::time::Duration::from_millis(500), stop).await {
                warn!(%err, "config file watcher exited");
            }
        })
    };

    let sighup_handle = {
        let coordinator = coordinator.clone();
        let config_path = cli.config.clone();
        tokio::spawn(async move {
            let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(s) => s,
                Err(err) => {
                    warn!(%err, "failed to install SIGHUP handler");
                    return;
                }
            };
            loop {
                sighup.recv().await;
                match load_from_path(&config_path) {
                    Ok(new_config) => match coordinator.reload(new_config).await {
                        Ok(ReloadOutcome::Applied) => info!("reload applied via SIGHUP"),
                        Ok(ReloadOutcome::NoChange) => info!("reload via SIGHUP: no change"),
                        Ok(ReloadOutcome::Rejected) => warn!("reload via SIGHUP rejected"),
                        Err(err) => warn!(%err, "reload via SIGHUP failed"),
                    },
                    Err(err) => warn!(%err, "failed to reload configuration for SIGHUP"),
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    watch_stop.cancel();
    sighup_handle.abort();
    watch_handle.abort();
    lifecycle.stop().await;
    info!("xlb stopped cleanly");
}
