//! Two-stage load: parse the TOML into [`ConfigFile`], then resolve every
//! address (literal IPs now, hostnames deferred to [`crate::dns`]) and CIDR
//! into the runtime [`Config`] shape, validating as we go.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use ipnet::Ipv4Net;

use super::types::{
    validate_target_weights, Config, ConfigFile, ProxyConfig, ProxyConfigFile, SniRoute,
    SniRouteConfig, SourceRoute, SourceRouteConfig, Target, TargetGroup, WeightedTarget,
    WeightedTargetConfig,
};
use crate::error::{Result, ValidationFailure, XlbError};

/// Reads, parses and resolves the configuration file at `path`.
///
/// Hostnames in target addresses are resolved synchronously via a blocking
/// lookup at load time; the live [`crate::dns::DnsCache`] takes over
/// refreshing them afterwards. A config file that names a hostname which
/// does not yet resolve is rejected outright, matching "fail closed" at
/// startup and at reload.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|_| XlbError::ConfigFileNotFound(path.display().to_string()))?;
    parse_and_resolve(&raw)
}

pub(crate) fn parse_and_resolve(raw: &str) -> Result<Config> {
    let file: ConfigFile =
        toml::from_str(raw).map_err(|e| XlbError::ConfigParseFailed(e.to_string()))?;

    // An empty `proxies` list is left unrejected here: the CLI's ad-hoc
    // `--port`/`--target`/`--interface` flow seeds a single proxy into a
    // config file that names none, and that seeded proxy still needs to
    // pass through `validate` before it goes live. A config that reaches
    // `Lifecycle::start` or a reload with zero proxies is rejected by
    // `validate`, not here.
    let mut seen_names = std::collections::HashSet::new();
    let mut proxies = Vec::with_capacity(file.proxies.len());
    for proxy in file.proxies {
        if !seen_names.insert(proxy.name.clone()) {
            return Err(XlbError::ValidationFailed(ValidationFailure {
                path: "proxies[].name".into(),
                reason: format!("duplicate proxy name '{}'", proxy.name),
            }));
        }
        proxies.push(resolve_proxy(proxy)?);
    }

    Ok(Config { proxies, settings: file.settings })
}

fn resolve_proxy(file: ProxyConfigFile) -> Result<ProxyConfig> {
    if file.interfaces.is_empty() {
        return Err(XlbError::ValidationFailed(ValidationFailure {
            path: format!("proxies[{}].interfaces", file.name),
            reason: "at least one interface must be named".into(),
        }));
    }

    let default_group = resolve_group(&file.name, "targets", file.targets)?;

    let mut source_routes = Vec::with_capacity(file.source_routes.len());
    for route in file.source_routes {
        source_routes.push(resolve_source_route(&file.name, route)?);
    }

    let mut sni_routes = Vec::with_capacity(file.sni_routes.len());
    for route in file.sni_routes {
        sni_routes.push(resolve_sni_route(&file.name, route)?);
    }

    Ok(ProxyConfig {
        name: file.name,
        interfaces: file.interfaces,
        port: file.port,
        default_group,
        source_routes,
        sni_routes,
        session_persistence: file.session_persistence,
        proxy_protocol_v2: file.proxy_protocol_v2,
    })
}

fn resolve_group(proxy_name: &str, field: &str, entries: Vec<WeightedTargetConfig>) -> Result<TargetGroup> {
    let mut targets = Vec::with_capacity(entries.len());
    for entry in entries {
        targets.push(resolve_target(proxy_name, field, entry)?);
    }
    TargetGroup::new(targets)
}

fn resolve_target(proxy_name: &str, field: &str, entry: WeightedTargetConfig) -> Result<WeightedTarget> {
    let (host, port) = split_address(&entry.address).ok_or_else(|| {
        XlbError::ValidationFailed(ValidationFailure {
            path: format!("proxies[{proxy_name}].{field}[].address"),
            reason: format!("'{}' is not a valid host:port address", entry.address),
        })
    })?;

    let (ip, hostname) = resolve_host(proxy_name, field, host)?;

    Ok(WeightedTarget {
        target: Target { ip, port },
        configured_weight: entry.weight,
        health_check: entry.health_check,
        hostname,
    })
}

/// Resolves `host` to its first IPv4 address, returning the hostname
/// alongside it when `host` was not already a literal IP — the live
/// [`crate::dns::DnsCache`]-backed refresher re-resolves that hostname on
/// its own schedule afterwards.
fn resolve_host(proxy_name: &str, field: &str, host: &str) -> Result<(Ipv4Addr, Option<String>)> {
    if let Ok(ip) = Ipv4Addr::from_str(host) {
        return Ok((ip, None));
    }
    // Hostnames are resolved synchronously at load time so a typo or a dead
    // resolver fails the load (and, at reload time, the validation pass)
    // instead of silently shipping an unreachable target.
    use std::net::ToSocketAddrs;
    let addr = format!("{host}:0");
    let resolved = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.find_map(|a| match a.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        }));
    match resolved {
        Some(ip) => Ok((ip, Some(host.to_string()))),
        None => Err(XlbError::ValidationFailed(ValidationFailure {
            path: format!("proxies[{proxy_name}].{field}[].address"),
            reason: format!("'{host}' did not resolve to an IPv4 address"),
        })),
    }
}

fn split_address(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}

fn resolve_source_route(proxy_name: &str, route: SourceRouteConfig) -> Result<(SourceRoute, TargetGroup)> {
    let net: Ipv4Net = route.source.parse().map_err(|_| {
        XlbError::ValidationFailed(ValidationFailure {
            path: format!("proxies[{proxy_name}].source_routes[].source"),
            reason: format!("'{}' is not a valid IPv4 CIDR", route.source),
        })
    })?;

    let group = resolve_group(proxy_name, "source_routes[].targets", route.targets)?;
    let source = SourceRoute {
        prefix_len: net.prefix_len() as u32,
        ip: u32::from(net.network()),
        group_name: route.source,
    };
    Ok((source, group))
}

fn resolve_sni_route(proxy_name: &str, route: SniRouteConfig) -> Result<(SniRoute, TargetGroup)> {
    let group = resolve_group(proxy_name, "sni_routes[].targets", route.targets)?;
    let hostname = route.hostname.to_lowercase();
    let sni = SniRoute { hostname: hostname.clone(), group_name: hostname };
    Ok((sni, group))
}

/// Re-validates a fully resolved [`Config`] (used by the reload coordinator
/// before committing a diff, and by the CLI once after seeding an ad-hoc
/// proxy, on top of per-field validation already done during
/// [`parse_and_resolve`]). A config with no proxies at all is rejected here
/// rather than in `parse_and_resolve`, since the CLI's ad-hoc flow needs to
/// load a proxy-less file before it seeds one in.
pub fn validate(config: &Config) -> Result<()> {
    if config.proxies.is_empty() {
        return Err(XlbError::ValidationFailed(ValidationFailure {
            path: "proxies".into(),
            reason: "at least one proxy must be configured".into(),
        }));
    }
    for proxy in &config.proxies {
        validate_target_weights(&proxy.default_group.targets)?;
        for (_, group) in &proxy.source_routes {
            validate_target_weights(&group.targets)?;
        }
        for (_, group) in &proxy.sni_routes {
            validate_target_weights(&group.targets)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[proxies]]
        name = "web"
        interfaces = ["eth0"]
        port = 443

        [[proxies.targets]]
        address = "10.0.0.1:8080"
    "#;

    #[test]
    fn parses_minimal_single_target_proxy() {
        let config = parse_and_resolve(MINIMAL).unwrap();
        assert_eq!(config.proxies.len(), 1);
        let proxy = &config.proxies[0];
        assert_eq!(proxy.name, "web");
        assert_eq!(proxy.default_group.targets.len(), 1);
        assert_eq!(proxy.default_group.cumulative_weights, vec![100]);
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_100() {
        let raw = r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443

            [[proxies.targets]]
            address = "10.0.0.1:8080"
            weight = 60

            [[proxies.targets]]
            address = "10.0.0.2:8080"
            weight = 60
        "#;
        let err = parse_and_resolve(raw).unwrap_err();
        assert!(matches!(err, XlbError::ValidationFailed(_)));
    }

    #[test]
    fn parses_a_proxy_less_file_so_the_cli_can_seed_an_ad_hoc_proxy() {
        let config = parse_and_resolve("").unwrap();
        assert!(config.proxies.is_empty());
    }

    #[test]
    fn validate_rejects_zero_proxies() {
        let config = parse_and_resolve("").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, XlbError::ValidationFailed(_)));
    }

    #[test]
    fn rejects_duplicate_proxy_names() {
        let raw = format!("{MINIMAL}\n{MINIMAL}");
        let err = parse_and_resolve(&raw).unwrap_err();
        assert!(matches!(err, XlbError::ValidationFailed(_)));
    }

    #[test]
    fn resolves_cidr_source_routes() {
        let raw = r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443

            [[proxies.targets]]
            address = "10.0.0.1:8080"

            [[proxies.source_routes]]
            source = "192.168.0.0/16"

            [[proxies.source_routes.targets]]
            address = "10.0.1.1:8080"
        "#;
        let config = parse_and_resolve(raw).unwrap();
        let (route, _group) = &config.proxies[0].source_routes[0];
        assert_eq!(route.prefix_len, 16);
        assert_eq!(route.ip, u32::from(Ipv4Addr::new(192, 168, 0, 0)));
    }
}
