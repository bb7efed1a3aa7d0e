//! Minimal-changeset diffing between two resolved [`Config`]s (§4.3), used
//! by the reload coordinator to decide what to apply and in what order.

use std::collections::HashMap;

use super::types::{Config, ProxyConfig, Settings, TargetGroup};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDiff {
    pub settings_changed: bool,
    pub added_proxies: Vec<ProxyConfig>,
    pub removed_proxies: Vec<ProxyConfig>,
    pub modified_proxies: Vec<ProxyDiff>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        !self.settings_changed
            && self.added_proxies.is_empty()
            && self.removed_proxies.is_empty()
            && self.modified_proxies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyDiff {
    pub name: String,
    pub new: ProxyConfig,
    pub listen_changed: bool,
    pub default_target_diff: TargetGroupDiff,
    pub added_routes: usize,
    pub removed_routes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetGroupDiff {
    Unchanged,
    Changed,
}

/// Computes the minimal changeset between `old` and `new`. Proxies are
/// matched by name; target groups are compared by the full ordered
/// sequence of `(ip, port, configured_weight)`, so reordering targets
/// counts as a change even if the set is identical — order determines the
/// cumulative-weight vector pushed to the kernel.
pub fn diff(old: &Config, new: &Config) -> ConfigDiff {
    let settings_changed = old.settings != new.settings;

    let old_by_name: HashMap<&str, &ProxyConfig> =
        old.proxies.iter().map(|p| (p.name.as_str(), p)).collect();
    let new_by_name: HashMap<&str, &ProxyConfig> =
        new.proxies.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut added_proxies = Vec::new();
    let mut modified_proxies = Vec::new();
    for proxy in &new.proxies {
        match old_by_name.get(proxy.name.as_str()) {
            None => added_proxies.push(proxy.clone()),
            Some(old_proxy) => {
                if let Some(proxy_diff) = diff_proxy(old_proxy, proxy) {
                    modified_proxies.push(proxy_diff);
                }
            }
        }
    }

    let removed_proxies: Vec<ProxyConfig> = old
        .proxies
        .iter()
        .filter(|p| !new_by_name.contains_key(p.name.as_str()))
        .cloned()
        .collect();

    ConfigDiff { settings_changed, added_proxies, removed_proxies, modified_proxies }
}

fn diff_proxy(old: &ProxyConfig, new: &ProxyConfig) -> Option<ProxyDiff> {
    let listen_changed = old.interfaces != new.interfaces || old.port != new.port;
    let default_target_diff = if target_group_changed(&old.default_group, &new.default_group) {
        TargetGroupDiff::Changed
    } else {
        TargetGroupDiff::Unchanged
    };

    let old_source_keys: std::collections::HashSet<(u32, u32)> =
        old.source_routes.iter().map(|(r, _)| (r.ip, r.prefix_len)).collect();
    let new_source_keys: std::collections::HashSet<(u32, u32)> =
        new.source_routes.iter().map(|(r, _)| (r.ip, r.prefix_len)).collect();
    let old_sni_keys: std::collections::HashSet<&str> =
        old.sni_routes.iter().map(|(r, _)| r.hostname.as_str()).collect();
    let new_sni_keys: std::collections::HashSet<&str> =
        new.sni_routes.iter().map(|(r, _)| r.hostname.as_str()).collect();

    let added_routes = new_source_keys.difference(&old_source_keys).count()
        + new_sni_keys.difference(&old_sni_keys).count();
    let removed_routes = old_source_keys.difference(&new_source_keys).count()
        + old_sni_keys.difference(&new_sni_keys).count();

    let route_target_changed = new
        .source_routes
        .iter()
        .any(|(new_route, new_group)| {
            old.source_routes.iter().any(|(old_route, old_group)| {
                old_route.ip == new_route.ip
                    && old_route.prefix_len == new_route.prefix_len
                    && target_group_changed(old_group, new_group)
            })
        })
        || new.sni_routes.iter().any(|(new_route, new_group)| {
            old.sni_routes.iter().any(|(old_route, old_group)| {
                old_route.hostname == new_route.hostname && target_group_changed(old_group, new_group)
            })
        });

    let nothing_changed = !listen_changed
        && default_target_diff == TargetGroupDiff::Unchanged
        && added_routes == 0
        && removed_routes == 0
        && !route_target_changed
        && old.session_persistence == new.session_persistence
        && old.proxy_protocol_v2 == new.proxy_protocol_v2;

    if nothing_changed {
        return None;
    }

    Some(ProxyDiff {
        name: new.name.clone(),
        new: new.clone(),
        listen_changed,
        default_target_diff,
        added_routes,
        removed_routes,
    })
}

fn target_group_changed(old: &TargetGroup, new: &TargetGroup) -> bool {
    if old.targets.len() != new.targets.len() {
        return true;
    }
    old.targets.iter().zip(&new.targets).any(|(a, b)| {
        a.target.ip != b.target.ip
            || a.target.port != b.target.port
            || a.configured_weight != b.configured_weight
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_and_resolve;

    fn cfg(raw: &str) -> Config {
        parse_and_resolve(raw).unwrap()
    }

    #[test]
    fn identical_configs_diff_empty() {
        let raw = r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443
            [[proxies.targets]]
            address = "10.0.0.1:8080"
        "#;
        let a = cfg(raw);
        let b = cfg(raw);
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn added_and_removed_proxies_detected() {
        let old = cfg(r#"
            [[proxies]]
            name = "a"
            interfaces = ["eth0"]
            port = 80
            [[proxies.targets]]
            address = "10.0.0.1:8080"
        "#);
        let new = cfg(r#"
            [[proxies]]
            name = "b"
            interfaces = ["eth0"]
            port = 81
            [[proxies.targets]]
            address = "10.0.0.2:8080"
        "#);
        let d = diff(&old, &new);
        assert_eq!(d.added_proxies.len(), 1);
        assert_eq!(d.removed_proxies.len(), 1);
        assert!(d.modified_proxies.is_empty());
    }

    #[test]
    fn port_change_sets_listen_changed() {
        let old = cfg(r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443
            [[proxies.targets]]
            address = "10.0.0.1:8080"
        "#);
        let new = cfg(r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 8443
            [[proxies.targets]]
            address = "10.0.0.1:8080"
        "#);
        let d = diff(&old, &new);
        assert_eq!(d.modified_proxies.len(), 1);
        assert!(d.modified_proxies[0].listen_changed);
    }

    #[test]
    fn weight_only_change_flags_default_target_diff() {
        let old = cfg(r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443
            [[proxies.targets]]
            address = "10.0.0.1:8080"
            weight = 50
            [[proxies.targets]]
            address = "10.0.0.2:8080"
            weight = 50
        "#);
        let new = cfg(r#"
            [[proxies]]
            name = "web"
            interfaces = ["eth0"]
            port = 443
            [[proxies.targets]]
            address = "10.0.0.1:8080"
            weight = 70
            [[proxies.targets]]
            address = "10.0.0.2:8080"
            weight = 30
        "#);
        let d = diff(&old, &new);
        assert_eq!(d.modified_proxies.len(), 1);
        assert!(!d.modified_proxies[0].listen_changed);
        assert_eq!(d.modified_proxies[0].default_target_diff, TargetGroupDiff::Changed);
    }
}
