//! Rate limiting support for the control plane.
//!
//! The kernel program owns bucket arithmetic on the packet path; this module
//! only provisions the rate/burst pair into the map (via [`provision`]) and
//! runs an in-process sliding-window estimator ([`Rate`]) that feeds the
//! circuit breaker's error-rate window, since classifying a request as a
//! circuit-breaker "failure" is not something the packet path can do.

mod estimator;
mod rate;

pub use rate::Rate;

use ahash::RandomState;
use std::hash::Hash;
use xlb_wire::classic::{ListenKey, RateLimitConfigValue};

use crate::error::Result;
use crate::maps::{MapBackend, MapFacade};

#[inline]
fn hash<T: Hash>(key: T, hasher: &RandomState) -> u64 {
    hasher.hash_one(key)
}

/// Writes a proxy's configured requests-per-second/burst pair into the
/// rate-limit config map, scaled for sub-token precision.
pub fn provision<B: MapBackend>(
    facade: &MapFacade<B, ListenKey, RateLimitConfigValue>,
    key: &ListenKey,
    requests_per_second: f64,
    burst: f64,
) -> Result<()> {
    let value = RateLimitConfigValue::from_rates(requests_per_second, burst);
    facade.put(key, &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::{backend::MapKind, MockMapBackend};
    use std::sync::Arc;

    #[test]
    fn provision_scales_and_round_trips() {
        let backend = Arc::new(MockMapBackend::new(1));
        let facade: MapFacade<_, ListenKey, RateLimitConfigValue> =
            MapFacade::new(backend, "rate_limit_config", MapKind::Hash, 8, 16, 64).unwrap();
        let key = ListenKey { ifindex: 2, port: 443 };

        provision(&facade, &key, 100.0, 200.0).unwrap();

        let stored = facade.get(&key).unwrap().unwrap();
        assert_eq!(stored.rate_scaled, 100_000);
        assert_eq!(stored.burst_scaled, 200_000);
    }
}
