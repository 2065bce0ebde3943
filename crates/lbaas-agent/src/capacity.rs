//! Capacity score.
//!
//! The score is the highest utilisation ratio across every metric that
//! has a configured cap, clamped to `[0, 1]`. A score of `1.0` or more
//! means the environment group is full and the scheduler stops placing
//! pools on it.

use lbaas_core::config::CapacityCaps;
use lbaas_driver::CapacityMetrics;

/// Score one appliance's counters against the configured caps.
pub fn score(metrics: &CapacityMetrics, caps: &CapacityCaps) -> f64 {
    let pairs = [
        (metrics.throughput, caps.throughput),
        (metrics.active_connections, caps.active_connections),
        (metrics.ssl_tps, caps.ssl_tps),
        (metrics.node_count, caps.node_count),
        (metrics.ssl_profiles, caps.ssl_profiles),
        (metrics.tenants, caps.tenants),
        (metrics.tunnels, caps.tunnels),
        (metrics.vlans, caps.vlans),
        (metrics.route_domains, caps.route_domains),
    ];
    pairs
        .into_iter()
        .filter_map(|(value, cap)| match cap {
            Some(cap) if cap > 0 => Some(value as f64 / cap as f64),
            _ => None,
        })
        .fold(0.0_f64, f64::max)
        .clamp(0.0, 1.0)
}

/// Cluster score: the busiest appliance wins.
pub fn cluster_score<'a>(
    metrics: impl IntoIterator<Item = &'a CapacityMetrics>,
    caps: &CapacityCaps,
) -> f64 {
    metrics
        .into_iter()
        .map(|m| score(m, caps))
        .fold(0.0_f64, f64::max)
}
