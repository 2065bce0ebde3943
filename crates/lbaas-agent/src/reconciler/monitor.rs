//! Health monitors: translation and pool attachment.

use std::sync::LazyLock;

use lbaas_core::{HealthMonitor, LogicalService, MonitorType, Status};
use lbaas_driver::{FolderScope, Monitor, MonitorKind};
use regex::Regex;
use tracing::debug;

use super::{Reconciler, TenantScope};
use crate::error::AgentResult;

const DEFAULT_RECEIVE: &str = r"HTTP/1\.(0|1) 200";

/// One three-digit HTTP status code.
static STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-5][0-9]{2}$").expect("invalid status code regex"));

/// HTTP request line the monitor sends.
pub fn send_string(monitor: &HealthMonitor) -> Option<String> {
    match monitor.kind {
        MonitorType::Http | MonitorType::Https => {
            let method = monitor.http_method.as_deref().unwrap_or("GET");
            let path = monitor
                .url_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or("/");
            Some(format!(r"{method} {path} HTTP/1.0\r\n\r\n"))
        }
        _ => None,
    }
}

/// Receive pattern for `expected_codes`.
///
/// `"200,201"` becomes an alternation, `"200-204"` a character class, a
/// single code a literal. Anything else falls back to `200`.
pub fn receive_string(expected_codes: Option<&str>) -> String {
    let Some(codes) = expected_codes.map(str::trim).filter(|c| !c.is_empty()) else {
        return DEFAULT_RECEIVE.to_string();
    };
    let code = &*STATUS_CODE;

    if codes.contains(',') {
        let parts: Vec<&str> = codes.split(',').map(str::trim).collect();
        if parts.iter().all(|p| code.is_match(p)) {
            return format!(r"HTTP/1\.(0|1) ({})", parts.join("|"));
        }
    } else if let Some((low, high)) = codes.split_once('-') {
        let (low, high) = (low.trim(), high.trim());
        if code.is_match(low) && code.is_match(high) && low <= high {
            return format!(r"HTTP/1\.(0|1) [{low}-{high}]");
        }
    } else if code.is_match(codes) {
        return format!(r"HTTP/1\.(0|1) {codes}");
    }
    DEFAULT_RECEIVE.to_string()
}

/// The appliance monitor for a health monitor.
pub fn build_monitor(name: String, monitor: &HealthMonitor) -> Monitor {
    let kind = match monitor.kind {
        MonitorType::Ping => MonitorKind::GatewayIcmp,
        MonitorType::Tcp => MonitorKind::Tcp,
        MonitorType::Http => MonitorKind::Http,
        MonitorType::Https => MonitorKind::Https,
    };
    let http = matches!(monitor.kind, MonitorType::Http | MonitorType::Https);
    Monitor {
        name,
        kind,
        interval: monitor.delay,
        timeout: monitor.max_retries.saturating_mul(monitor.timeout),
        send: send_string(monitor),
        recv: http.then(|| receive_string(monitor.expected_codes.as_deref())),
    }
}

/// Delete a monitor that may still be attached to another pool.
async fn delete_if_unused(scope: &FolderScope<'_>, name: &str) -> AgentResult<()> {
    match scope.delete_monitor(name).await {
        Ok(()) => {
            debug!(monitor = %scope.path(name), "deleted monitor");
            Ok(())
        }
        Err(e) if e.is_not_found() || e.is_in_use() => {
            debug!(monitor = %scope.path(name), error = %e, "monitor left in place");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Reconciler {
    /// Create, update, attach, and detach monitors so the pool carries
    /// exactly the service's live monitors.
    pub(super) async fn reconcile_monitors(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
    ) -> AgentResult<()> {
        let deployment = self.cluster.deployment();
        let pool_name = deployment.object_name(service.pool_id());
        let live: Vec<(String, &HealthMonitor)> = service
            .health_monitors
            .iter()
            .filter(|m| m.status != Status::PendingDelete)
            .map(|m| (deployment.object_name(&m.id), m))
            .collect();
        let deleting: Vec<String> = service
            .health_monitors
            .iter()
            .filter(|m| m.status == Status::PendingDelete)
            .map(|m| deployment.object_name(&m.id))
            .collect();
        let desired: Vec<String> = live.iter().map(|(name, _)| name.clone()).collect();

        for appliance in self.cluster.config_bigips() {
            let scope = tenant.on(appliance.driver());
            let pool = scope.get_pool(&pool_name).await?;
            let attached = pool.as_ref().map(|p| p.monitors.clone()).unwrap_or_default();

            for (name, monitor) in &live {
                let wanted = build_monitor(name.clone(), monitor);
                match scope.get_monitor(name).await? {
                    None => scope.create_monitor(&wanted).await?,
                    Some(existing) if existing != wanted => scope.update_monitor(&wanted).await?,
                    Some(_) => {}
                }
            }

            if pool.is_some() {
                let target: &[String] = if service.is_pool_deleting() { &[] } else { &desired };
                if attached.as_slice() != target {
                    scope.set_pool_monitors(&pool_name, target).await?;
                }
            }

            let mut stale: Vec<&String> = attached.iter().filter(|m| !desired.contains(m)).collect();
            stale.extend(deleting.iter());
            stale.sort();
            stale.dedup();
            for name in stale {
                delete_if_unused(&scope, name).await?;
            }
        }
        Ok(())
    }
}
