//! Agent manager: RPC dispatch, status reporting, and periodic tasks.
//!
//! Every request that touches an appliance goes through the
//! [`RequestSerializer`]. `dispatch` enqueues synchronously, so requests run
//! in the order the transport delivered them, and then spawns the wait.
//!
//! Three background loops share one shutdown signal:
//! - resync: full reconcile of every pool bound to this host
//! - stats: pool counters back to the plugin
//! - report: agent state report with the capacity score

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use lbaas_cluster::ClusterCoordinator;
use lbaas_core::naming::strip_route_domain;
use lbaas_core::rpc::{AgentConfigurations, AgentStateReport, FdbEntries, FdbUpdate};
use lbaas_core::{AgentRequest, LogicalService, NetworkType, PluginApi, PoolStats, Status};
use lbaas_driver::FolderScope;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::ServiceCache;
use crate::capacity;
use crate::error::{AgentError, AgentResult};
use crate::fdb::{L2Population, TunnelRegistry};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::serializer::{RequestSerializer, Submission, Ticket};

pub const AGENT_BINARY: &str = "lbaas-agent";
pub const AGENT_TOPIC: &str = "lbaas_agent";
pub const AGENT_TYPE: &str = "Loadbalancer agent";
pub const DEVICE_DRIVER: &str = "lbaas-driver";

/// The object whose request started a reconcile; it carries the error
/// status when the reconcile fails.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    Pool,
    Vip(String),
    /// Every member whose `create_member` folded into this request.
    Members(Vec<String>),
    Monitor(String),
}

/// What to do once a request reaches the head of the queue.
#[derive(Debug)]
enum Work {
    Reconcile(Trigger),
    Reload(String),
    Stats,
    AddFdb(FdbEntries),
    RemoveFdb(FdbEntries),
    UpdateFdb(FdbUpdate),
    Tunnel { ip: String, kind: NetworkType },
}

impl Work {
    /// Split a request into its deferred work and the service snapshot the
    /// serializer carries (and may replace when coalescing).
    fn from_request(request: AgentRequest) -> Option<(Work, Option<LogicalService>)> {
        use AgentRequest::*;
        Some(match request {
            CreateVip { vip, service } | UpdateVip { vip, service, .. } | DeleteVip { vip, service } => {
                (Work::Reconcile(Trigger::Vip(vip.id)), Some(service))
            }
            CreatePool { service, .. } | UpdatePool { service, .. } | DeletePool { service, .. } => {
                (Work::Reconcile(Trigger::Pool), Some(service))
            }
            CreateMember { member, service }
            | UpdateMember {
                member, service, ..
            }
            | DeleteMember { member, service } => {
                (Work::Reconcile(Trigger::Members(vec![member.id])), Some(service))
            }
            CreatePoolHealthMonitor {
                health_monitor,
                service,
                ..
            }
            | UpdateHealthMonitor {
                health_monitor,
                service,
                ..
            }
            | DeletePoolHealthMonitor {
                health_monitor,
                service,
                ..
            } => (Work::Reconcile(Trigger::Monitor(health_monitor.id)), Some(service)),
            ReloadPool { pool_id } | Sync { pool_id } => (Work::Reload(pool_id), None),
            GetPoolStats { service, .. } => (Work::Stats, Some(service)),
            AddFdbEntries { fdb_entries } => (Work::AddFdb(fdb_entries), None),
            RemoveFdbEntries { fdb_entries } => (Work::RemoveFdb(fdb_entries), None),
            UpdateFdbEntries { fdb_entries } => (Work::UpdateFdb(fdb_entries), None),
            TunnelUpdate {
                tunnel_ip,
                tunnel_type,
            } => (
                Work::Tunnel {
                    ip: tunnel_ip,
                    kind: tunnel_type,
                },
                None,
            ),
            AgentUpdated { .. } => return None,
        })
    }
}

/// A request holding its place in the queue.
#[derive(Debug)]
pub struct Queued {
    ticket: Ticket,
    operation: &'static str,
    work: Work,
}

impl Queued {
    pub fn request_id(&self) -> u64 {
        self.ticket.id()
    }
}

pub struct AgentManager {
    cluster: Arc<ClusterCoordinator>,
    plugin: Arc<dyn PluginApi>,
    reconciler: Reconciler,
    serializer: RequestSerializer,
    cache: ServiceCache,
    tunnels: Arc<TunnelRegistry>,
    l2: L2Population,
    /// Member ids coalesced into a queued request, by request id.
    coalesced: Mutex<HashMap<u64, Vec<String>>>,
    needs_resync: AtomicBool,
    admin_up: AtomicBool,
    start_flag_sent: AtomicBool,
}

impl AgentManager {
    pub fn new(cluster: Arc<ClusterCoordinator>, plugin: Arc<dyn PluginApi>) -> Self {
        let tunnels = Arc::new(TunnelRegistry::new());
        let poll = Duration::from_millis(cluster.config().serializer_poll_ms);
        Self {
            reconciler: Reconciler::new(cluster.clone(), plugin.clone(), tunnels.clone()),
            l2: L2Population::new(cluster.clone(), tunnels.clone()),
            serializer: RequestSerializer::new(poll),
            cache: ServiceCache::new(),
            tunnels,
            cluster,
            plugin,
            coalesced: Mutex::new(HashMap::new()),
            needs_resync: AtomicBool::new(true),
            admin_up: AtomicBool::new(true),
            start_flag_sent: AtomicBool::new(false),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterCoordinator> {
        &self.cluster
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn serializer(&self) -> &RequestSerializer {
        &self.serializer
    }

    pub fn cache(&self) -> &ServiceCache {
        &self.cache
    }

    pub fn tunnels(&self) -> &Arc<TunnelRegistry> {
        &self.tunnels
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::SeqCst)
    }

    pub fn is_admin_up(&self) -> bool {
        self.admin_up.load(Ordering::SeqCst)
    }

    fn host(&self) -> &str {
        &self.cluster.config().host
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Take a request's place in the queue.
    ///
    /// Returns `None` when there is nothing left to run: admin-state
    /// changes apply immediately, requests are dropped while the agent is
    /// administratively down, and member bursts coalesce into the request
    /// already queued for the pool.
    pub fn enqueue(&self, request: AgentRequest) -> Option<Queued> {
        let operation = request.operation();
        if let AgentRequest::AgentUpdated { admin_state_up } = request {
            self.set_admin_state(admin_state_up);
            return None;
        }
        if !self.is_admin_up() {
            warn!(%operation, pool_id = ?request.pool_id(), "agent administratively down, request dropped");
            return None;
        }

        let pool_id = request.pool_id().map(str::to_string);
        let (work, service) = Work::from_request(request)?;
        match self.serializer.submit(operation, pool_id.as_deref(), service) {
            Submission::Queued(ticket) => Some(Queued {
                ticket,
                operation,
                work,
            }),
            Submission::Coalesced { into } => {
                if let Work::Reconcile(Trigger::Members(ids)) = work {
                    self.coalesced
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(into)
                        .or_default()
                        .extend(ids);
                }
                debug!(%operation, pool_id = ?pool_id, into, "request coalesced");
                None
            }
        }
    }

    /// Wait for a queued request's turn and run it.
    pub async fn run_queued(&self, queued: Queued) -> AgentResult<()> {
        let Queued {
            ticket,
            operation,
            work,
        } = queued;
        let request_id = ticket.id();
        let result = self
            .serializer
            .execute(ticket, |snapshot| self.perform(request_id, operation, work, snapshot))
            .await;
        self.take_coalesced(request_id);
        if let Err(e) = &result {
            if e.is_connectivity() {
                self.needs_resync.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    fn take_coalesced(&self, request_id: u64) -> Vec<String> {
        self.coalesced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id)
            .unwrap_or_default()
    }

    /// Enqueue and run inline.
    pub async fn process(&self, request: AgentRequest) -> AgentResult<()> {
        match self.enqueue(request) {
            Some(queued) => self.run_queued(queued).await,
            None => Ok(()),
        }
    }

    /// Enqueue now and run in the background.
    pub fn dispatch(self: &Arc<Self>, request: AgentRequest) -> Option<JoinHandle<()>> {
        let queued = self.enqueue(request)?;
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            let request_id = queued.request_id();
            let operation = queued.operation;
            if let Err(e) = manager.run_queued(queued).await {
                error!(request_id, %operation, error = %e, "request failed");
            }
        }))
    }

    fn set_admin_state(&self, up: bool) {
        let was_up = self.admin_up.swap(up, Ordering::SeqCst);
        if up && !was_up {
            self.needs_resync.store(true, Ordering::SeqCst);
        }
        info!(admin_state_up = up, "agent admin state changed");
    }

    async fn perform(
        &self,
        request_id: u64,
        operation: &'static str,
        work: Work,
        snapshot: Option<LogicalService>,
    ) -> AgentResult<()> {
        match work {
            Work::Reconcile(mut trigger) => {
                // Nothing coalesces into a request once it is executing.
                if let Trigger::Members(ids) = &mut trigger {
                    ids.extend(self.take_coalesced(request_id));
                }
                match snapshot {
                    Some(service) => self
                        .reconcile_and_report(request_id, operation, service, trigger)
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                }
            }
            Work::Reload(pool_id) => self.reload(request_id, operation, &pool_id).await,
            Work::Stats => match snapshot {
                Some(service) => self.report_pool_stats(&service).await,
                None => Ok(()),
            },
            Work::AddFdb(entries) => self.l2.add_fdb_entries(&entries).await,
            Work::RemoveFdb(entries) => self.l2.remove_fdb_entries(&entries).await,
            Work::UpdateFdb(update) => self.l2.update_fdb_entries(&update).await,
            Work::Tunnel { ip, kind } => self.l2.tunnel_update(&ip, kind).await,
        }
    }

    // ── Reconcile and report ─────────────────────────────────────

    async fn reconcile_and_report(
        &self,
        request_id: u64,
        operation: &str,
        mut service: LogicalService,
        trigger: Trigger,
    ) -> AgentResult<ReconcileOutcome> {
        let span = info_span!("reconcile", request_id, pool_id = %service.pool_id(), %operation);
        async {
            match self.reconciler.reconcile(&mut service).await {
                Ok(outcome) => {
                    self.report_success(&service, &outcome).await;
                    if outcome.pool_deleted {
                        self.cache.remove_service(&service);
                    } else {
                        self.cache.put(&service, self.host());
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    error!(phase = ?e.phase(), error = %e, "reconcile failed");
                    self.report_failure(&service, &trigger, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Destroyed callbacks for deleted objects, settled statuses for the rest.
    async fn report_success(&self, service: &LogicalService, outcome: &ReconcileOutcome) {
        let plugin = &self.plugin;
        let pool_id = service.pool_id();

        if let Some(vip) = &service.vip {
            let vip = &vip.vip;
            let result = if vip.status == Status::PendingDelete {
                plugin.vip_destroyed(&vip.id).await
            } else {
                plugin
                    .update_vip_status(&vip.id, Status::settled(vip.admin_state_up), None)
                    .await
            };
            log_callback("vip", &vip.id, result);
        }
        for member in &service.members {
            let member = &member.member;
            let result = if member.status == Status::PendingDelete {
                plugin.member_destroyed(&member.id).await
            } else {
                plugin
                    .update_member_status(&member.id, Status::settled(member.admin_state_up), None)
                    .await
            };
            log_callback("member", &member.id, result);
        }
        for monitor in &service.health_monitors {
            let result = if monitor.status == Status::PendingDelete {
                plugin.health_monitor_destroyed(&monitor.id, pool_id).await
            } else {
                plugin
                    .update_health_monitor_status(
                        &monitor.id,
                        pool_id,
                        Status::settled(monitor.admin_state_up),
                        None,
                    )
                    .await
            };
            log_callback("health monitor", &monitor.id, result);
        }
        let result = if outcome.pool_deleted {
            plugin.pool_destroyed(pool_id).await
        } else {
            plugin
                .update_pool_status(pool_id, Status::settled(service.pool.pool.admin_state_up), None)
                .await
        };
        log_callback("pool", pool_id, result);
    }

    /// Mark the triggering objects `error`; deletes stay pending for retry.
    async fn report_failure(&self, service: &LogicalService, trigger: &Trigger, err: &AgentError) {
        let description = Some(err.status_description());
        let pool_id = service.pool_id();
        let plugin = &self.plugin;
        let result = match trigger {
            Trigger::Pool if !service.is_pool_deleting() => {
                plugin.update_pool_status(pool_id, Status::Error, description).await
            }
            Trigger::Vip(id) => match &service.vip {
                Some(vip) if vip.vip.id == *id && vip.vip.status != Status::PendingDelete => {
                    plugin.update_vip_status(id, Status::Error, description).await
                }
                _ => return,
            },
            Trigger::Members(ids) => {
                for member in &service.members {
                    let member = &member.member;
                    if member.status == Status::PendingDelete || !ids.contains(&member.id) {
                        continue;
                    }
                    let result = plugin
                        .update_member_status(&member.id, Status::Error, description.clone())
                        .await;
                    log_callback("error status", &member.id, result);
                }
                return;
            }
            Trigger::Monitor(id) => {
                let live = service
                    .health_monitors
                    .iter()
                    .any(|m| m.id == *id && m.status != Status::PendingDelete);
                if !live {
                    return;
                }
                plugin
                    .update_health_monitor_status(id, pool_id, Status::Error, description)
                    .await
            }
            Trigger::Pool => return,
        };
        log_callback("error status", pool_id, result);
    }

    async fn reload(&self, request_id: u64, operation: &str, pool_id: &str) -> AgentResult<()> {
        let global_routed = self.cluster.config().global_routed_mode;
        match self.plugin.get_service_by_pool_id(pool_id, global_routed).await? {
            Some(service) => self
                .reconcile_and_report(request_id, operation, service, Trigger::Pool)
                .await
                .map(|_| ()),
            None => {
                if self.cache.remove(pool_id).is_some() {
                    info!(%pool_id, "pool no longer exists, dropped from cache");
                }
                Ok(())
            }
        }
    }

    // ── Resync ───────────────────────────────────────────────────

    /// Forget everything assured and reconcile every pool bound here.
    ///
    /// The flush and the pool listing take one turn in the serializer, so
    /// they never land in the middle of another request. Each pool then
    /// queues behind whatever arrived meanwhile and is fetched fresh once
    /// its turn comes.
    pub async fn resync(&self) -> AgentResult<()> {
        let previous: BTreeSet<String> = self.cache.pool_ids().into_iter().collect();
        let Some(pools) = self
            .serializer
            .run("resync", None, None, |_| self.reset_for_resync())
            .await
        else {
            return Ok(());
        };
        let pools = pools?;

        let mut failures = 0usize;
        for pool_id in &pools {
            let Submission::Queued(ticket) =
                self.serializer.submit("sync", Some(pool_id.as_str()), None)
            else {
                continue;
            };
            let request_id = ticket.id();
            let result = self
                .serializer
                .execute(ticket, |_| self.reload(request_id, "sync", pool_id))
                .await;
            if let Err(e) = result {
                warn!(%pool_id, error = %e, "resync of pool failed");
                failures += 1;
            }
        }

        let purged = previous.iter().filter(|id| !pools.contains(*id)).count();
        info!(pools = pools.len(), purged, failures, "resync complete");
        if failures > 0 {
            return Err(AgentError::Invalid(format!("{failures} pools failed to resync")));
        }
        Ok(())
    }

    /// Drop every cached view of the appliances and list the pools bound
    /// to this host, deduplicated.
    async fn reset_for_resync(&self) -> AgentResult<Vec<String>> {
        let host = self.host();
        let mut pools = self.plugin.get_active_pools(host).await?;
        pools.extend(self.plugin.get_pending_pools(host).await?);

        self.cache.flush();
        self.cluster.flush_assured();
        self.cluster.deployment().clear_route_domains();
        self.tunnels.clear_tunnels();

        let mut seen = BTreeSet::new();
        Ok(pools
            .into_iter()
            .map(|p| p.pool_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    // ── Stats ────────────────────────────────────────────────────

    /// Pool counters as reported to the plugin, member states keyed by id.
    pub async fn pool_stats(&self, service: &LogicalService) -> AgentResult<PoolStats> {
        let deployment = self.cluster.deployment();
        let scope = FolderScope::new(
            self.cluster.primary().driver(),
            deployment.folder(service.tenant_id()),
            0,
        );
        let raw = scope
            .pool_stats(&deployment.object_name(service.pool_id()))
            .await?;

        let up: HashMap<(String, u16), bool> = raw
            .member_up
            .into_iter()
            .filter_map(|(name, up)| {
                let (address, port) = name.rsplit_once(':')?;
                Some(((strip_route_domain(address).to_string(), port.parse().ok()?), up))
            })
            .collect();
        let members = service
            .members
            .iter()
            .filter_map(|m| {
                let key = (m.member.address.clone(), m.member.protocol_port);
                let status = if *up.get(&key)? {
                    Status::Active
                } else {
                    Status::Inactive
                };
                Some((m.member.id.clone(), status))
            })
            .collect();

        Ok(PoolStats {
            bytes_in: raw.bytes_in,
            bytes_out: raw.bytes_out,
            active_connections: raw.active_connections,
            total_connections: raw.total_connections,
            members,
        })
    }

    async fn report_pool_stats(&self, service: &LogicalService) -> AgentResult<()> {
        let stats = self.pool_stats(service).await?;
        self.plugin.update_pool_stats(service.pool_id(), stats).await?;
        Ok(())
    }

    /// Stats for every cached pool.
    pub async fn collect_stats(&self) {
        let global_routed = self.cluster.config().global_routed_mode;
        for pool_id in self.cache.pool_ids() {
            let service = match self.plugin.get_service_by_pool_id(&pool_id, global_routed).await {
                Ok(Some(service)) => service,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%pool_id, error = %e, "could not fetch service for stats");
                    continue;
                }
            };
            if let Err(e) = self.report_pool_stats(&service).await {
                warn!(%pool_id, error = %e, "pool stats update failed");
            }
        }
    }

    // ── State report ─────────────────────────────────────────────

    /// Busiest appliance's utilisation against the configured caps.
    pub async fn capacity_score(&self) -> f64 {
        let caps = &self.cluster.config().capacity;
        if caps.is_empty() {
            return 0.0;
        }
        let mut metrics = Vec::new();
        for appliance in self.cluster.all_bigips() {
            match appliance.driver().capacity_metrics().await {
                Ok(m) => metrics.push(m),
                Err(e) => {
                    warn!(host = %appliance.hostname(), error = %e, "capacity metrics unavailable")
                }
            }
        }
        capacity::cluster_score(&metrics, caps)
    }

    pub async fn state_report(&self) -> AgentStateReport {
        let config = self.cluster.config();
        AgentStateReport {
            binary: AGENT_BINARY.to_string(),
            host: config.host.clone(),
            topic: AGENT_TOPIC.to_string(),
            agent_type: AGENT_TYPE.to_string(),
            l2_population: config.l2_population,
            configurations: AgentConfigurations {
                environment_prefix: config.environment_prefix.clone(),
                environment_group_number: config.environment_group_number,
                global_routed_mode: config.global_routed_mode,
                tunnel_types: config.tunnel_types.clone(),
                bridge_mappings: config.physical_network_mappings.clone(),
                common_networks: config.common_network_ids.clone(),
                services: self.cache.len(),
                request_queue_depth: self.serializer.len(),
                environment_capacity_score: self.capacity_score().await,
                icontrol_endpoints: self.cluster.endpoints(),
                tunneling_ips: self.cluster.tunneling_ips(),
                device_drivers: vec![DEVICE_DRIVER.to_string()],
            },
            start_flag: !self.start_flag_sent.load(Ordering::SeqCst),
        }
    }

    /// Send one state report. `start_flag` clears after the first success.
    pub async fn report_state(&self) -> AgentResult<()> {
        let report = self.state_report().await;
        let start_flag = report.start_flag;
        self.plugin.report_state(report).await?;
        if start_flag {
            self.start_flag_sent.store(true, Ordering::SeqCst);
            info!(host = %self.host(), "agent registered with plugin");
        }
        Ok(())
    }

    // ── Periodic tasks ───────────────────────────────────────────

    /// Start the resync, stats, and report loops.
    pub fn spawn_periodic(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).resync_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(self).stats_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(self).report_loop(shutdown)),
        ]
    }

    async fn resync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let config = self.cluster.config();
        let tick = Duration::from_secs(config.periodic_interval_secs.max(1));
        let full_every = Duration::from_secs(config.resync_interval_secs);
        let mut last_full: Option<Instant> = None;
        info!(?tick, ?full_every, "resync loop started");

        loop {
            let due = last_full.is_none_or(|at| at.elapsed() >= full_every);
            if self.is_admin_up() && (self.needs_resync.swap(false, Ordering::SeqCst) || due) {
                last_full = Some(Instant::now());
                if let Err(e) = self.resync().await {
                    warn!(error = %e, "resync failed, will retry");
                    self.needs_resync.store(true, Ordering::SeqCst);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {
                    info!("resync loop shutting down");
                    break;
                }
            }
        }
    }

    async fn stats_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = Duration::from_secs(self.cluster.config().stats_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(every) => self.collect_stats().await,
                _ = shutdown.changed() => {
                    debug!("stats loop shutting down");
                    break;
                }
            }
        }
    }

    async fn report_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = Duration::from_secs(self.cluster.config().report_interval_secs.max(1));
        loop {
            if let Err(e) = self.report_state().await {
                warn!(error = %e, "state report failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(every) => {}
                _ = shutdown.changed() => {
                    debug!("report loop shutting down");
                    break;
                }
            }
        }
    }
}

fn log_callback(kind: &str, id: &str, result: lbaas_core::RpcResult<()>) {
    if let Err(e) = result {
        warn!(object = kind, %id, error = %e, "status callback failed");
    }
}
