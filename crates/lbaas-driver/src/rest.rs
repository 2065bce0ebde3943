//! REST driver for the appliance management API (`/mgmt/tm/...`).
//!
//! One HTTP/1.1 connection per request, basic auth, JSON bodies. Status
//! codes map onto the driver error taxonomy: 404 is `NotFound`, 409 is
//! `Conflict` (or a locked trust domain), and a 400 complaining that an
//! object is referenced is `InUse`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use serde_json::{Value, json};
use tracing::debug;

use crate::driver::ApplianceDriver;
use crate::error::{DriverError, DriverResult};
use crate::types::*;

const MONITOR_KINDS: [MonitorKind; 4] = [
    MonitorKind::GatewayIcmp,
    MonitorKind::Tcp,
    MonitorKind::Http,
    MonitorKind::Https,
];

pub struct RestDriver {
    hostname: String,
    port: u16,
    authorization: String,
    connect_timeout: Duration,
}

impl RestDriver {
    pub fn new(hostname: &str, port: u16, username: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self {
            hostname: hostname.to_string(),
            port,
            authorization: format!("Basic {token}"),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    // ── Transport ────────────────────────────────────────────────

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let address = format!("{}:{}", self.hostname, self.port);
        let stream = tokio::time::timeout(self.connect_timeout, tokio::net::TcpStream::connect(&address))
            .await
            .map_err(|_| DriverError::Timeout(format!("connect {address}")))?
            .map_err(|e| DriverError::Io(format!("connect {address}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| DriverError::Io(format!("handshake {address}: {e}")))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let payload = match &body {
            Some(v) => Bytes::from(v.to_string()),
            None => Bytes::new(),
        };
        let request = http::Request::builder()
            .method(method.clone())
            .uri(format!("http://{address}{path}"))
            .header("host", &address)
            .header("authorization", &self.authorization)
            .header("content-type", "application/json")
            .header("user-agent", "lbaas-agent/0.1")
            .body(Full::new(payload))
            .map_err(|e| DriverError::Io(format!("build request: {e}")))?;

        debug!(host = %self.hostname, %method, path, "appliance request");
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| DriverError::Io(format!("{method} {path}: {e}")))?;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| DriverError::Io(format!("read {path}: {e}")))?
            .to_bytes();
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if (200..300).contains(&status) {
            return Ok(value);
        }
        let message = value["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{method} {path}"));
        Err(match status {
            404 => DriverError::NotFound(message),
            409 if message.contains("lock") => DriverError::Api { status, message },
            409 => DriverError::Conflict(message),
            400 if message.contains("in use") || message.contains("referenced") => {
                DriverError::InUse(message)
            }
            _ => DriverError::Api { status, message },
        })
    }

    async fn get(&self, path: &str) -> DriverResult<Value> {
        self.call(Method::GET, path, None).await
    }

    async fn get_opt(&self, path: &str) -> DriverResult<Option<Value>> {
        match self.get(path).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn items(&self, path: &str) -> DriverResult<Vec<Value>> {
        let v = self.get(path).await?;
        Ok(v["items"].as_array().cloned().unwrap_or_default())
    }

    async fn folder_items(&self, path: &str, folder: &str) -> DriverResult<Vec<Value>> {
        self.items(&format!("{path}?$filter=partition+eq+{folder}")).await
    }

    async fn post(&self, path: &str, body: Value) -> DriverResult<()> {
        self.call(Method::POST, path, Some(body)).await.map(|_| ())
    }

    async fn patch(&self, path: &str, body: Value) -> DriverResult<()> {
        self.call(Method::PATCH, path, Some(body)).await.map(|_| ())
    }

    async fn put(&self, path: &str, body: Value) -> DriverResult<()> {
        self.call(Method::PUT, path, Some(body)).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> DriverResult<()> {
        self.call(Method::DELETE, path, None).await.map(|_| ())
    }

    async fn upsert(&self, collection: &str, folder: &str, name: &str, body: Value) -> DriverResult<()> {
        let path = format!("{collection}/{}", obj(folder, name));
        if self.get_opt(&path).await?.is_some() {
            self.put(&path, body).await
        } else {
            self.post(collection, body).await
        }
    }

    async fn route_domains(&self) -> DriverResult<Vec<Value>> {
        self.items("/mgmt/tm/net/route-domain").await
    }
}

// ── JSON helpers ──────────────────────────────────────────────────

/// `~folder~name`, with `%` escaped for route-domain addresses.
fn obj(folder: &str, name: &str) -> String {
    format!("~{folder}~{}", name.replace('%', "%25"))
}

fn s(v: &Value, key: &str) -> String {
    v[key].as_str().unwrap_or_default().to_string()
}

fn u(v: &Value, key: &str) -> u64 {
    v[key].as_u64().unwrap_or_default()
}

fn route_domain_id(rd: &Value) -> DriverResult<u16> {
    u16::try_from(u(rd, "id")).map_err(|_| {
        DriverError::Malformed(format!("route domain {} has id {}", s(rd, "name"), rd["id"]))
    })
}

fn names(items: &[Value]) -> Vec<String> {
    items.iter().map(|i| s(i, "name")).collect()
}

/// Last path component of a `/folder/name` reference.
fn leaf(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Find a stats entry's `description` or `value` anywhere in a nested stats tree.
fn find_stat(v: &Value, key: &str) -> Option<Value> {
    match v {
        Value::Object(map) => {
            if let Some(entry) = map.get(key) {
                if let Some(d) = entry.get("description").or_else(|| entry.get("value")) {
                    return Some(d.clone());
                }
            }
            map.values().find_map(|child| find_stat(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_stat(child, key)),
        _ => None,
    }
}

fn stat_u64(v: &Value, key: &str) -> u64 {
    find_stat(v, key).and_then(|x| x.as_u64()).unwrap_or_default()
}

fn stat_str(v: &Value, key: &str) -> String {
    find_stat(v, key)
        .and_then(|x| x.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn monitor_path(kind: MonitorKind) -> String {
    format!("/mgmt/tm/ltm/monitor/{}", kind.as_str())
}

fn pool_body(folder: &str, pool: &AppliancePool) -> Value {
    let monitor = pool
        .monitors
        .iter()
        .map(|m| format!("/{folder}/{m}"))
        .collect::<Vec<_>>()
        .join(" and ");
    json!({
        "name": pool.name,
        "partition": folder,
        "description": pool.description,
        "loadBalancingMode": pool.lb_method.as_str(),
        "monitor": monitor,
    })
}

fn member_body(folder: &str, member: &PoolMember) -> Value {
    json!({
        "name": member.name(),
        "partition": folder,
        "ratio": member.ratio,
        "session": if member.enabled { "user-enabled" } else { "user-disabled" },
    })
}

fn monitor_body(folder: &str, monitor: &Monitor) -> Value {
    let mut body = json!({
        "name": monitor.name,
        "partition": folder,
        "interval": monitor.interval,
        "timeout": monitor.timeout,
    });
    if let Some(send) = &monitor.send {
        body["send"] = json!(send);
    }
    if let Some(recv) = &monitor.recv {
        body["recv"] = json!(recv);
    }
    body
}

fn virtual_body(folder: &str, vs: &VirtualServer) -> Value {
    let mut profiles: Vec<Value> = vs.profiles.iter().map(|p| json!({ "name": p })).collect();
    if vs.kind == VirtualServerKind::FastL4 && profiles.is_empty() {
        profiles.push(json!({ "name": "/Common/fastL4" }));
    }
    let snat = match &vs.snat {
        SnatSetting::None => json!({ "type": "none" }),
        SnatSetting::Automap => json!({ "type": "automap" }),
        SnatSetting::Pool(p) => json!({ "type": "snat", "pool": format!("/{folder}/{p}") }),
    };
    let protocol = match vs.ip_protocol {
        IpProtocol::Tcp => "tcp",
        IpProtocol::Udp => "udp",
        IpProtocol::Any => "any",
    };
    let mut body = json!({
        "name": vs.name,
        "partition": folder,
        "description": vs.description,
        "destination": format!("/{folder}/{}:{}", vs.destination, vs.port),
        "mask": vs.mask,
        "ipProtocol": protocol,
        "profiles": profiles,
        "rules": vs.rules.iter().map(|(r, _)| format!("/{folder}/{r}")).collect::<Vec<_>>(),
        "connectionLimit": vs.connection_limit,
        "vlans": vs.vlans,
        "vlansEnabled": !vs.vlans.is_empty(),
        "sourceAddressTranslation": snat,
        "persist": vs.persistence.iter().map(|p| json!({ "name": p })).collect::<Vec<_>>(),
        "fallbackPersistence": vs.fallback_persistence.clone().unwrap_or_default(),
    });
    body["pool"] = json!(vs.pool.clone().unwrap_or_default());
    if vs.kind == VirtualServerKind::IpForwarding {
        body["ipForward"] = json!(true);
    }
    if vs.enabled {
        body["enabled"] = json!(true);
    } else {
        body["disabled"] = json!(true);
    }
    body
}

fn parse_virtual(v: &Value) -> VirtualServer {
    let destination = leaf(&s(v, "destination"));
    let (address, port) = match destination.rsplit_once(':') {
        Some((a, p)) => (a.to_string(), p.parse().unwrap_or_default()),
        None => (destination.clone(), 0),
    };
    let profiles: Vec<String> = v["profilesReference"]["items"]
        .as_array()
        .map(|items| items.iter().map(|p| s(p, "fullPath")).collect())
        .unwrap_or_default();
    let kind = if v["ipForward"].as_bool().unwrap_or(false) {
        VirtualServerKind::IpForwarding
    } else if profiles.iter().any(|p| p.ends_with("fastL4")) {
        VirtualServerKind::FastL4
    } else {
        VirtualServerKind::Standard
    };
    let snat = match v["sourceAddressTranslation"]["type"].as_str() {
        Some("automap") => SnatSetting::Automap,
        Some("snat") => SnatSetting::Pool(leaf(&s(&v["sourceAddressTranslation"], "pool"))),
        _ => SnatSetting::None,
    };
    let rules = v["rules"]
        .as_array()
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.as_str())
                .map(|r| (leaf(r), 500))
                .collect()
        })
        .unwrap_or_default();
    VirtualServer {
        name: s(v, "name"),
        description: s(v, "description"),
        destination: address,
        port,
        mask: s(v, "mask"),
        ip_protocol: match v["ipProtocol"].as_str() {
            Some("tcp") => IpProtocol::Tcp,
            Some("udp") => IpProtocol::Udp,
            _ => IpProtocol::Any,
        },
        kind,
        pool: v["pool"].as_str().filter(|p| !p.is_empty()).map(leaf),
        enabled: !v["disabled"].as_bool().unwrap_or(false),
        profiles,
        persistence: v["persist"][0]["name"].as_str().map(leaf),
        fallback_persistence: v["fallbackPersistence"]
            .as_str()
            .filter(|p| !p.is_empty())
            .map(leaf),
        rules,
        connection_limit: u(v, "connectionLimit") as u32,
        vlans: v["vlans"]
            .as_array()
            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        snat,
        traffic_group: String::new(),
    }
}

fn parse_monitor(kind: MonitorKind, v: &Value) -> Monitor {
    Monitor {
        name: s(v, "name"),
        kind,
        interval: u(v, "interval") as u32,
        timeout: u(v, "timeout") as u32,
        send: v["send"].as_str().map(str::to_string),
        recv: v["recv"].as_str().map(str::to_string),
    }
}

#[async_trait]
impl ApplianceDriver for RestDriver {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> DriverResult<()> {
        self.get("/mgmt/tm/sys/clock").await.map(|_| ())
    }

    async fn system_info(&self) -> DriverResult<SystemInfo> {
        let version = self.get("/mgmt/tm/sys/version").await?;
        let hardware = self.get("/mgmt/tm/sys/hardware").await?;
        let settings = self.get("/mgmt/tm/sys/global-settings").await?;
        let provision = self.items("/mgmt/tm/sys/provision").await?;
        let extramb = self.get("/mgmt/tm/sys/db/provision.extramb").await?;
        let failover = self.get("/mgmt/tm/sys/db/failover.isredundant").await?;
        Ok(SystemInfo {
            device_name: s(&settings, "hostname"),
            version: stat_str(&version, "Version"),
            platform: stat_str(&hardware, "marketingName"),
            serial_number: stat_str(&hardware, "bigipChassisSerialNum"),
            provisioned: provision
                .iter()
                .filter(|p| p["level"].as_str().is_some_and(|l| l != "none"))
                .map(|p| s(p, "name"))
                .collect(),
            provision_extramb: s(&extramb, "value").parse().unwrap_or_default(),
            ha_enabled: s(&failover, "value") == "true",
        })
    }

    async fn set_tunnel_sync(&self, enabled: bool) -> DriverResult<()> {
        let value = if enabled { "enable" } else { "disable" };
        self.patch(
            "/mgmt/tm/sys/db/iptunnel.configsync",
            json!({ "value": value }),
        )
        .await
    }

    async fn capacity_metrics(&self) -> DriverResult<CapacityMetrics> {
        let throughput = self.get("/mgmt/tm/sys/performance/throughput/stats").await?;
        let connections = self.get("/mgmt/tm/sys/performance/connections/stats").await?;
        let folders = self.items("/mgmt/tm/sys/folder").await?;
        Ok(CapacityMetrics {
            throughput: stat_u64(&throughput, "Average"),
            active_connections: stat_u64(&connections, "Current"),
            ssl_tps: 0,
            node_count: self.items("/mgmt/tm/ltm/node").await?.len() as u64,
            ssl_profiles: self.items("/mgmt/tm/ltm/profile/client-ssl").await?.len() as u64,
            tenants: folders
                .iter()
                .filter(|f| !matches!(f["name"].as_str(), Some("/" | "Common")))
                .count() as u64,
            tunnels: self.items("/mgmt/tm/net/tunnels/tunnel").await?.len() as u64,
            vlans: self.items("/mgmt/tm/net/vlan").await?.len() as u64,
            route_domains: self.route_domains().await?.len() as u64,
        })
    }

    // ── Cluster & trust ──────────────────────────────────────────

    async fn failover_device_group(&self) -> DriverResult<Option<String>> {
        let groups = self.items("/mgmt/tm/cm/device-group").await?;
        Ok(groups
            .iter()
            .find(|g| g["type"].as_str() == Some("sync-failover"))
            .map(|g| s(g, "name")))
    }

    async fn device_group_members(&self, group: &str) -> DriverResult<Vec<DeviceInfo>> {
        let members = self
            .items(&format!("/mgmt/tm/cm/device-group/~Common~{group}/devices"))
            .await?;
        let devices = self.items("/mgmt/tm/cm/device").await?;
        Ok(members
            .iter()
            .map(|m| {
                let name = s(m, "name");
                let management_address = devices
                    .iter()
                    .find(|d| s(d, "name") == name)
                    .map(|d| s(d, "managementIp"))
                    .unwrap_or_default();
                DeviceInfo {
                    name,
                    management_address,
                }
            })
            .collect())
    }

    async fn traffic_groups(&self) -> DriverResult<Vec<String>> {
        Ok(names(&self.items("/mgmt/tm/cm/traffic-group").await?))
    }

    async fn sync_status(&self) -> DriverResult<SyncStatus> {
        let v = self.get("/mgmt/tm/cm/sync-status").await?;
        Ok(match stat_str(&v, "status").as_str() {
            "In Sync" => SyncStatus::InSync,
            "Changes Pending" => SyncStatus::ChangesPending,
            "Disconnected" => SyncStatus::Disconnected,
            "Standalone" => SyncStatus::Standalone,
            other => SyncStatus::Unknown(other.to_string()),
        })
    }

    async fn sync_to_group(&self, group: &str) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/cm",
            json!({ "command": "run", "utilCmdArgs": format!("config-sync to-group {group}") }),
        )
        .await
    }

    async fn save_config(&self) -> DriverResult<()> {
        self.post("/mgmt/tm/sys/config", json!({ "command": "save" }))
            .await
    }

    async fn set_autosync(&self, group: &str, enabled: bool) -> DriverResult<()> {
        let value = if enabled { "enabled" } else { "disabled" };
        self.patch(
            &format!("/mgmt/tm/cm/device-group/~Common~{group}"),
            json!({ "autoSync": value }),
        )
        .await
    }

    async fn add_authority_device(
        &self,
        address: &str,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/cm/add-to-trust",
            json!({
                "command": "run",
                "name": "Root",
                "caDevice": true,
                "device": address,
                "deviceName": device_name,
                "username": username,
                "password": password,
            }),
        )
        .await
    }

    async fn remove_device(&self, device_name: &str) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/cm/remove-from-trust",
            json!({ "command": "run", "name": "Root", "deviceName": device_name }),
        )
        .await
    }

    async fn reset_trust(&self, device_name: &str) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/cm/trust-domain",
            json!({ "command": "reset-to", "name": "Root", "deviceName": device_name }),
        )
        .await
    }

    // ── Folders & route domains ──────────────────────────────────

    async fn folder_exists(&self, folder: &str) -> DriverResult<bool> {
        Ok(self
            .get_opt(&format!("/mgmt/tm/sys/folder/~{folder}"))
            .await?
            .is_some())
    }

    async fn create_folder(&self, folder: &str) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/sys/folder",
            json!({ "name": folder, "subPath": "/", "fullPath": format!("/{folder}") }),
        )
        .await
    }

    async fn delete_folder(&self, folder: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/sys/folder/~{folder}")).await
    }

    async fn route_domain_ids(&self) -> DriverResult<Vec<u16>> {
        self.route_domains().await?.iter().map(route_domain_id).collect()
    }

    async fn get_route_domain(&self, folder: &str) -> DriverResult<Option<u16>> {
        self.route_domains()
            .await?
            .iter()
            .find(|rd| s(rd, "partition") == folder)
            .map(route_domain_id)
            .transpose()
    }

    async fn create_route_domain(&self, folder: &str, id: u16) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/net/route-domain",
            json!({ "name": folder, "partition": folder, "id": id, "strict": "enabled" }),
        )
        .await
    }

    async fn delete_route_domain(&self, folder: &str) -> DriverResult<()> {
        let name = self
            .route_domains()
            .await?
            .iter()
            .find(|rd| s(rd, "partition") == folder)
            .map(|rd| s(rd, "name"))
            .ok_or_else(|| DriverError::NotFound(format!("route domain for /{folder}")))?;
        self.delete(&format!("/mgmt/tm/net/route-domain/{}", obj(folder, &name)))
            .await
    }

    // ── L2 ───────────────────────────────────────────────────────

    async fn get_vlan(&self, folder: &str, name: &str) -> DriverResult<Option<Vlan>> {
        let Some(v) = self
            .get_opt(&format!("/mgmt/tm/net/vlan/{}?expandSubcollections=true", obj(folder, name)))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(Vlan {
            name: s(&v, "name"),
            tag: u(&v, "tag") as u32,
            interface: v["interfacesReference"]["items"][0]["name"]
                .as_str()
                .map(str::to_string),
            description: s(&v, "description"),
        }))
    }

    async fn create_vlan(&self, folder: &str, vlan: &Vlan) -> DriverResult<()> {
        let mut body = json!({
            "name": vlan.name,
            "partition": folder,
            "description": vlan.description,
        });
        if vlan.tag > 0 {
            body["tag"] = json!(vlan.tag);
        }
        if let Some(interface) = &vlan.interface {
            body["interfaces"] = json!([{ "name": interface, "tagged": vlan.tag > 0 }]);
        }
        self.post("/mgmt/tm/net/vlan", body).await
    }

    async fn delete_vlan(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/net/vlan/{}", obj(folder, name)))
            .await
    }

    async fn get_tunnel(&self, folder: &str, name: &str) -> DriverResult<Option<Tunnel>> {
        let Some(v) = self
            .get_opt(&format!("/mgmt/tm/net/tunnels/tunnel/{}", obj(folder, name)))
            .await?
        else {
            return Ok(None);
        };
        let profile = if s(&v, "profile").ends_with("gre") {
            TunnelProfile::Gre
        } else {
            TunnelProfile::Vxlan
        };
        Ok(Some(Tunnel {
            name: s(&v, "name"),
            profile,
            key: u(&v, "key") as u32,
            local_address: s(&v, "localAddress"),
            description: s(&v, "description"),
        }))
    }

    async fn create_tunnel(&self, folder: &str, tunnel: &Tunnel) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/net/tunnels/tunnel",
            json!({
                "name": tunnel.name,
                "partition": folder,
                "profile": format!("/Common/{}", tunnel.profile.as_str()),
                "key": tunnel.key,
                "localAddress": tunnel.local_address,
                "description": tunnel.description,
            }),
        )
        .await
    }

    async fn delete_tunnel(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/net/tunnels/tunnel/{}", obj(folder, name)))
            .await
    }

    async fn fdb_entries(&self, folder: &str, tunnel: &str) -> DriverResult<Vec<FdbRecord>> {
        let v = self
            .get(&format!("/mgmt/tm/net/fdb/tunnel/{}", obj(folder, tunnel)))
            .await?;
        Ok(v["records"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .map(|r| FdbRecord {
                        mac: s(r, "name"),
                        endpoint: s(r, "endpoint"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        let mut current = self.fdb_entries(folder, tunnel).await?;
        for r in records {
            if !current.contains(r) {
                current.push(r.clone());
            }
        }
        self.put_fdb(folder, tunnel, &current).await
    }

    async fn remove_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        let mut current = self.fdb_entries(folder, tunnel).await?;
        current.retain(|r| !records.contains(r));
        self.put_fdb(folder, tunnel, &current).await
    }

    // ── L3 ───────────────────────────────────────────────────────

    async fn get_self_ip(&self, folder: &str, name: &str) -> DriverResult<Option<SelfIp>> {
        let Some(v) = self
            .get_opt(&format!("/mgmt/tm/net/self/{}", obj(folder, name)))
            .await?
        else {
            return Ok(None);
        };
        let cidr = s(&v, "address");
        let (address, prefix) = cidr.split_once('/').unwrap_or((cidr.as_str(), "32"));
        Ok(Some(SelfIp {
            name: s(&v, "name"),
            address: address.to_string(),
            prefix_len: prefix.parse().unwrap_or(32),
            vlan: s(&v, "vlan"),
            floating: s(&v, "floating") == "enabled",
            traffic_group: leaf(&s(&v, "trafficGroup")),
        }))
    }

    async fn create_self_ip(&self, folder: &str, self_ip: &SelfIp) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/net/self",
            json!({
                "name": self_ip.name,
                "partition": folder,
                "address": format!("{}/{}", self_ip.address, self_ip.prefix_len),
                "vlan": self_ip.vlan,
                "floating": if self_ip.floating { "enabled" } else { "disabled" },
                "trafficGroup": format!("/Common/{}", self_ip.traffic_group),
            }),
        )
        .await
    }

    async fn delete_self_ip(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/net/self/{}", obj(folder, name)))
            .await
    }

    async fn get_snat_translation(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<SnatTranslation>> {
        Ok(self
            .get_opt(&format!("/mgmt/tm/ltm/snat-translation/{}", obj(folder, name)))
            .await?
            .map(|v| SnatTranslation {
                name: s(&v, "name"),
                address: s(&v, "address"),
                traffic_group: leaf(&s(&v, "trafficGroup")),
            }))
    }

    async fn create_snat_translation(
        &self,
        folder: &str,
        translation: &SnatTranslation,
    ) -> DriverResult<()> {
        self.post(
            "/mgmt/tm/ltm/snat-translation",
            json!({
                "name": translation.name,
                "partition": folder,
                "address": translation.address,
                "trafficGroup": format!("/Common/{}", translation.traffic_group),
            }),
        )
        .await
    }

    async fn delete_snat_translation(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/ltm/snat-translation/{}", obj(folder, name)))
            .await
    }

    async fn snat_pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<String>> {
        Ok(self
            .get_opt(&format!("/mgmt/tm/ltm/snatpool/{}", obj(folder, pool)))
            .await?
            .and_then(|v| v["members"].as_array().cloned())
            .map(|m| m.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn set_snat_pool_members(
        &self,
        folder: &str,
        pool: &str,
        members: &[String],
    ) -> DriverResult<()> {
        self.upsert(
            "/mgmt/tm/ltm/snatpool",
            folder,
            pool,
            json!({ "name": pool, "partition": folder, "members": members }),
        )
        .await
    }

    async fn delete_snat_pool(&self, folder: &str, pool: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/ltm/snatpool/{}", obj(folder, pool)))
            .await
    }

    async fn virtual_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        let items = self
            .folder_items("/mgmt/tm/ltm/virtual-address", folder)
            .await?;
        Ok(items.iter().map(|i| s(i, "address")).collect())
    }

    async fn node_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        let items = self.folder_items("/mgmt/tm/ltm/node", folder).await?;
        Ok(items.iter().map(|i| s(i, "address")).collect())
    }

    // ── Pools & members ──────────────────────────────────────────

    async fn get_pool(&self, folder: &str, name: &str) -> DriverResult<Option<AppliancePool>> {
        Ok(self
            .get_opt(&format!("/mgmt/tm/ltm/pool/{}", obj(folder, name)))
            .await?
            .map(|v| AppliancePool {
                name: s(&v, "name"),
                description: s(&v, "description"),
                lb_method: ApplianceLbMethod::parse(&s(&v, "loadBalancingMode"))
                    .unwrap_or(ApplianceLbMethod::RoundRobin),
                monitors: s(&v, "monitor")
                    .split(" and ")
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(leaf)
                    .collect(),
            }))
    }

    async fn create_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        self.post("/mgmt/tm/ltm/pool", pool_body(folder, pool)).await
    }

    async fn update_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        self.patch(
            &format!("/mgmt/tm/ltm/pool/{}", obj(folder, &pool.name)),
            pool_body(folder, pool),
        )
        .await
    }

    async fn delete_pool(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/ltm/pool/{}", obj(folder, name)))
            .await
    }

    async fn list_pools(&self, folder: &str) -> DriverResult<Vec<String>> {
        Ok(names(&self.folder_items("/mgmt/tm/ltm/pool", folder).await?))
    }

    async fn pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<PoolMember>> {
        let items = self
            .items(&format!("/mgmt/tm/ltm/pool/{}/members", obj(folder, pool)))
            .await?;
        Ok(items
            .iter()
            .map(|m| {
                let name = s(m, "name");
                let (address, port) = name.rsplit_once(':').unwrap_or((name.as_str(), "0"));
                PoolMember {
                    address: address.to_string(),
                    port: port.parse().unwrap_or_default(),
                    ratio: u(m, "ratio") as u32,
                    enabled: s(m, "session") != "user-disabled",
                }
            })
            .collect())
    }

    async fn add_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        self.post(
            &format!("/mgmt/tm/ltm/pool/{}/members", obj(folder, pool)),
            member_body(folder, member),
        )
        .await
    }

    async fn update_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        self.patch(
            &format!(
                "/mgmt/tm/ltm/pool/{}/members/{}",
                obj(folder, pool),
                obj(folder, &member.name())
            ),
            member_body(folder, member),
        )
        .await
    }

    async fn remove_pool_member(
        &self,
        folder: &str,
        pool: &str,
        address: &str,
        port: u16,
    ) -> DriverResult<()> {
        self.delete(&format!(
            "/mgmt/tm/ltm/pool/{}/members/{}",
            obj(folder, pool),
            obj(folder, &format!("{address}:{port}"))
        ))
        .await?;
        // The node outlives its members and keeps the address in use until
        // deleted. Another pool may still reference it.
        match self
            .delete(&format!("/mgmt/tm/ltm/node/{}", obj(folder, address)))
            .await
        {
            Err(e) if e.is_not_found() || e.is_in_use() => Ok(()),
            other => other,
        }
    }

    async fn pool_stats(&self, folder: &str, pool: &str) -> DriverResult<AppliancePoolStats> {
        let v = self
            .get(&format!("/mgmt/tm/ltm/pool/{}/stats", obj(folder, pool)))
            .await?;
        let members = self
            .items(&format!("/mgmt/tm/ltm/pool/{}/members", obj(folder, pool)))
            .await?;
        Ok(AppliancePoolStats {
            bytes_in: stat_u64(&v, "serverside.bitsIn") / 8,
            bytes_out: stat_u64(&v, "serverside.bitsOut") / 8,
            active_connections: stat_u64(&v, "serverside.curConns"),
            total_connections: stat_u64(&v, "serverside.totConns"),
            member_up: members
                .iter()
                .map(|m| (s(m, "name"), s(m, "state") == "up"))
                .collect(),
        })
    }

    // ── Monitors ─────────────────────────────────────────────────

    async fn get_monitor(&self, folder: &str, name: &str) -> DriverResult<Option<Monitor>> {
        for kind in MONITOR_KINDS {
            let path = format!("{}/{}", monitor_path(kind), obj(folder, name));
            if let Some(v) = self.get_opt(&path).await? {
                return Ok(Some(parse_monitor(kind, &v)));
            }
        }
        Ok(None)
    }

    async fn create_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        self.post(&monitor_path(monitor.kind), monitor_body(folder, monitor))
            .await
    }

    async fn update_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        self.patch(
            &format!("{}/{}", monitor_path(monitor.kind), obj(folder, &monitor.name)),
            monitor_body(folder, monitor),
        )
        .await
    }

    async fn delete_monitor(&self, folder: &str, name: &str) -> DriverResult<()> {
        let Some(monitor) = self.get_monitor(folder, name).await? else {
            return Err(DriverError::NotFound(format!("monitor /{folder}/{name}")));
        };
        self.delete(&format!("{}/{}", monitor_path(monitor.kind), obj(folder, name)))
            .await
    }

    async fn list_monitors(&self, folder: &str) -> DriverResult<Vec<String>> {
        let mut out = Vec::new();
        for kind in MONITOR_KINDS {
            out.extend(names(&self.folder_items(&monitor_path(kind), folder).await?));
        }
        Ok(out)
    }

    async fn set_pool_monitors(
        &self,
        folder: &str,
        pool: &str,
        monitors: &[String],
    ) -> DriverResult<()> {
        let monitor = monitors
            .iter()
            .map(|m| format!("/{folder}/{m}"))
            .collect::<Vec<_>>()
            .join(" and ");
        self.patch(
            &format!("/mgmt/tm/ltm/pool/{}", obj(folder, pool)),
            json!({ "monitor": monitor }),
        )
        .await
    }

    // ── Virtual servers ──────────────────────────────────────────

    async fn get_virtual_server(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<VirtualServer>> {
        let path = format!("/mgmt/tm/ltm/virtual/{}?expandSubcollections=true", obj(folder, name));
        let Some(v) = self.get_opt(&path).await? else {
            return Ok(None);
        };
        let mut vs = parse_virtual(&v);
        let address = self
            .get_opt(&format!(
                "/mgmt/tm/ltm/virtual-address/{}",
                obj(folder, &vs.destination)
            ))
            .await?;
        if let Some(address) = address {
            vs.traffic_group = leaf(&s(&address, "trafficGroup"));
        }
        Ok(Some(vs))
    }

    async fn create_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        self.post("/mgmt/tm/ltm/virtual", virtual_body(folder, vs))
            .await?;
        self.set_address_traffic_group(folder, vs).await
    }

    async fn update_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        self.put(
            &format!("/mgmt/tm/ltm/virtual/{}", obj(folder, &vs.name)),
            virtual_body(folder, vs),
        )
        .await?;
        self.set_address_traffic_group(folder, vs).await
    }

    async fn delete_virtual_server(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/ltm/virtual/{}", obj(folder, name)))
            .await
    }

    async fn list_virtual_servers(&self, folder: &str) -> DriverResult<Vec<String>> {
        Ok(names(&self.folder_items("/mgmt/tm/ltm/virtual", folder).await?))
    }

    async fn put_rule(&self, folder: &str, rule: &IRule) -> DriverResult<()> {
        self.upsert(
            "/mgmt/tm/ltm/rule",
            folder,
            &rule.name,
            json!({ "name": rule.name, "partition": folder, "apiAnonymous": rule.body }),
        )
        .await
    }

    async fn delete_rule(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!("/mgmt/tm/ltm/rule/{}", obj(folder, name)))
            .await
    }

    async fn put_persistence_profile(
        &self,
        folder: &str,
        profile: &UniversalPersistence,
    ) -> DriverResult<()> {
        self.upsert(
            "/mgmt/tm/ltm/persistence/universal",
            folder,
            &profile.name,
            json!({
                "name": profile.name,
                "partition": folder,
                "rule": format!("/{folder}/{}", profile.rule),
                "timeout": profile.timeout_secs.to_string(),
            }),
        )
        .await
    }

    async fn delete_persistence_profile(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.delete(&format!(
            "/mgmt/tm/ltm/persistence/universal/{}",
            obj(folder, name)
        ))
        .await
    }
}

impl RestDriver {
    async fn put_fdb(&self, folder: &str, tunnel: &str, records: &[FdbRecord]) -> DriverResult<()> {
        let records: Vec<Value> = records
            .iter()
            .map(|r| json!({ "name": r.mac, "endpoint": r.endpoint }))
            .collect();
        self.patch(
            &format!("/mgmt/tm/net/fdb/tunnel/{}", obj(folder, tunnel)),
            json!({ "records": records }),
        )
        .await
    }

    async fn set_address_traffic_group(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        if vs.traffic_group.is_empty() {
            return Ok(());
        }
        self.patch(
            &format!("/mgmt/tm/ltm/virtual-address/{}", obj(folder, &vs.destination)),
            json!({ "trafficGroup": format!("/Common/{}", vs.traffic_group) }),
        )
        .await
    }
}
