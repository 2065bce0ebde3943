//! Appliance object naming.
//!
//! Every agent-managed object is named `<environment_prefix>_<uuid>`.
//! Tenant folders are `<environment_prefix>_<tenant_id>`; shared objects
//! live in `Common` and keep their names unprefixed. Addresses carry the
//! route domain as `x.x.x.x%rd`.

/// The appliance-wide shared folder.
pub const COMMON_FOLDER: &str = "Common";

/// Traffic group that never floats; excluded from placement.
pub const LOCAL_ONLY_TRAFFIC_GROUP: &str = "traffic-group-local-only";

/// Name of a tenant's folder.
pub fn folder_name(prefix: &str, tenant_id: &str) -> String {
    format!("{prefix}_{tenant_id}")
}

/// Name of an agent-managed object.
pub fn object_name(prefix: &str, id: &str) -> String {
    format!("{prefix}_{id}")
}

/// Strip the environment prefix from a managed object name.
pub fn strip_prefix<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(prefix)?.strip_prefix('_')
}

/// Decorate an address with its route domain (`%0` is omitted).
pub fn with_route_domain(address: &str, route_domain: u16) -> String {
    let bare = strip_route_domain(address);
    if route_domain == 0 {
        bare.to_string()
    } else {
        format!("{bare}%{route_domain}")
    }
}

/// Drop any `%rd` suffix from an address.
pub fn strip_route_domain(address: &str) -> &str {
    address.split('%').next().unwrap_or(address)
}

/// Full path of an object inside a folder, `/<folder>/<name>`.
pub fn full_path(folder: &str, name: &str) -> String {
    format!("/{folder}/{name}")
}
