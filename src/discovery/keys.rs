//! Key schema: `/services/{service}/{address}` → `address`.

/// Root under which every service registers.
pub const SERVICES_ROOT: &str = "/services";

/// Prefix covering every instance of `service`, with trailing slash.
pub fn service_prefix(service: &str) -> String {
    format!("{SERVICES_ROOT}/{service}/")
}

/// Key for one instance of `service`.
pub fn instance_key(service: &str, address: &str) -> String {
    format!("{SERVICES_ROOT}/{service}/{address}")
}

/// Last path segment of a key; deletions carry no value, so this is the
/// only way to recover the address of a removed instance.
pub fn address_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|segment| !segment.is_empty())
}
