//! Service annotations that drive routing.

use k8s_openapi::api::core::v1::Service;
use kube::api::ObjectMeta;

pub const PATH: &str = "k8s-svc-proxy.local/path";
pub const PORT: &str = "k8s-svc-proxy.local/port";
pub const MAP: &str = "k8s-svc-proxy.local/map";
pub const DESCRIPTION: &str = "k8s-svc-proxy.local/description";
pub const ENDPOINT_PORT: &str = "k8s-svc-proxy.local/endpoint-port";

/// Registry key shared by a Service and its Endpoints: `namespace/name`.
pub fn service_key(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

pub fn get<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Backend port for a service route.
///
/// An explicit `port` annotation wins when it parses. Otherwise a service
/// exposing exactly one port other than 80 is addressed on that port, and
/// everything else falls back to the bare service name.
pub fn service_port(service: &Service) -> Option<u16> {
    if let Some(raw) = get(&service.metadata, PORT) {
        match raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => return Some(port),
            _ => tracing::warn!(
                service = %service_key(&service.metadata),
                value = raw,
                "ignoring malformed port annotation"
            ),
        }
    }

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default();

    match ports {
        [only] if only.port != 80 => u16::try_from(only.port).ok().filter(|port| *port > 0),
        _ => None,
    }
}

/// Port for per-pod routing, or 0 when the annotation is absent or unusable.
pub fn endpoint_port(meta: &ObjectMeta) -> u16 {
    get(meta, ENDPOINT_PORT)
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .unwrap_or(0)
}
