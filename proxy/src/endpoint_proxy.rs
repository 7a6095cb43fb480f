//! Per-pod routing: `/endpoint/<namespace>/<service>/<index>/<path>` reaches
//! pod `<index>` of the service on its endpoint port, with the first four
//! segments removed from the forwarded path.

use crate::errors::{PodRouteError, ProxyError};
use crate::forward::{ForwardingHandler, HttpClient, PathRewrite, pod_url};
use crate::handler::Handler;
use crate::registry::Registry;
use std::sync::Arc;

/// Segments consumed by the pod address, including the `endpoint` marker.
const POD_ROUTE_SEGMENTS: usize = 4;

#[derive(Debug, PartialEq)]
pub struct PodRoute {
    pub service_id: String,
    pub index: usize,
}

pub fn parse_pod_route(path: &str) -> Result<PodRoute, PodRouteError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let parts: Vec<&str> = trimmed.splitn(POD_ROUTE_SEGMENTS + 1, '/').collect();
    let [_, namespace, service, index, _rest] = parts.as_slice() else {
        return Err(PodRouteError::Malformed);
    };

    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PodRouteError::InvalidIndex(index.to_string()));
    }
    let index = index
        .parse::<usize>()
        .map_err(|_| PodRouteError::InvalidIndex(index.to_string()))?;

    Ok(PodRoute {
        service_id: format!("{namespace}/{service}"),
        index,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Route(#[from] PodRouteError),
    #[error(transparent)]
    Build(#[from] ProxyError),
}

#[derive(Clone)]
pub struct EndpointProxyFactory {
    client: HttpClient,
}

impl EndpointProxyFactory {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Finds the handler for a per-pod request path, building and caching it
    /// on the pod entry the first time that pod is addressed.
    pub fn resolve(&self, registry: &Registry, path: &str) -> Result<Arc<dyn Handler>, ResolveError> {
        let route = parse_pod_route(path)?;
        let (pod, port) = registry.pod(&route.service_id, route.index)?;

        let handler = pod.handler_or_build(|| {
            tracing::debug!(
                service = %route.service_id,
                pod = %pod.pod_name,
                ip = %pod.ip,
                port,
                "building pod handler"
            );
            let target = pod_url(&pod.ip, port)?;
            let handler = ForwardingHandler::new(
                self.client.clone(),
                &target,
                PathRewrite::StripSegments(POD_ROUTE_SEGMENTS),
            )?;
            Ok::<Arc<dyn Handler>, ProxyError>(Arc::new(handler))
        })?;

        Ok(handler)
    }
}
