//! Applies Service and Endpoints watch events to the [`Registry`].
//!
//! Events carry full objects, so every handler recomputes the desired state
//! from the object alone and compares it with what is installed. Duplicated
//! or reordered events therefore converge on the same registry contents.

use crate::annotations::{self, service_key};
use crate::forward::ProxyHandlerFactory;
use crate::metrics_defs::{ROUTES_CONFLICTS, WATCH_EVENTS};
use crate::registry::{Installed, PodEndpoint, Registry, RouteSpec, ServiceRoute};
use crate::watch::ResourceEvent;
use crate::STATUS_PATH_PREFIX;
use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints, Service};
use shared::counter;
use std::sync::Arc;

/// Route for a service, or None if it is not routable.
pub fn route_spec(service: &Service) -> Option<RouteSpec> {
    let meta = &service.metadata;
    let path = annotations::get(meta, annotations::PATH)?;

    if path.is_empty() {
        tracing::warn!(service = %service_key(meta), "ignoring empty path annotation");
        return None;
    }

    if path.starts_with(STATUS_PATH_PREFIX) {
        tracing::warn!(
            service = %service_key(meta),
            path,
            "path annotation collides with the gateway's status pages"
        );
        return None;
    }

    Some(RouteSpec {
        path: path.to_string(),
        port: annotations::service_port(service),
        map_prefix: annotations::get(meta, annotations::MAP)
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string),
        description: annotations::get(meta, annotations::DESCRIPTION)
            .unwrap_or_default()
            .to_string(),
    })
}

fn pod_endpoint(address: &EndpointAddress) -> PodEndpoint {
    let pod_name = address
        .target_ref
        .as_ref()
        .filter(|target| target.kind.as_deref() == Some("Pod"))
        .and_then(|target| target.name.clone())
        .unwrap_or_default();
    PodEndpoint::new(pod_name, address.ip.clone())
}

/// Ready and not-ready addresses of every subset.
pub fn pod_endpoints(endpoints: &Endpoints) -> Vec<PodEndpoint> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| {
            let ready = subset.addresses.iter().flatten();
            let not_ready = subset.not_ready_addresses.iter().flatten();
            ready.chain(not_ready)
        })
        .map(pod_endpoint)
        .collect()
}

/// The only writer of the registry.
pub struct Reconciler {
    registry: Arc<Registry>,
    handlers: ProxyHandlerFactory,
}

impl Reconciler {
    pub fn new(registry: Arc<Registry>, handlers: ProxyHandlerFactory) -> Self {
        Reconciler { registry, handlers }
    }

    pub fn apply_service_event(&self, event: &ResourceEvent<Service>) {
        counter!(WATCH_EVENTS).increment(1);
        match event {
            ResourceEvent::Added(service) => {
                self.service_added(service);
                self.endpoint_port_added(service);
            }
            ResourceEvent::Modified(service) => {
                self.service_changed(service);
                self.endpoint_port_updated(service);
            }
            ResourceEvent::Deleted(service) => {
                self.service_deleted(service);
                self.endpoint_port_deleted(service);
            }
        }
    }

    pub fn apply_endpoints_event(&self, event: &ResourceEvent<Endpoints>) {
        counter!(WATCH_EVENTS).increment(1);
        match event {
            ResourceEvent::Added(endpoints) | ResourceEvent::Modified(endpoints) => {
                self.registry
                    .replace_pods(&service_key(&endpoints.metadata), pod_endpoints(endpoints));
            }
            ResourceEvent::Deleted(endpoints) => {
                self.registry
                    .replace_pods(&service_key(&endpoints.metadata), Vec::new());
            }
        }
    }

    fn service_added(&self, service: &Service) {
        let Some(spec) = route_spec(service) else {
            return;
        };
        let service_id = service_key(&service.metadata);
        tracing::info!(service = %service_id, path = %spec.path, "service added");

        if self.registry.route_spec(&service_id).as_ref() == Some(&spec) {
            tracing::debug!(service = %service_id, "duplicate add event");
            return;
        }
        self.install(service, &service_id, spec);
    }

    fn service_changed(&self, service: &Service) {
        let service_id = service_key(&service.metadata);
        let previous = self.registry.route_spec(&service_id);

        match (previous, route_spec(service)) {
            (Some(previous), Some(spec)) => {
                if previous == spec {
                    return;
                }
                tracing::info!(
                    service = %service_id,
                    from = %previous.path,
                    to = %spec.path,
                    "service changed"
                );
                self.install(service, &service_id, spec);
            }
            (None, Some(_)) => self.service_added(service),
            (Some(_), None) => self.service_deleted(service),
            (None, None) => {}
        }
    }

    fn service_deleted(&self, service: &Service) {
        let service_id = service_key(&service.metadata);
        if let Some(spec) = self.registry.remove_route(&service_id) {
            tracing::info!(service = %service_id, path = %spec.path, "service deleted");
        }
    }

    fn install(&self, service: &Service, service_id: &str, spec: RouteSpec) {
        let meta = &service.metadata;
        let handler = match self.handlers.build(
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
            &spec,
        ) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::warn!(service = %service_id, error = %err, "could not build route handler");
                return;
            }
        };

        let path = spec.path.clone();
        if self.registry.install_route(service_id, ServiceRoute { spec, handler })
            == Installed::Conflict
        {
            tracing::warn!(
                service = %service_id,
                path = %path,
                annotation = annotations::PATH,
                "duplicate path annotation, earlier service keeps serving it"
            );
            counter!(ROUTES_CONFLICTS).increment(1);
        }
    }

    fn endpoint_port_added(&self, service: &Service) {
        let port = annotations::endpoint_port(&service.metadata);
        if port > 0 {
            self.registry
                .set_endpoint_port(&service_key(&service.metadata), port);
        }
    }

    fn endpoint_port_updated(&self, service: &Service) {
        match annotations::endpoint_port(&service.metadata) {
            0 => self.endpoint_port_deleted(service),
            port => self
                .registry
                .set_endpoint_port(&service_key(&service.metadata), port),
        }
    }

    fn endpoint_port_deleted(&self, service: &Service) {
        self.registry
            .disable_endpoint_port(&service_key(&service.metadata));
    }
}
