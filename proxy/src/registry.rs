//! Routing state shared between the watch loop and request dispatch.
//!
//! Three tables live behind one lock so that multi-table updates are atomic:
//! path → handlers, service id → route, and service id → endpoint set. Every
//! method takes the lock, touches only in-memory state, and returns owned
//! values (mostly `Arc` clones) so no caller forwards a request while holding
//! it.

use crate::errors::PodRouteError;
use crate::handler::Handler;
use crate::metrics_defs::ROUTES_ACTIVE;
use parking_lot::RwLock;
use serde::Serialize;
use shared::gauge;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// Route fields derived from a service's annotations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteSpec {
    pub path: String,
    /// None targets the service name without an explicit port.
    pub port: Option<u16>,
    #[serde(rename = "Map")]
    pub map_prefix: Option<String>,
    pub description: String,
}

pub struct ServiceRoute {
    pub spec: RouteSpec,
    pub handler: Arc<dyn Handler>,
}

pub struct PodEndpoint {
    pub pod_name: String,
    pub ip: String,
    handler: OnceLock<Arc<dyn Handler>>,
}

impl PodEndpoint {
    pub fn new(pod_name: impl Into<String>, ip: impl Into<String>) -> Self {
        PodEndpoint {
            pod_name: pod_name.into(),
            ip: ip.into(),
            handler: OnceLock::new(),
        }
    }

    /// Returns the cached handler, building it on first use.
    pub fn handler_or_build<E>(
        &self,
        build: impl FnOnce() -> Result<Arc<dyn Handler>, E>,
    ) -> Result<Arc<dyn Handler>, E> {
        if let Some(handler) = self.handler.get() {
            return Ok(handler.clone());
        }
        let built = build()?;
        // A concurrent builder may have won; either handler is equivalent.
        Ok(self.handler.get_or_init(|| built).clone())
    }

    fn fresh(&self) -> Arc<PodEndpoint> {
        Arc::new(PodEndpoint::new(self.pod_name.clone(), self.ip.clone()))
    }
}

#[derive(Default)]
struct EndpointSet {
    /// 0 disables per-pod routing.
    port: u16,
    pods: Vec<Arc<PodEndpoint>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackendStatus {
    pub pod_name: String,
    #[serde(rename = "IP")]
    pub ip: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointStatus {
    pub name: String,
    pub port: u16,
    pub backends: Vec<BackendStatus>,
}

/// What the install of a route did to the path table.
#[derive(Debug, PartialEq, Eq)]
pub enum Installed {
    /// The path had no other handler.
    Unique,
    /// The path was already claimed; the new handler was appended behind
    /// the existing ones.
    Conflict,
}

#[derive(Default)]
struct RegistryState {
    routes: HashMap<String, Vec<Arc<dyn Handler>>>,
    services: HashMap<String, ServiceRoute>,
    endpoints: HashMap<String, EndpointSet>,
}

impl RegistryState {
    fn unregister(&mut self, path: &str, handler: &Arc<dyn Handler>) {
        let Some(handlers) = self.routes.get_mut(path) else {
            return;
        };
        if let Some(pos) = handlers.iter().position(|h| same_handler(h, handler)) {
            handlers.remove(pos);
        }
        if handlers.is_empty() {
            self.routes.remove(path);
        }
    }

    fn publish_route_count(&self) {
        gauge!(ROUTES_ACTIVE).set(self.routes.len() as f64);
    }
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// How well a registered path serves `request_path`, higher is better.
///
/// A path ending in `/` also serves the same path without the trailing slash,
/// ranked as the stripped key so that a real prefix of equal length wins.
/// The empty path serves nothing.
fn match_rank(route_path: &str, request_path: &str) -> Option<(usize, bool)> {
    if route_path.is_empty() {
        return None;
    }
    if request_path.starts_with(route_path) {
        return Some((route_path.len(), true));
    }
    match route_path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() && stripped == request_path => {
            Some((stripped.len(), false))
        }
        _ => None,
    }
}

#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_spec(&self, service_id: &str) -> Option<RouteSpec> {
        self.state
            .read()
            .services
            .get(service_id)
            .map(|route| route.spec.clone())
    }

    /// Installs the route for `service_id`, replacing any previous one in the
    /// same critical section.
    pub fn install_route(&self, service_id: &str, route: ServiceRoute) -> Installed {
        let mut state = self.state.write();

        if let Some(previous) = state.services.remove(service_id) {
            state.unregister(&previous.spec.path, &previous.handler);
        }

        let handlers = state.routes.entry(route.spec.path.clone()).or_default();
        let installed = match handlers.is_empty() {
            true => Installed::Unique,
            false => Installed::Conflict,
        };
        handlers.push(route.handler.clone());
        state.services.insert(service_id.to_string(), route);
        state.publish_route_count();

        installed
    }

    pub fn remove_route(&self, service_id: &str) -> Option<RouteSpec> {
        let mut state = self.state.write();
        let route = state.services.remove(service_id)?;
        state.unregister(&route.spec.path, &route.handler);
        state.publish_route_count();
        Some(route.spec)
    }

    /// Longest registered path serving `request_path`. When several services
    /// claim that path, the first registrant answers.
    pub fn lookup(&self, request_path: &str) -> Option<Arc<dyn Handler>> {
        let state = self.state.read();
        state
            .routes
            .iter()
            .filter_map(|(path, handlers)| Some((match_rank(path, request_path)?, handlers)))
            .max_by_key(|(rank, _)| *rank)
            .and_then(|(_, handlers)| handlers.first().cloned())
    }

    /// Sets the per-pod routing port. A change of port drops cached pod
    /// handlers, since they target the old one.
    pub fn set_endpoint_port(&self, service_id: &str, port: u16) {
        let mut state = self.state.write();
        let set = state.endpoints.entry(service_id.to_string()).or_default();
        if set.port != port {
            set.port = port;
            set.pods = set.pods.iter().map(|pod| pod.fresh()).collect();
        }
    }

    /// Disables per-pod routing, keeping the pod list.
    pub fn disable_endpoint_port(&self, service_id: &str) {
        if let Some(set) = self.state.write().endpoints.get_mut(service_id) {
            set.port = 0;
        }
    }

    /// Replaces the pod list wholesale. Pods are ordered by name, which fixes
    /// the index used in `/endpoint/` URLs.
    pub fn replace_pods(&self, service_id: &str, mut pods: Vec<PodEndpoint>) {
        pods.sort_by(|a, b| a.pod_name.cmp(&b.pod_name));
        let pods = pods.into_iter().map(Arc::new).collect();

        let mut state = self.state.write();
        state.endpoints.entry(service_id.to_string()).or_default().pods = pods;
    }

    /// The pod at `index` of `service_id` and the port to reach it on.
    pub fn pod(
        &self,
        service_id: &str,
        index: usize,
    ) -> Result<(Arc<PodEndpoint>, u16), PodRouteError> {
        let state = self.state.read();
        let set = state
            .endpoints
            .get(service_id)
            .ok_or_else(|| PodRouteError::UnknownService(service_id.to_string()))?;
        if set.port == 0 {
            return Err(PodRouteError::Disabled(service_id.to_string()));
        }
        let pod = set
            .pods
            .get(index)
            .ok_or_else(|| PodRouteError::IndexOutOfRange {
                service: service_id.to_string(),
                index,
            })?;
        Ok((pod.clone(), set.port))
    }

    pub fn services_snapshot(&self) -> BTreeMap<String, RouteSpec> {
        self.state
            .read()
            .services
            .iter()
            .map(|(id, route)| (id.clone(), route.spec.clone()))
            .collect()
    }

    /// Services with per-pod routing enabled, ordered by id.
    pub fn endpoints_snapshot(&self) -> Vec<EndpointStatus> {
        let state = self.state.read();
        let mut status: Vec<EndpointStatus> = state
            .endpoints
            .iter()
            .filter(|(_, set)| set.port != 0)
            .map(|(id, set)| EndpointStatus {
                name: id.clone(),
                port: set.port,
                backends: set
                    .pods
                    .iter()
                    .map(|pod| BackendStatus {
                        pod_name: pod.pod_name.clone(),
                        ip: pod.ip.clone(),
                    })
                    .collect(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Registered paths with the number of handlers claiming each.
    #[cfg(test)]
    pub fn path_table(&self) -> BTreeMap<String, usize> {
        self.state
            .read()
            .routes
            .iter()
            .map(|(path, handlers)| (path.clone(), handlers.len()))
            .collect()
    }

    /// Checks that the path table and the service table describe the same
    /// set of handlers.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let state = self.state.read();
        let mut expected: HashMap<&str, usize> = HashMap::new();
        for route in state.services.values() {
            let handlers = state
                .routes
                .get(&route.spec.path)
                .unwrap_or_else(|| panic!("path {} not registered", route.spec.path));
            assert!(handlers.iter().any(|h| same_handler(h, &route.handler)));
            *expected.entry(route.spec.path.as_str()).or_default() += 1;
        }
        for (path, handlers) in &state.routes {
            assert!(!handlers.is_empty(), "empty handler list for {path}");
            assert_eq!(expected.get(path.as_str()), Some(&handlers.len()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NotFound;

    fn route(path: &str) -> ServiceRoute {
        ServiceRoute {
            spec: RouteSpec {
                path: path.into(),
                port: None,
                map_prefix: None,
                description: String::new(),
            },
            handler: Arc::new(NotFound),
        }
    }

    #[test]
    fn test_install_and_remove() {
        let registry = Registry::new();
        assert_eq!(registry.install_route("default/foo", route("/foo/")), Installed::Unique);
        assert_eq!(registry.install_route("default/bar", route("/bar/")), Installed::Unique);
        registry.assert_consistent();
        assert_eq!(registry.path_table().len(), 2);

        assert_eq!(registry.remove_route("default/foo").unwrap().path, "/foo/");
        assert!(registry.remove_route("default/foo").is_none());
        registry.assert_consistent();
        assert_eq!(
            registry.path_table().keys().collect::<Vec<_>>(),
            vec!["/bar/"]
        );
    }

    #[test]
    fn test_reinstall_moves_path() {
        let registry = Registry::new();
        registry.install_route("default/foo", route("/foo/"));
        registry.install_route("default/foo", route("/baz/"));
        registry.assert_consistent();
        assert_eq!(
            registry.path_table().keys().collect::<Vec<_>>(),
            vec!["/baz/"]
        );
    }

    #[test]
    fn test_conflicting_paths_coexist() {
        let registry = Registry::new();
        let first = route("/foo/");
        let first_handler = first.handler.clone();
        registry.install_route("default/a", first);
        assert_eq!(registry.install_route("default/b", route("/foo/")), Installed::Conflict);
        registry.assert_consistent();
        assert_eq!(registry.path_table().get("/foo/"), Some(&2));

        // first registrant answers
        let found = registry.lookup("/foo/x").unwrap();
        assert!(same_handler(&found, &first_handler));

        registry.remove_route("default/a");
        registry.assert_consistent();
        assert_eq!(registry.path_table().get("/foo/"), Some(&1));
        let found = registry.lookup("/foo/x").unwrap();
        assert!(!same_handler(&found, &first_handler));
    }

    #[test]
    fn test_longest_prefix_lookup() {
        let registry = Registry::new();
        let outer = route("/foo/");
        let outer_handler = outer.handler.clone();
        let inner = route("/foo/bar/");
        let inner_handler = inner.handler.clone();
        registry.install_route("default/outer", outer);
        registry.install_route("default/inner", inner);

        assert!(same_handler(&registry.lookup("/foo/bar/x").unwrap(), &inner_handler));
        assert!(same_handler(&registry.lookup("/foo/baz").unwrap(), &outer_handler));
        assert!(same_handler(&registry.lookup("/foo/bar").unwrap(), &inner_handler));
        assert!(same_handler(&registry.lookup("/foo").unwrap(), &outer_handler));
        assert!(registry.lookup("/fo").is_none());
        assert!(registry.lookup("/other").is_none());
    }

    #[test]
    fn test_exact_prefix_beats_trailing_slash_route() {
        let registry = Registry::new();
        let bare = route("/foo");
        let bare_handler = bare.handler.clone();
        let slashed = route("/foo/");
        let slashed_handler = slashed.handler.clone();
        registry.install_route("default/bare", bare);
        registry.install_route("default/slashed", slashed);

        assert!(same_handler(&registry.lookup("/foo").unwrap(), &bare_handler));
        assert!(same_handler(&registry.lookup("/foo/x").unwrap(), &slashed_handler));
        assert!(same_handler(&registry.lookup("/foobar").unwrap(), &bare_handler));

        // with only a root route beside it, /foo still reaches /foo/
        let registry = Registry::new();
        let slashed = route("/foo/");
        let slashed_handler = slashed.handler.clone();
        registry.install_route("default/root", route("/"));
        registry.install_route("default/slashed", slashed);
        assert!(same_handler(&registry.lookup("/foo").unwrap(), &slashed_handler));
    }

    #[test]
    fn test_empty_path_never_matches() {
        let registry = Registry::new();
        registry.install_route("default/empty", route(""));
        assert!(registry.lookup("/unrelated").is_none());
        assert!(registry.lookup("").is_none());

        registry.install_route("default/foo", route("/foo/"));
        assert!(registry.lookup("/unrelated").is_none());
        assert!(registry.lookup("/foo/x").is_some());
    }

    #[test]
    fn test_root_route_matches_everything() {
        let registry = Registry::new();
        registry.install_route("default/root", route("/"));
        assert!(registry.lookup("/anything").is_some());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_pods_sorted_and_indexed() {
        let registry = Registry::new();
        registry.set_endpoint_port("default/foo", 9102);
        registry.replace_pods(
            "default/foo",
            vec![
                PodEndpoint::new("foo-xyz", "10.0.0.2"),
                PodEndpoint::new("foo-aaa", "10.0.0.1"),
            ],
        );

        let (pod, port) = registry.pod("default/foo", 0).unwrap();
        assert_eq!(pod.pod_name, "foo-aaa");
        assert_eq!(port, 9102);
        let (pod, _) = registry.pod("default/foo", 1).unwrap();
        assert_eq!(pod.pod_name, "foo-xyz");

        assert_eq!(
            registry.pod("default/foo", 2).err(),
            Some(PodRouteError::IndexOutOfRange {
                service: "default/foo".into(),
                index: 2
            })
        );
        assert_eq!(
            registry.pod("default/nope", 0).err(),
            Some(PodRouteError::UnknownService("default/nope".into()))
        );

        registry.disable_endpoint_port("default/foo");
        assert_eq!(
            registry.pod("default/foo", 0).err(),
            Some(PodRouteError::Disabled("default/foo".into()))
        );
        assert!(registry.endpoints_snapshot().is_empty());
    }

    #[test]
    fn test_handler_cache_invalidation() {
        let registry = Registry::new();
        registry.set_endpoint_port("default/foo", 9102);
        registry.replace_pods("default/foo", vec![PodEndpoint::new("foo-a", "10.0.0.1")]);

        let build = || Ok::<Arc<dyn Handler>, ()>(Arc::new(NotFound));
        let (pod, _) = registry.pod("default/foo", 0).unwrap();
        let first = pod.handler_or_build(build).unwrap();
        let again = pod.handler_or_build(build).unwrap();
        assert!(same_handler(&first, &again));

        // a new list means new entries without a cached handler
        registry.replace_pods("default/foo", vec![PodEndpoint::new("foo-a", "10.0.0.1")]);
        let (pod, _) = registry.pod("default/foo", 0).unwrap();
        let rebuilt = pod.handler_or_build(build).unwrap();
        assert!(!same_handler(&first, &rebuilt));

        // so does a port change
        registry.set_endpoint_port("default/foo", 9103);
        let (pod, port) = registry.pod("default/foo", 0).unwrap();
        assert_eq!(port, 9103);
        let after_port = pod.handler_or_build(build).unwrap();
        assert!(!same_handler(&rebuilt, &after_port));
    }

    #[test]
    fn test_snapshots() {
        let registry = Registry::new();
        registry.install_route("default/foo", route("/foo/"));
        registry.set_endpoint_port("default/foo", 9102);
        registry.replace_pods("default/foo", vec![PodEndpoint::new("foo-a", "10.0.0.1")]);
        registry.replace_pods("default/bar", vec![PodEndpoint::new("bar-a", "10.0.0.2")]);

        let services = registry.services_snapshot();
        assert_eq!(services.len(), 1);
        assert_eq!(services["default/foo"].path, "/foo/");

        let endpoints = registry.endpoints_snapshot();
        assert_eq!(
            endpoints,
            vec![EndpointStatus {
                name: "default/foo".into(),
                port: 9102,
                backends: vec![BackendStatus {
                    pod_name: "foo-a".into(),
                    ip: "10.0.0.1".into()
                }],
            }]
        );
    }
}
