//! Path-prefix gateway for services discovered through Kubernetes annotations.
//!
//! Services opt in with a `k8s-svc-proxy.local/path` annotation. The watch
//! loop keeps a [`registry::Registry`] in sync with the cluster and the
//! [`dispatcher::Dispatcher`] routes each request to the service with the
//! longest matching path, or to the handler supplied by the embedding
//! application.

pub mod annotations;
pub mod config;
pub mod dispatcher;
pub mod endpoint_proxy;
pub mod errors;
pub mod forward;
pub mod handler;
pub mod kube_source;
pub mod metrics_defs;
pub mod reconcile;
pub mod registry;
pub mod watch;

#[cfg(test)]
mod testutils;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::endpoint_proxy::EndpointProxyFactory;
use crate::errors::ProxyError;
use crate::forward::{ProxyHandlerFactory, build_client};
use crate::handler::Handler;
use crate::kube_source::KubeWatchSource;
use crate::reconcile::Reconciler;
use crate::registry::Registry;
use crate::watch::{WatchSource, WatchSupervisor};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Paths under this prefix belong to the gateway and cannot be claimed by a
/// service.
pub const STATUS_PATH_PREFIX: &str = "/k8s-svc-proxy/";
pub const SERVICES_STATUS_PATH: &str = "/k8s-svc-proxy/services";
pub const ENDPOINTS_STATUS_PATH: &str = "/k8s-svc-proxy/endpoints";
pub const ENDPOINT_PATH_PREFIX: &str = "/endpoint/";

/// Watches the cluster the process runs in and serves until the watch fails
/// for good or a listener errors.
pub async fn run(config: Config, default_handler: Arc<dyn Handler>) -> Result<(), ProxyError> {
    let source = KubeWatchSource::try_default(config.watch.namespace.clone()).await?;
    serve(config, source, default_handler).await
}

pub async fn serve<S>(
    config: Config,
    source: S,
    default_handler: Arc<dyn Handler>,
) -> Result<(), ProxyError>
where
    S: WatchSource + 'static,
{
    let client = build_client(config.upstream.connect_timeout());
    let registry = Arc::new(Registry::new());

    let reconciler = Reconciler::new(registry.clone(), ProxyHandlerFactory::new(client.clone()));
    let supervisor = WatchSupervisor::new(source, reconciler, &config.watch);
    let ready = supervisor.ready_flag();
    let watch_handle = tokio::spawn(async move { supervisor.run().await });

    let dispatcher = Dispatcher::new(registry, EndpointProxyFactory::new(client), default_handler);
    let admin = AdminService::new(move || ready.load(Ordering::Relaxed));

    let watch_task = async { Ok::<_, ProxyError>(watch_handle.await??) };
    let proxy_task = async {
        run_http_service(&config.listener.host, config.listener.port, dispatcher).await?;
        Ok::<_, ProxyError>(())
    };
    let admin_task = async {
        run_http_service(&config.admin_listener.host, config.admin_listener.port, admin).await?;
        Ok::<_, ProxyError>(())
    };

    tokio::try_join!(watch_task, proxy_task, admin_task)?;
    Ok(())
}
