use crate::endpoint_proxy::{EndpointProxyFactory, ResolveError};
use crate::handler::{Handler, ProxyBody, json_response, not_found};
use crate::metrics_defs::{REQUESTS_ENDPOINT, REQUESTS_ROUTED, REQUESTS_UNMATCHED};
use crate::registry::Registry;
use crate::{ENDPOINT_PATH_PREFIX, ENDPOINTS_STATUS_PATH, SERVICES_STATUS_PATH};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use shared::counter;
use shared::http::make_error_response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Entry point for proxied traffic.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    endpoints: EndpointProxyFactory,
    default_handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        endpoints: EndpointProxyFactory,
        default_handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            registry,
            endpoints,
            default_handler,
        }
    }

    pub async fn dispatch(&self, request: Request<ProxyBody>) -> Response<ProxyBody> {
        let path = request.uri().path();

        match path {
            SERVICES_STATUS_PATH => return status_page(&self.registry.services_snapshot()),
            ENDPOINTS_STATUS_PATH => return status_page(&self.registry.endpoints_snapshot()),
            _ => {}
        }

        if path.starts_with(ENDPOINT_PATH_PREFIX) {
            return match self.endpoints.resolve(&self.registry, path) {
                Ok(handler) => {
                    counter!(REQUESTS_ENDPOINT).increment(1);
                    handler.handle(request).await
                }
                Err(ResolveError::Route(err)) => {
                    tracing::debug!(path, error = %err, "per-pod route not found");
                    not_found(&err.to_string())
                }
                Err(ResolveError::Build(err)) => {
                    tracing::warn!(path, error = %err, "could not build pod handler");
                    not_found(&err.to_string())
                }
            };
        }

        // The registry lock is released before the handler runs.
        let handler = self.registry.lookup(path);
        match handler {
            Some(handler) => {
                counter!(REQUESTS_ROUTED).increment(1);
                handler.handle(request).await
            }
            None => {
                counter!(REQUESTS_UNMATCHED).increment(1);
                self.default_handler.handle(request).await
            }
        }
    }
}

fn status_page<T: Serialize>(snapshot: &T) -> Response<ProxyBody> {
    match serde_json::to_vec(snapshot) {
        Ok(body) => json_response(body),
        Err(err) => {
            tracing::error!(error = %err, "could not serialize status page");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

impl Service<Request<Incoming>> for Dispatcher {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move {
            let request = request.map(|body| body.boxed());
            Ok(dispatcher.dispatch(request).await)
        })
    }
}
