//! Backend forwarding.
//!
//! A [`ForwardingHandler`] relays one request to a fixed backend origin and
//! streams the response back. What differs between route kinds is only how
//! the request path is rewritten, captured by [`PathRewrite`]:
//!
//! * service routes without a `map` annotation keep the path untouched
//! * service routes with a `map` annotation swap the matched route prefix for
//!   the map prefix
//! * per-pod routes drop the `/endpoint/<namespace>/<service>/<index>` prefix
//!
//! The outbound request is assembled from the inbound parts only, so headers
//! such as `User-Agent` reach the backend exactly when the client sent them.

use crate::errors::ProxyError;
use crate::handler::{Handler, ProxyBody};
use crate::metrics_defs::{REQUEST_DURATION, UPSTREAM_ERRORS};
use crate::registry::RouteSpec;
use async_trait::async_trait;
use http::uri::{Authority, Scheme, Uri};
use http_body_util::BodyExt;
use hyper::header::{HOST, HeaderValue, LOCATION};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::{PeerAddr, append_forwarded_for, filter_hop_by_hop, make_error_response};
use shared::{counter, histogram};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

pub type HttpClient = Client<HttpConnector, ProxyBody>;

pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut conn = HttpConnector::new();
    conn.set_connect_timeout(Some(connect_timeout));
    conn.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(conn)
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathRewrite {
    Preserve,
    MapPrefix {
        route_path: String,
        map_prefix: String,
    },
    /// Drop this many leading path segments.
    StripSegments(usize),
}

impl PathRewrite {
    pub fn apply(&self, path: &str) -> String {
        match self {
            PathRewrite::Preserve => path.to_string(),
            PathRewrite::MapPrefix {
                route_path,
                map_prefix,
            } => {
                // `/foo` reaching route `/foo/` leaves nothing to append.
                let rest = path.strip_prefix(route_path.as_str()).unwrap_or("");
                join_path(map_prefix, rest)
            }
            PathRewrite::StripSegments(count) => {
                let trimmed = path.strip_prefix('/').unwrap_or(path);
                match trimmed.splitn(count + 1, '/').nth(*count) {
                    Some(rest) => format!("/{rest}"),
                    None => "/".to_string(),
                }
            }
        }
    }

    /// Maps a backend redirect under the map prefix back under the route path.
    fn restore_location(&self, location: &str) -> Option<String> {
        let PathRewrite::MapPrefix {
            route_path,
            map_prefix,
        } = self
        else {
            return None;
        };

        if !location.starts_with('/') || location.starts_with("//") {
            return None;
        }

        let rest = location.strip_prefix(map_prefix.as_str())?;
        if map_prefix.ends_with('/') {
            Some(format!("{}/{rest}", route_path.trim_end_matches('/')))
        } else {
            Some(join_path(route_path, rest))
        }
    }
}

fn join_path(prefix: &str, rest: &str) -> String {
    let joined = match (prefix.ends_with('/'), rest.strip_prefix('/')) {
        (true, Some(stripped)) => format!("{prefix}{stripped}"),
        _ => format!("{prefix}{rest}"),
    };

    if joined.starts_with('/') {
        joined
    } else {
        format!("/{joined}")
    }
}

pub struct ForwardingHandler {
    client: HttpClient,
    scheme: Scheme,
    authority: Authority,
    rewrite: PathRewrite,
}

impl ForwardingHandler {
    pub fn new(client: HttpClient, target: &Url, rewrite: PathRewrite) -> Result<Self, ProxyError> {
        let scheme: Scheme = target.scheme().parse()?;
        let host = target
            .host_str()
            .ok_or_else(|| ProxyError::InvalidBackendUrl(target.to_string(), url::ParseError::EmptyHost))?;
        let authority: Authority = match target.port() {
            Some(port) => format!("{host}:{port}").parse()?,
            None => host.parse()?,
        };

        Ok(Self {
            client,
            scheme,
            authority,
            rewrite,
        })
    }

    fn upstream_uri(&self, inbound: &Uri) -> Result<Uri, http::Error> {
        let path = self.rewrite.apply(inbound.path());
        let path_and_query = match inbound.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

#[async_trait]
impl Handler for ForwardingHandler {
    async fn handle(&self, request: Request<ProxyBody>) -> Response<ProxyBody> {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();

        let uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!(uri = %parts.uri, error = %err, "could not build backend URI");
                return make_error_response(StatusCode::BAD_REQUEST);
            }
        };

        filter_hop_by_hop(&mut parts.headers, parts.version);
        if let Some(PeerAddr(peer)) = parts.extensions.get::<PeerAddr>() {
            append_forwarded_for(&mut parts.headers, *peer);
        }
        // HTTP/2 clients carry the host in the URI authority only.
        if !parts.headers.contains_key(HOST)
            && let Some(authority) = parts.uri.authority()
            && let Ok(value) = HeaderValue::from_str(authority.as_str())
        {
            parts.headers.insert(HOST, value);
        }

        let mut upstream_request = Request::new(body);
        *upstream_request.method_mut() = parts.method;
        *upstream_request.uri_mut() = uri;
        *upstream_request.headers_mut() = parts.headers;

        let response = match self.client.request(upstream_request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(backend = %self.authority, error = %err, "backend request failed");
                counter!(UPSTREAM_ERRORS).increment(1);
                return make_error_response(StatusCode::BAD_GATEWAY);
            }
        };

        let (mut parts, body) = response.into_parts();
        filter_hop_by_hop(&mut parts.headers, parts.version);

        if let Some(location) = parts.headers.get(LOCATION).and_then(|v| v.to_str().ok())
            && let Some(restored) = self.rewrite.restore_location(location)
            && let Ok(value) = HeaderValue::from_str(&restored)
        {
            parts.headers.insert(LOCATION, value);
        }

        histogram!(REQUEST_DURATION).record(started.elapsed().as_secs_f64());
        Response::from_parts(parts, body.boxed())
    }
}

/// `http://<name>.<namespace>.svc[:port]`
pub fn cluster_service_url(
    namespace: &str,
    name: &str,
    port: Option<u16>,
) -> Result<Url, ProxyError> {
    let mut raw = format!("http://{name}.{namespace}.svc");
    if let Some(port) = port {
        raw.push_str(&format!(":{port}"));
    }
    Url::parse(&raw).map_err(|e| ProxyError::InvalidBackendUrl(raw, e))
}

pub type BackendUrlFn = fn(&str, &str, Option<u16>) -> Result<Url, ProxyError>;

/// Builds the forwarding handler for a service route.
#[derive(Clone)]
pub struct ProxyHandlerFactory {
    client: HttpClient,
    backend_url: BackendUrlFn,
}

impl ProxyHandlerFactory {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            backend_url: cluster_service_url,
        }
    }

    /// Replaces cluster DNS naming, e.g. to point routes at a local backend.
    pub fn with_backend_url(mut self, backend_url: BackendUrlFn) -> Self {
        self.backend_url = backend_url;
        self
    }

    pub fn build(
        &self,
        namespace: &str,
        name: &str,
        spec: &RouteSpec,
    ) -> Result<Arc<dyn Handler>, ProxyError> {
        let target = (self.backend_url)(namespace, name, spec.port)?;
        let rewrite = match &spec.map_prefix {
            Some(map_prefix) => PathRewrite::MapPrefix {
                route_path: spec.path.clone(),
                map_prefix: map_prefix.clone(),
            },
            None => PathRewrite::Preserve,
        };

        Ok(Arc::new(ForwardingHandler::new(
            self.client.clone(),
            &target,
            rewrite,
        )?))
    }
}

/// `http://<pod ip>:<port>`, bracketing IPv6 addresses.
pub fn pod_url(ip: &str, port: u16) -> Result<Url, ProxyError> {
    let raw = match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{v6}]:{port}"),
        _ => format!("http://{ip}:{port}"),
    };
    Url::parse(&raw).map_err(|e| ProxyError::InvalidBackendUrl(raw, e))
}
