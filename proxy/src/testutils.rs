use crate::handler::{ProxyBody, full_body};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, LOCATION};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, ObjectReference, Service, ServicePort, ServiceSpec,
};
use kube::api::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path_and_query: String,
    pub headers: HeaderMap,
}

/// Local HTTP backend that records every request it receives.
///
/// Answers 200 with the request path as body. A path ending in `/redirect`
/// answers 302 pointing at `index.html` in the same directory.
pub struct TestBackend {
    pub port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let recorded = recorded.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move { Ok::<_, Infallible>(respond(&recorded, req)) }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        TestBackend { port, requests }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path_and_query).collect()
    }
}

fn respond(recorded: &Mutex<Vec<RecordedRequest>>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let path = req.uri().path().to_string();
    recorded.lock().push(RecordedRequest {
        path_and_query,
        headers: req.headers().clone(),
    });

    if let Some(dir) = path.strip_suffix("redirect") {
        return Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, format!("{dir}index.html"))
            .body(Full::new(Bytes::new()))
            .unwrap();
    }

    Response::new(Full::new(Bytes::from(path)))
}

pub fn test_request(uri: &str) -> Request<ProxyBody> {
    Request::builder().uri(uri).body(full_body(Bytes::new())).unwrap()
}

pub fn service(namespace: &str, name: &str, annotations: &[(&str, &str)], ports: &[i32]) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some(namespace.into()),
            name: Some(name.into()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|port| ServicePort {
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn addresses(pods: &[(&str, &str)]) -> Option<Vec<EndpointAddress>> {
    Some(
        pods.iter()
            .map(|(pod, ip)| EndpointAddress {
                ip: ip.to_string(),
                target_ref: Some(ObjectReference {
                    kind: Some("Pod".into()),
                    name: Some(pod.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
    )
}

/// Endpoints with one subset; each pod is `(pod name, ip)`.
pub fn endpoints(
    namespace: &str,
    name: &str,
    ready: &[(&str, &str)],
    not_ready: &[(&str, &str)],
) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            namespace: Some(namespace.into()),
            name: Some(name.into()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: addresses(ready),
            not_ready_addresses: addresses(not_ready),
            ..Default::default()
        }]),
    }
}
