use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use shared::http::make_error_response;

/// Body type flowing through the gateway in both directions.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Something that can answer a request: a backend forwarder, or the wrapped
/// application's fallback.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request<ProxyBody>) -> Response<ProxyBody>;
}

/// Fallback used when no route matches and the embedding application supplied
/// nothing better.
pub struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, _request: Request<ProxyBody>) -> Response<ProxyBody> {
        make_error_response(StatusCode::NOT_FOUND)
    }
}

pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

pub fn json_response(body: Vec<u8>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// 404 carrying a short explanation, e.g. the unknown service key.
pub fn not_found(detail: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(format!("{detail}\n")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
