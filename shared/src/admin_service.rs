use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};

/// Liveness and readiness endpoints served on the admin listener.
///
/// `/health` answers as long as the process is serving. `/ready` consults the
/// supplied check, so a gateway whose discovery stream is down reports 503.
pub struct AdminService<F> {
    is_ready: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self { is_ready }
    }

    fn respond(&self, method: &Method, path: &str) -> Response<BoxBody<Bytes, Infallible>> {
        if method != Method::GET && method != Method::HEAD {
            return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

        match path {
            "/health" => Response::new(ok_body()),
            "/ready" => match (self.is_ready)() {
                true => Response::new(ok_body()),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<F> Service<Request<Incoming>> for AdminService<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        ready(Ok(self.respond(req.method(), req.uri().path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_health_and_ready() {
        let ready_flag = Arc::new(AtomicBool::new(false));
        let flag = ready_flag.clone();
        let admin = AdminService::new(move || flag.load(Ordering::Relaxed));

        let res = admin.respond(&Method::GET, "/health");
        assert_eq!(res.status(), StatusCode::OK);

        let res = admin.respond(&Method::GET, "/ready");
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        ready_flag.store(true, Ordering::Relaxed);
        let res = admin.respond(&Method::GET, "/ready");
        assert_eq!(res.status(), StatusCode::OK);

        let res = admin.respond(&Method::GET, "/other");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = admin.respond(&Method::POST, "/health");
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
