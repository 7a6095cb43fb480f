use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid backend URL {0}: {1}")]
    InvalidBackendUrl(String, url::ParseError),
    #[error("invalid request URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),
    #[error("task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),
    #[error("watch could not be re-established after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Option<Box<WatchError>>,
    },
    #[error("watch source unavailable: {0}")]
    Unavailable(String),
}

/// Why a `/endpoint/...` request could not be mapped to a pod.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PodRouteError {
    #[error("expected /endpoint/<namespace>/<service>/<index>/<path>")]
    Malformed,
    #[error("invalid pod index {0:?}")]
    InvalidIndex(String),
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("per-pod routing disabled for {0}")]
    Disabled(String),
    #[error("{service} has no pod at index {index}")]
    IndexOutOfRange { service: String, index: usize },
}
