//! Watch supervision.
//!
//! The supervisor owns the Service and Endpoints event streams and feeds them
//! to the [`Reconciler`]. When either stream ends it re-opens both, with a
//! bounded number of attempts. Running out of attempts is fatal: [`run`]
//! returns the error and the process is expected to exit and be restarted by
//! its own supervisor.
//!
//! [`run`]: WatchSupervisor::run

use crate::config::WatchConfig;
use crate::errors::WatchError;
use crate::metrics_defs::WATCH_RESTARTS;
use crate::reconcile::Reconciler;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A change notification carrying the full object.
#[derive(Clone, Debug)]
pub enum ResourceEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

pub type EventStream<K> = BoxStream<'static, ResourceEvent<K>>;

pub struct WatchStreams {
    pub services: EventStream<Service>,
    pub endpoints: EventStream<Endpoints>,
}

/// Opens fresh Service and Endpoints watches.
#[async_trait]
pub trait WatchSource: Send + Sync {
    async fn open(&self) -> Result<WatchStreams, WatchError>;
}

pub struct WatchSupervisor<S> {
    source: S,
    reconciler: Reconciler,
    max_retries: u32,
    retry_delay: Duration,
    ready: Arc<AtomicBool>,
}

impl<S: WatchSource> WatchSupervisor<S> {
    pub fn new(source: S, reconciler: Reconciler, config: &WatchConfig) -> Self {
        WatchSupervisor {
            source,
            reconciler,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while both watches are open.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Runs until the watches cannot be re-established.
    pub async fn run(&self) -> Result<(), WatchError> {
        loop {
            let mut streams = self.establish().await?;
            self.ready.store(true, Ordering::Relaxed);

            while self.run_once(&mut streams).await {}

            self.ready.store(false, Ordering::Relaxed);
            tracing::warn!("watch stream closed, re-establishing");
        }
    }

    /// Applies the next event from whichever stream yields first. Returns
    /// false once either stream has ended.
    async fn run_once(&self, streams: &mut WatchStreams) -> bool {
        tokio::select! {
            event = streams.services.next() => match event {
                Some(event) => {
                    self.reconciler.apply_service_event(&event);
                    true
                }
                None => false,
            },
            event = streams.endpoints.next() => match event {
                Some(event) => {
                    self.reconciler.apply_endpoints_event(&event);
                    true
                }
                None => false,
            },
        }
    }

    async fn establish(&self) -> Result<WatchStreams, WatchError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            counter!(WATCH_RESTARTS).increment(1);
            match self.source.open().await {
                Ok(streams) => {
                    tracing::info!(attempt, "watching services and endpoints");
                    return Ok(streams);
                }
                Err(err) => {
                    tracing::warn!(attempt, max_retries = self.max_retries, error = %err, "failed to open watch");
                    last_error = Some(Box::new(err));
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::error!(attempts = self.max_retries, "giving up on watch");
        Err(WatchError::RetriesExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }
}
