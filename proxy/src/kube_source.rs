use crate::errors::WatchError;
use crate::watch::{EventStream, ResourceEvent, WatchSource, WatchStreams};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Watches Services and Endpoints through the Kubernetes API server.
pub struct KubeWatchSource {
    client: Client,
    /// All namespaces when unset.
    namespace: Option<String>,
}

impl KubeWatchSource {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        KubeWatchSource { client, namespace }
    }

    /// Uses the in-cluster service account, or the local kubeconfig.
    pub async fn try_default(namespace: Option<String>) -> Result<Self, WatchError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    async fn watch<K>(&self, kind: &'static str) -> Result<EventStream<K>, WatchError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
        K: Clone + DeserializeOwned + Debug + Send + 'static,
    {
        let events = self.api::<K>().watch(&WatchParams::default(), "0").await?;
        Ok(into_events(kind, events))
    }
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn open(&self) -> Result<WatchStreams, WatchError> {
        Ok(WatchStreams {
            services: self.watch::<Service>("services").await?,
            endpoints: self.watch::<Endpoints>("endpoints").await?,
        })
    }
}

/// Bookmarks are dropped. An error, in-band or from the transport, ends the
/// stream so the supervisor re-opens both watches.
fn into_events<K, S>(kind: &'static str, events: S) -> EventStream<K>
where
    K: Send + 'static,
    S: Stream<Item = Result<WatchEvent<K>, kube::Error>> + Send + 'static,
{
    stream::unfold(events.boxed(), move |mut events| async move {
        loop {
            let event = match events.next().await? {
                Ok(WatchEvent::Added(obj)) => ResourceEvent::Added(obj),
                Ok(WatchEvent::Modified(obj)) => ResourceEvent::Modified(obj),
                Ok(WatchEvent::Deleted(obj)) => ResourceEvent::Deleted(obj),
                Ok(WatchEvent::Bookmark(_)) => continue,
                Ok(WatchEvent::Error(status)) => {
                    tracing::warn!(kind, code = status.code, message = %status.message, "watch error event");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(kind, error = %err, "watch stream failed");
                    return None;
                }
            };
            return Some((event, events));
        }
    })
    .boxed()
}
