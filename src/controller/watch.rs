//! Resource watch loop
//!
//! Turns the kube watcher stream into add, update and delete callbacks. The
//! dispatcher remembers the last object seen per namespace and name so an
//! update carries both versions, and a relist emits deletes for objects
//! that vanished while the watch was down.

use crate::error::Result;
use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callbacks for one resource kind
#[async_trait]
pub trait EventHandler<K: Send + 'static>: Send + Sync {
    async fn on_add(&self, obj: K) -> Result<()>;

    async fn on_update(&self, old: K, new: K) -> Result<()>;

    async fn on_delete(&self, obj: K) -> Result<()>;
}

fn object_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default()
    )
}

/// Translates watcher events into handler calls
pub struct Dispatcher<K: Send + 'static> {
    kind: String,
    handler: Arc<dyn EventHandler<K>>,
    seen: BTreeMap<String, K>,
}

impl<K> Dispatcher<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(kind: impl Into<String>, handler: Arc<dyn EventHandler<K>>) -> Self {
        Self {
            kind: kind.into(),
            handler,
            seen: BTreeMap::new(),
        }
    }

    /// Objects currently known to the dispatcher
    pub fn known(&self) -> usize {
        self.seen.len()
    }

    async fn applied(&mut self, obj: K) {
        let key = object_key(&obj);
        let result = match self.seen.insert(key.clone(), obj.clone()) {
            None => self.handler.on_add(obj).await,
            Some(old) => {
                if old.meta().resource_version.is_some()
                    && old.meta().resource_version == obj.meta().resource_version
                {
                    debug!("[{}] {} unchanged, skipping", self.kind, key);
                    return;
                }
                self.handler.on_update(old, obj).await
            }
        };
        if let Err(e) = result {
            warn!("[{}] Failed to handle {}: {}", self.kind, key, e);
        }
    }

    async fn deleted(&mut self, obj: K) {
        let key = object_key(&obj);
        self.seen.remove(&key);
        if let Err(e) = self.handler.on_delete(obj).await {
            warn!("[{}] Failed to handle deletion of {}: {}", self.kind, key, e);
        }
    }

    pub async fn dispatch(&mut self, event: Event<K>) {
        match event {
            Event::Applied(obj) => self.applied(obj).await,
            Event::Deleted(obj) => self.deleted(obj).await,
            Event::Restarted(objs) => {
                let current: BTreeSet<String> = objs.iter().map(object_key).collect();
                let vanished: Vec<K> = self
                    .seen
                    .iter()
                    .filter(|(key, _)| !current.contains(*key))
                    .map(|(_, obj)| obj.clone())
                    .collect();
                for obj in vanished {
                    self.deleted(obj).await;
                }
                for obj in objs {
                    self.applied(obj).await;
                }
            }
        }
    }
}

/// Watch `api` until `token` is cancelled, feeding every event to `handler`
pub async fn run<K>(
    api: Api<K>,
    kind: &str,
    handler: Arc<dyn EventHandler<K>>,
    token: CancellationToken,
) where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    info!("[{}] Starting watch", kind);
    let mut dispatcher = Dispatcher::new(kind, handler);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("[{}] Watch stopped", kind);
                return;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => dispatcher.dispatch(event).await,
                Some(Err(e)) => warn!("[{}] Watch error: {}", kind, e),
                None => {
                    warn!("[{}] Watch stream ended", kind);
                    return;
                }
            }
        }
    }
}

/// Spawn [`run`] on the runtime
pub fn spawn<K>(
    api: Api<K>,
    kind: &'static str,
    handler: Arc<dyn EventHandler<K>>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move { run(api, kind, handler, token).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler<ConfigMap> for Recorder {
        async fn on_add(&self, obj: ConfigMap) -> Result<()> {
            self.calls.lock().push(format!("add {}", obj.name_any()));
            Ok(())
        }

        async fn on_update(&self, old: ConfigMap, new: ConfigMap) -> Result<()> {
            self.calls.lock().push(format!(
                "update {} {}->{}",
                new.name_any(),
                old.resource_version().unwrap_or_default(),
                new.resource_version().unwrap_or_default()
            ));
            Ok(())
        }

        async fn on_delete(&self, obj: ConfigMap) -> Result<()> {
            self.calls.lock().push(format!("delete {}", obj.name_any()));
            Ok(())
        }
    }

    fn cm(name: &str, version: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("rook-edgefs".into()),
                resource_version: Some(version.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_update_delete() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new("ConfigMap", recorder.clone());

        dispatcher.dispatch(Event::Applied(cm("a", "1"))).await;
        dispatcher.dispatch(Event::Applied(cm("a", "1"))).await;
        dispatcher.dispatch(Event::Applied(cm("a", "2"))).await;
        dispatcher.dispatch(Event::Deleted(cm("a", "2"))).await;

        assert_eq!(
            *recorder.calls.lock(),
            vec!["add a", "update a 1->2", "delete a"]
        );
        assert_eq!(dispatcher.known(), 0);
    }

    #[tokio::test]
    async fn test_restart_emits_missing_deletes() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new("ConfigMap", recorder.clone());

        dispatcher.dispatch(Event::Applied(cm("a", "1"))).await;
        dispatcher.dispatch(Event::Applied(cm("b", "1"))).await;
        dispatcher
            .dispatch(Event::Restarted(vec![cm("b", "3"), cm("c", "1")]))
            .await;

        assert_eq!(
            *recorder.calls.lock(),
            vec!["add a", "add b", "delete a", "update b 1->3", "add c"]
        );
        assert_eq!(dispatcher.known(), 2);
    }
}
