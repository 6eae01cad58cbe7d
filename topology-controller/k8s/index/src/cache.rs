use crate::snapshot::{Kind, Snapshot};
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::watch;
use topology_controller_k8s_api::{
    HttpProxy, HttpRoute, Ingress, Secret, Service, TlsCertificateDelegation,
};

pub type SharedCache = Arc<RwLock<Cache>>;

/// Holds the latest state of every watched resource.
///
/// The cache is updated by resource watches and read by the build loop,
/// which is notified of changes through a generation counter.
#[derive(Debug)]
pub struct Cache {
    objects: Snapshot,

    /// Kinds that have not yet completed their initial list.
    pending: BTreeSet<&'static str>,

    generation: watch::Sender<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("waiting for {} to sync", pending.join(", "))]
pub struct SnapshotUnavailable {
    pub pending: Vec<&'static str>,
}

// === impl Cache ===

impl Cache {
    /// Creates a cache that waits for every watched kind to sync.
    pub fn shared() -> (SharedCache, watch::Receiver<u64>) {
        let (generation, rx) = watch::channel(0);
        let pending = [
            <HttpProxy as Kind>::KIND,
            <Ingress as Kind>::KIND,
            <HttpRoute as Kind>::KIND,
            <Service as Kind>::KIND,
            <Secret as Kind>::KIND,
            <TlsCertificateDelegation as Kind>::KIND,
        ]
        .into_iter()
        .collect();
        let cache = Self {
            objects: Snapshot::default(),
            pending,
            generation,
        };
        (Arc::new(RwLock::new(cache)), rx)
    }

    /// Stops waiting for kind `K` to sync, e.g. because its resource type is
    /// not installed in the cluster.
    pub fn ignore<K: Kind>(&mut self) {
        if self.pending.remove(K::KIND) {
            self.notify();
        }
    }

    /// Returns a consistent copy of the cache once all kinds have synced.
    pub fn snapshot(&self) -> Result<Snapshot, SnapshotUnavailable> {
        if !self.pending.is_empty() {
            return Err(SnapshotUnavailable {
                pending: self.pending.iter().copied().collect(),
            });
        }
        Ok(self.objects.clone())
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    pub(crate) fn objects(&self) -> &Snapshot {
        &self.objects
    }

    fn notify(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

impl<K> kubert::index::IndexNamespacedResource<K> for Cache
where
    K: Kind + PartialEq,
{
    fn apply(&mut self, resource: K) {
        if self.objects.insert(resource) {
            self.notify();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.objects.remove::<K>(namespace, name) {
            self.notify();
        }
    }

    fn reset(&mut self, resources: Vec<K>, _removed: NamespacedRemoved) {
        self.objects.replace(resources);
        let kind = K::KIND;
        if self.pending.remove(kind) {
            tracing::debug!(%kind, "Synced");
        }
        self.notify();
    }
}
