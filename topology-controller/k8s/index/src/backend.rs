use crate::{Builder, SecretError, ServiceError, Snapshot};
use std::sync::Arc;
use topology_controller_core::{Cluster, ObjectRef, Reason};

/// Why a route's backend could not be resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BackendError {
    pub reason: Reason,
    pub message: String,
}

/// Resolves a route's backends in order.
///
/// Resolution stops at the first backend that fails, which is reported
/// against `source`. Clusters resolved before the failure are kept. Returns
/// `None` if no cluster was resolved.
pub(crate) fn resolve_clusters<T>(
    builder: &mut Builder,
    snapshot: &Snapshot,
    source: &ObjectRef,
    backends: impl IntoIterator<Item = T>,
    mut resolve: impl FnMut(&mut Builder, &Snapshot, T) -> Result<Cluster, BackendError>,
) -> Option<Arc<[Cluster]>> {
    let mut clusters = Vec::new();
    for backend in backends {
        match resolve(builder, snapshot, backend) {
            Ok(cluster) => clusters.push(cluster),
            Err(BackendError { reason, message }) => {
                tracing::debug!(%source, %message, "Failed to resolve backend");
                builder.reject(source, reason, message);
                break;
            }
        }
    }
    if clusters.is_empty() {
        return None;
    }
    Some(clusters.into())
}

// === impl BackendError ===

impl BackendError {
    pub(crate) fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub(crate) fn service_name_required() -> Self {
        Self::new(Reason::ServiceNameRequired, "must specify service name")
    }
}

impl From<ServiceError> for BackendError {
    fn from(error: ServiceError) -> Self {
        Self::new(Reason::ServiceUnresolved, error.to_string())
    }
}

impl From<SecretError> for BackendError {
    fn from(error: SecretError) -> Self {
        Self::new(Reason::SecretInvalid, error.to_string())
    }
}
