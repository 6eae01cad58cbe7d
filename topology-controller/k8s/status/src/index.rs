use ahash::AHashMap as HashMap;
#[cfg(not(test))]
use chrono::offset::Utc;
use chrono::SecondsFormat;
use k8s_openapi::NamespaceResourceScope;
use prometheus_client::{
    metrics::{counter::Counter, histogram::Histogram},
    registry::{Registry, Unit},
};
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, fmt};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time,
};
use topology_controller_core::{Condition, ObjectRef, Reason, SourceKind, StatusSink};
use topology_controller_k8s_api::{self as k8s, Resource};

/// The field manager used for status patches.
pub const STATUS_CONTROLLER_NAME: &str = "topology-controller";

pub struct Controller {
    client: k8s::Client,
    updates: mpsc::Receiver<Update>,
    patch_timeout: time::Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patch_succeeded: Counter,
    patch_failed: Counter,
    patch_timeout: Counter,
    patch_duration: Histogram,
}

/// Tracks the conditions written for each object and emits a patch whenever
/// they change.
pub struct Index {
    updates: mpsc::Sender<Update>,
    metrics: IndexMetrics,

    // Conditions reported since the last flush.
    pending: BTreeMap<ObjectRef, Vec<Condition>>,

    // Conditions most recently handed to the controller for each object.
    written: HashMap<ObjectRef, Vec<Condition>>,
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    patch_enqueues: Counter,
    patch_channel_full: Counter,
}

#[derive(Debug, PartialEq)]
pub struct Update {
    pub id: ObjectRef,
    pub patch: k8s::Patch<serde_json::Value>,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        updates: mpsc::Receiver<Update>,
        patch_timeout: time::Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            updates,
            patch_timeout,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let patch_params = k8s::PatchParams::apply(STATUS_CONTROLLER_NAME);

        while let Some(Update { id, patch }) = self.updates.recv().await {
            let start = time::Instant::now();
            let result = match id.kind {
                SourceKind::HttpProxy => {
                    let patch = patch_status::<k8s::HttpProxy>(
                        self.client.clone(),
                        &id,
                        &patch_params,
                        &patch,
                    );
                    time::timeout(self.patch_timeout, patch).await
                }
                SourceKind::HttpRoute => {
                    let patch = patch_status::<k8s::HttpRoute>(
                        self.client.clone(),
                        &id,
                        &patch_params,
                        &patch,
                    );
                    time::timeout(self.patch_timeout, patch).await
                }
                SourceKind::Ingress => {
                    tracing::debug!(namespace = %id.namespace, name = %id.name, "Ingress status is not patched");
                    continue;
                }
            };
            self.metrics
                .patch_duration
                .observe(start.elapsed().as_secs_f64());

            match result {
                Ok(Ok(())) => {
                    self.metrics.patch_succeeded.inc();
                    tracing::debug!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "Patched status");
                }
                Ok(Err(error)) => {
                    self.metrics.patch_failed.inc();
                    tracing::error!(kind = %id.kind, namespace = %id.namespace, name = %id.name, %error, "Failed to patch status");
                }
                Err(_) => {
                    self.metrics.patch_timeout.inc();
                    tracing::error!(kind = %id.kind, namespace = %id.namespace, name = %id.name, timeout = ?self.patch_timeout, "Status patch timed out");
                }
            }
        }
    }
}

async fn patch_status<K>(
    client: k8s::Client,
    id: &ObjectRef,
    params: &k8s::PatchParams,
    patch: &k8s::Patch<serde_json::Value>,
) -> Result<(), k8s::Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
    K::DynamicType: Default,
{
    let api = k8s::Api::<K>::namespaced(client, &id.namespace);
    api.patch_status(&id.name, params, patch).await?;
    Ok(())
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Counter::default();
        prom.register(
            "patch_succeeded",
            "Count of successful status patches",
            patch_succeeded.clone(),
        );

        let patch_failed = Counter::default();
        prom.register(
            "patch_failed",
            "Count of status patches rejected by the API server",
            patch_failed.clone(),
        );

        let patch_timeout = Counter::default();
        prom.register(
            "patch_timeout",
            "Count of status patches that did not complete in time",
            patch_timeout.clone(),
        );

        let patch_duration =
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0].into_iter());
        prom.register_with_unit(
            "patch_duration",
            "Time taken to apply a status patch",
            Unit::Seconds,
            patch_duration.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeout,
            patch_duration,
        }
    }
}

// === impl Index ===

impl Index {
    pub fn new(updates: mpsc::Sender<Update>, metrics: IndexMetrics) -> Self {
        Self {
            updates,
            metrics,
            pending: BTreeMap::new(),
            written: HashMap::new(),
        }
    }

    fn status_patch(
        id: &ObjectRef,
        conditions: &[Condition],
    ) -> Option<k8s::Patch<serde_json::Value>> {
        #[cfg(not(test))]
        let timestamp = Utc::now();
        #[cfg(test)]
        let timestamp = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

        match id.kind {
            SourceKind::HttpProxy => Some(make_patch::<k8s::HttpProxy>(
                &id.name,
                http_proxy_status(conditions, &timestamp),
            )),
            SourceKind::HttpRoute => Some(make_patch::<k8s::HttpRoute>(
                &id.name,
                http_route_status(conditions, &timestamp),
            )),
            // Ingress status has no place for conditions.
            SourceKind::Ingress => None,
        }
    }
}

impl StatusSink for Index {
    fn report(&mut self, condition: &Condition) {
        self.pending
            .entry(condition.object.clone())
            .or_default()
            .push(condition.clone());
    }

    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);

        // Objects that are no longer part of the topology are forgotten so
        // that they are written again if they return.
        self.written.retain(|id, _| pending.contains_key(id));

        for (id, conditions) in pending {
            if self.written.get(&id) == Some(&conditions) {
                continue;
            }

            let Some(patch) = Self::status_patch(&id, &conditions) else {
                log_conditions(&id, &conditions);
                self.written.insert(id, conditions);
                continue;
            };

            match self.updates.try_send(Update {
                id: id.clone(),
                patch,
            }) {
                Ok(()) => {
                    self.metrics.patch_enqueues.inc();
                    self.written.insert(id, conditions);
                }
                Err(TrySendError::Full(_)) => {
                    // Not recorded as written, so the next build retries it.
                    self.metrics.patch_channel_full.inc();
                    tracing::error!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "Status update channel full");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::error!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "Status update channel closed");
                }
            }
        }
    }
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_enqueues = Counter::default();
        prom.register(
            "patch_enqueues",
            "Count of status patches enqueued for the controller",
            patch_enqueues.clone(),
        );

        let patch_channel_full = Counter::default();
        prom.register(
            "patch_channel_full",
            "Count of status patches dropped because the controller was busy",
            patch_channel_full.clone(),
        );

        Self {
            patch_enqueues,
            patch_channel_full,
        }
    }
}

fn log_conditions(id: &ObjectRef, conditions: &[Condition]) {
    for condition in conditions {
        if condition.accepted {
            tracing::debug!(kind = %id.kind, namespace = %id.namespace, name = %id.name, "Accepted");
        } else {
            tracing::info!(
                kind = %id.kind,
                namespace = %id.namespace,
                name = %id.name,
                reason = %condition.reason,
                message = %condition.message,
                "Rejected"
            );
        }
    }
}

fn describe(conditions: &[Condition]) -> String {
    let errors = conditions
        .iter()
        .filter(|c| !c.accepted)
        .map(|c| c.message.as_str())
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return conditions
            .first()
            .map(|c| c.message.clone())
            .unwrap_or_default();
    }
    errors.join("; ")
}

fn status_condition(type_: &str, conditions: &[Condition], timestamp: &str) -> serde_json::Value {
    let rejected = conditions.iter().find(|c| !c.accepted);
    let (status, reason) = match rejected {
        Some(c) => ("False", c.reason),
        None => ("True", Reason::Valid),
    };
    serde_json::json!({
        "type": type_,
        "status": status,
        "reason": reason.as_str(),
        "message": describe(conditions),
        "lastTransitionTime": timestamp,
    })
}

fn http_proxy_status(conditions: &[Condition], timestamp: &str) -> serde_json::Value {
    let current_status = if conditions.iter().all(|c| c.accepted) {
        "valid"
    } else if conditions.iter().any(|c| c.reason == Reason::Orphaned) {
        "orphaned"
    } else {
        "invalid"
    };
    serde_json::json!({
        "currentStatus": current_status,
        "description": describe(conditions),
        "conditions": [status_condition("Valid", conditions, timestamp)],
    })
}

fn http_route_status(conditions: &[Condition], timestamp: &str) -> serde_json::Value {
    serde_json::json!({
        "conditions": [status_condition("Admitted", conditions, timestamp)],
    })
}

fn make_patch<K>(name: &str, status: serde_json::Value) -> k8s::Patch<serde_json::Value>
where
    K: Resource<DynamicType = ()>,
{
    let value = serde_json::json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "name": name,
        "status": status,
    });
    k8s::Patch::Merge(value)
}
