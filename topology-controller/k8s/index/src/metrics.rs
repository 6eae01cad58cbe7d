use crate::{snapshot::Kind, Cache, SharedCache};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        gauge::Gauge,
        histogram::{exponential_buckets, Histogram},
    },
    registry::{Registry, Unit},
};
use std::time::Duration;
use topology_controller_core::{Condition, Graph};
use topology_controller_k8s_api::ResourceExt;

/// Observes the results of graph builds.
#[derive(Clone, Debug)]
pub struct BuildMetrics {
    builds: Family<BuildLabels, Counter>,
    build_duration: Histogram,
    virtual_hosts: Gauge,
    routes: Gauge,
    conditions: Family<ConditionLabels, Counter>,
}

/// Wraps the cache to count the updates applied to it and track its size.
pub struct CacheMetrics {
    inner: SharedCache,

    size: Family<NamespacedLabels, Gauge>,
    applies: Family<NamespacedLabels, Counter>,
    deletes: Family<NamespacedLabels, Counter>,
    resets: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildLabels {
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ConditionLabels {
    kind: &'static str,
    reason: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedLabels {
    namespace: String,
    kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

// === impl BuildMetrics ===

impl BuildMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let builds = Family::default();
        prom.register("builds", "Count of graph builds by result", builds.clone());

        // 1ms .. ~8s
        let build_duration = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        prom.register_with_unit(
            "build_duration",
            "Time taken to build a graph",
            Unit::Seconds,
            build_duration.clone(),
        );

        let virtual_hosts = Gauge::default();
        prom.register(
            "virtual_hosts",
            "Number of virtual hosts in the published graph",
            virtual_hosts.clone(),
        );

        let routes = Gauge::default();
        prom.register(
            "routes",
            "Number of routes in the published graph",
            routes.clone(),
        );

        let conditions = Family::default();
        prom.register(
            "conditions",
            "Count of conditions reported by builds",
            conditions.clone(),
        );

        Self {
            builds,
            build_duration,
            virtual_hosts,
            routes,
            conditions,
        }
    }

    pub(crate) fn published(&self, graph: &Graph, conditions: &[Condition], elapsed: Duration) {
        self.observe("ok", elapsed);
        self.virtual_hosts.set(graph.len() as i64);
        self.routes.set(graph.route_count() as i64);
        for condition in conditions {
            self.conditions
                .get_or_create(&ConditionLabels {
                    kind: condition.object.kind.as_str(),
                    reason: condition.reason.as_str(),
                })
                .inc();
        }
    }

    pub(crate) fn failed(&self, result: &'static str, elapsed: Duration) {
        self.observe(result, elapsed);
    }

    fn observe(&self, result: &'static str, elapsed: Duration) {
        self.builds.get_or_create(&BuildLabels { result }).inc();
        self.build_duration.observe(elapsed.as_secs_f64());
    }
}

// === impl CacheMetrics ===

impl CacheMetrics {
    pub fn register(inner: SharedCache, prom: &mut Registry) -> Self {
        let size = Family::default();
        prom.register(
            "size",
            "Gauge of the number of resources in the cache",
            size.clone(),
        );

        let applies = Family::default();
        prom.register("applies", "Count of applies to the cache", applies.clone());

        let deletes = Family::default();
        prom.register("deletes", "Count of deletes from the cache", deletes.clone());

        let resets = Family::default();
        prom.register("resets", "Count of resets of the cache", resets.clone());

        Self {
            inner,
            size,
            applies,
            deletes,
            resets,
        }
    }

    fn set_size<K: Kind>(&self, namespace: String) {
        let size = self.inner.read().objects().count_in::<K>(&namespace);
        self.size
            .get_or_create(&NamespacedLabels {
                namespace,
                kind: K::KIND,
            })
            .set(size as i64);
    }
}

impl<K> IndexNamespacedResource<K> for CacheMetrics
where
    K: Kind + PartialEq,
{
    fn apply(&mut self, resource: K) {
        let namespace = resource.namespace().unwrap_or_default();
        self.applies
            .get_or_create(&NamespacedLabels {
                namespace: namespace.clone(),
                kind: K::KIND,
            })
            .inc();
        <Cache as IndexNamespacedResource<K>>::apply(&mut self.inner.write(), resource);
        self.set_size::<K>(namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.deletes
            .get_or_create(&NamespacedLabels {
                namespace: namespace.clone(),
                kind: K::KIND,
            })
            .inc();
        <Cache as IndexNamespacedResource<K>>::delete(&mut self.inner.write(), namespace.clone(), name);
        self.set_size::<K>(namespace);
    }

    fn reset(&mut self, resources: Vec<K>, removed: NamespacedRemoved) {
        let mut namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces.dedup();

        self.resets.get_or_create(&KindLabels { kind: K::KIND }).inc();
        <Cache as IndexNamespacedResource<K>>::reset(&mut self.inner.write(), resources, removed);
        for namespace in namespaces {
            self.set_size::<K>(namespace);
        }
    }
}
