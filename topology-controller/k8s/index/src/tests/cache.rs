use super::*;
use crate::{Cache, CacheMetrics, SnapshotUnavailable};
use kubert::index::IndexNamespacedResource;
use prometheus_client::registry::Registry;

fn sync_all(cache: &mut Cache) {
    cache.reset(Vec::<HttpProxy>::new(), Default::default());
    cache.reset(Vec::<Ingress>::new(), Default::default());
    cache.reset(Vec::<HttpRoute>::new(), Default::default());
    cache.reset(Vec::<k8s::Service>::new(), Default::default());
    cache.reset(Vec::<k8s::Secret>::new(), Default::default());
    cache.reset(Vec::<TlsCertificateDelegation>::new(), Default::default());
}

#[test]
fn snapshot_requires_initial_sync() {
    let (cache, _changes) = Cache::shared();
    let mut cache = cache.write();

    cache.reset(Vec::<HttpProxy>::new(), Default::default());
    cache.reset(Vec::<Ingress>::new(), Default::default());
    cache.reset(Vec::<k8s::Service>::new(), Default::default());
    cache.reset(Vec::<k8s::Secret>::new(), Default::default());
    let error = cache.snapshot().expect_err("cache must not be ready");
    assert_eq!(
        error,
        SnapshotUnavailable {
            pending: vec!["HTTPRoute", "TLSCertificateDelegation"],
        }
    );
    assert_eq!(
        error.to_string(),
        "waiting for HTTPRoute, TLSCertificateDelegation to sync"
    );

    // Kinds that are not installed are not waited on.
    cache.ignore::<HttpRoute>();
    cache.reset(Vec::<TlsCertificateDelegation>::new(), Default::default());
    cache.snapshot().expect("cache must be ready");
}

#[test]
fn notifies_only_on_change() {
    let (cache, changes) = Cache::shared();
    let mut cache = cache.write();
    sync_all(&mut cache);
    let synced = *changes.borrow();

    let svc = mk_service("ns-0", "svc", [("http", 80)]);
    cache.apply(svc.clone());
    assert_eq!(*changes.borrow(), synced + 1);

    // Re-applying an identical object is not a change.
    cache.apply(svc);
    assert_eq!(*changes.borrow(), synced + 1);

    <Cache as IndexNamespacedResource<k8s::Service>>::delete(
        &mut cache,
        "ns-0".to_string(),
        "svc".to_string(),
    );
    assert_eq!(*changes.borrow(), synced + 2);

    // Deleting an unknown object is not a change.
    <Cache as IndexNamespacedResource<k8s::Service>>::delete(
        &mut cache,
        "ns-0".to_string(),
        "svc".to_string(),
    );
    assert_eq!(*changes.borrow(), synced + 2);
    assert_eq!(cache.generation(), synced + 2);
}

#[test]
fn snapshots_are_isolated() {
    let (cache, _changes) = Cache::shared();
    let mut cache = cache.write();
    sync_all(&mut cache);
    cache.apply(mk_service("ns-0", "a", [("http", 80)]));

    let snapshot = cache.snapshot().expect("cache must be ready");
    cache.apply(mk_service("ns-0", "b", [("http", 80)]));

    assert_eq!(snapshot.len::<k8s::Service>(), 1);
    assert!(snapshot.get::<k8s::Service>("ns-0", "a").is_some());
    assert_eq!(
        cache
            .snapshot()
            .expect("cache must be ready")
            .len::<k8s::Service>(),
        2
    );
}

#[test]
fn metrics_wrap_the_cache() {
    let (cache, _changes) = Cache::shared();
    let mut prom = Registry::default();
    let mut metrics = CacheMetrics::register(cache.clone(), &mut prom);

    metrics.reset(
        vec![
            mk_service("ns-0", "a", [("http", 80)]),
            mk_service("ns-1", "b", [("http", 80)]),
        ],
        Default::default(),
    );
    metrics.apply(mk_service("ns-0", "c", [("http", 80)]));
    <CacheMetrics as IndexNamespacedResource<k8s::Service>>::delete(
        &mut metrics,
        "ns-1".to_string(),
        "b".to_string(),
    );

    let cache = cache.read();
    let objects = cache.objects();
    assert_eq!(objects.count_in::<k8s::Service>("ns-0"), 2);
    assert_eq!(objects.count_in::<k8s::Service>("ns-1"), 0);

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).expect("metrics must encode");
    assert!(text.contains("applies_total{namespace=\"ns-0\",kind=\"Service\"} 1"), "{text}");
    assert!(text.contains("size{namespace=\"ns-0\",kind=\"Service\"} 2"), "{text}");
    assert!(text.contains("size{namespace=\"ns-1\",kind=\"Service\"} 0"), "{text}");
}

#[test]
fn selects_by_label() {
    let mut labeled = mk_service("ns-0", "labeled", [("http", 80)]);
    labeled.metadata.labels = Some(btreemap! {
        "app".to_string() => "web".to_string(),
    });
    let snapshot = Snapshot::default()
        .with(labeled)
        .with(mk_service("ns-0", "plain", [("http", 80)]))
        .with(mk_service("ns-1", "other", [("http", 80)]));

    let names = |ns: Option<&str>, selector: &k8s::Selector| {
        snapshot
            .list::<k8s::Service>(ns, selector)
            .map(|svc| svc.metadata.name.clone().unwrap_or_default())
            .collect::<Vec<_>>()
    };

    let everything = k8s::Selector::default();
    assert_eq!(names(None, &everything), vec!["labeled", "plain", "other"]);
    assert_eq!(names(Some("ns-0"), &everything), vec!["labeled", "plain"]);

    let web = k8s::Selector::from_map(btreemap! {
        "app".to_string() => "web".to_string(),
    });
    assert_eq!(names(None, &web), vec!["labeled"]);
}
