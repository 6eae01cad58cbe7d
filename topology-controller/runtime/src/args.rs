use crate::{
    core::Graph,
    index::{self, BuildConfig, Cache, Engine, Kind},
    k8s::{self, Client},
    status,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::{info_span, Instrument};

// The maximum number of status patches to buffer. Each build enqueues at most
// one patch per changed object.
const STATUS_UPDATE_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Parser)]
#[clap(name = "topology", about = "A reverse proxy topology controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "topology=info,warn",
        env = "TOPOLOGY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespaces in which root HTTPProxies may be defined.
    ///
    /// Roots are permitted in all namespaces when empty.
    #[clap(long, default_value = "")]
    root_namespaces: Namespaces,

    /// Only serves objects of this ingress class.
    #[clap(long)]
    ingress_class_name: Option<String>,

    /// Ignores `permitInsecure` on HTTPProxy routes.
    #[clap(long)]
    disable_permit_insecure: bool,

    /// Fails builds that take longer than this. 0 disables the limit.
    #[clap(long, default_value = "10000")]
    build_timeout_ms: u64,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Disables writing status onto routing objects.
    #[clap(long)]
    status_controller_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            root_namespaces: Namespaces(root_namespaces),
            ingress_class_name,
            disable_permit_insecure,
            build_timeout_ms,
            patch_timeout_ms,
            status_controller_disabled,
        } = self;

        let config = BuildConfig {
            root_namespaces,
            ingress_class_name,
            disable_permit_insecure,
            build_timeout: (build_timeout_ms > 0).then(|| Duration::from_millis(build_timeout_ms)),
        };

        let (cache, changes) = Cache::shared();

        let mut prom = <Registry>::default();
        let cache_metrics =
            index::CacheMetrics::register(cache.clone(), prom.sub_registry_with_prefix("cache"));
        let build_metrics = index::BuildMetrics::register(prom.sub_registry_with_prefix("build"));
        let resource_status = prom.sub_registry_with_prefix("resource_status");
        let status_metrics = status::ControllerMetrics::register(resource_status);
        let status_index_metrics = status::IndexMetrics::register(resource_status);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let cache_metrics = Arc::new(parking_lot::RwLock::new(cache_metrics));

        // Spawn resource watches.

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache_metrics.clone(), services)
                .instrument(info_span!("services")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache_metrics.clone(), secrets)
                .instrument(info_span!("secrets")),
        );

        let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache_metrics.clone(), ingresses)
                .instrument(info_span!("ingresses")),
        );

        if api_resource_exists::<k8s::HttpProxy>(&runtime.client()).await {
            let proxies = runtime.watch_all::<k8s::HttpProxy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache_metrics.clone(), proxies)
                    .instrument(info_span!("httpproxies.projectcontour.io")),
            );
        } else {
            tracing::warn!("httpproxies.projectcontour.io resource kind not found, skipping watches");
            cache.write().ignore::<k8s::HttpProxy>();
        }

        if api_resource_exists::<k8s::TlsCertificateDelegation>(&runtime.client()).await {
            let delegations =
                runtime.watch_all::<k8s::TlsCertificateDelegation>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache_metrics.clone(), delegations)
                    .instrument(info_span!("tlscertificatedelegations.projectcontour.io")),
            );
        } else {
            tracing::warn!(
                "tlscertificatedelegations.projectcontour.io resource kind not found, skipping watches"
            );
            cache.write().ignore::<k8s::TlsCertificateDelegation>();
        }

        if api_resource_exists::<k8s::HttpRoute>(&runtime.client()).await {
            let http_routes = runtime.watch_all::<k8s::HttpRoute>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache_metrics, http_routes)
                    .instrument(info_span!("httproutes.networking.x-k8s.io")),
            );
        } else {
            tracing::warn!("httproutes.networking.x-k8s.io resource kind not found, skipping watches");
            cache.write().ignore::<k8s::HttpRoute>();
        }

        // Build the status index which will receive the conditions of every
        // build and forward changed statuses to the status controller.
        let status_index = if status_controller_disabled {
            tracing::info!("Status controller disabled");
            None
        } else {
            let (updates_tx, updates_rx) = mpsc::channel(STATUS_UPDATE_QUEUE_SIZE);
            let status_controller = status::Controller::new(
                runtime.client(),
                updates_rx,
                Duration::from_millis(patch_timeout_ms),
                status_metrics,
            );
            tokio::spawn(
                status_controller
                    .run()
                    .instrument(info_span!("status_controller")),
            );
            Some(status::Index::new(updates_tx, status_index_metrics))
        };

        // Rebuild the topology whenever the cache changes.
        let (graphs_tx, graphs_rx) = watch::channel(Arc::new(Graph::default()));
        tokio::spawn(
            Engine::new(config)
                .run(cache, changes, graphs_tx, status_index, build_metrics)
                .instrument(info_span!("engine")),
        );
        tokio::spawn(log_graphs(graphs_rx).instrument(info_span!("graphs")));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// A comma-separated list of namespaces. Whitespace around each name is
/// ignored, as are empty names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Namespaces(Vec<String>);

impl std::str::FromStr for Namespaces {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(
            s.split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(ToString::to_string)
                .collect(),
        ))
    }
}

/// Logs a summary of each published graph.
async fn log_graphs(mut graphs: watch::Receiver<Arc<Graph>>) {
    while graphs.changed().await.is_ok() {
        let graph = graphs.borrow_and_update().clone();
        let secure = graph
            .virtual_hosts()
            .filter(|vhost| vhost.tls().is_some())
            .count();
        tracing::debug!(
            virtual_hosts = graph.len(),
            secure,
            routes = graph.route_count(),
            "Graph updated"
        );
    }
}

async fn api_resource_exists<T: Kind>(client: &Client) -> bool {
    let dt = ();
    let exists = client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt));
    tracing::debug!(kind = T::KIND, exists, "Discovered resource kind");
    exists
}
