use crate::{
    processor::{HttpProxyProcessor, HttpRouteProcessor, IngressProcessor, Processor},
    Build, BuildError, BuildMetrics, Builder, SharedCache, Snapshot,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use topology_controller_core::{Graph, StatusSink};

/// Settings that shape every build.
#[derive(Clone, Debug, Default)]
pub struct BuildConfig {
    /// Namespaces in which root `HTTPProxy` objects may be defined. Empty
    /// permits all namespaces.
    pub root_namespaces: Vec<String>,

    /// The ingress class to serve. When unset, objects without a class or
    /// with the default class are served.
    pub ingress_class_name: Option<String>,

    /// Ignores `permitInsecure` on `HTTPProxy` routes.
    pub disable_permit_insecure: bool,

    /// Fails builds that take longer than this.
    pub build_timeout: Option<Duration>,
}

/// Runs an ordered list of processors against snapshots.
pub struct Engine {
    processors: Vec<Box<dyn Processor + Send + Sync>>,
    build_timeout: Option<Duration>,
}

// === impl Engine ===

impl Engine {
    pub fn new(config: BuildConfig) -> Self {
        let BuildConfig {
            root_namespaces,
            ingress_class_name,
            disable_permit_insecure,
            build_timeout,
        } = config;
        let processors: Vec<Box<dyn Processor + Send + Sync>> = vec![
            Box::new(HttpProxyProcessor::new(
                root_namespaces,
                ingress_class_name.clone(),
                disable_permit_insecure,
            )),
            Box::new(IngressProcessor::new(ingress_class_name)),
            Box::new(HttpRouteProcessor::new()),
        ];
        Self::with_processors(processors, build_timeout)
    }

    pub fn with_processors(
        processors: Vec<Box<dyn Processor + Send + Sync>>,
        build_timeout: Option<Duration>,
    ) -> Self {
        Self {
            processors,
            build_timeout,
        }
    }

    /// Builds a graph from `snapshot`. Building is deterministic: the same
    /// snapshot always yields the same graph and conditions.
    pub fn build(&self, snapshot: &Snapshot) -> Result<Build, BuildError> {
        let deadline = self.build_timeout.map(|timeout| Instant::now() + timeout);
        let mut builder = Builder::new(deadline);
        for processor in &self.processors {
            tracing::trace!(processor = processor.name(), "Running");
            processor.run(snapshot, &mut builder)?;
        }
        builder.finish()
    }

    /// Rebuilds the graph every time the cache changes.
    ///
    /// Successful builds are published to `graphs` and their conditions are
    /// reported to `sink`. When a build fails the previously published graph
    /// remains in effect. Changes made while a build runs are coalesced into
    /// a single subsequent build.
    pub async fn run<S>(
        self,
        cache: SharedCache,
        mut changes: watch::Receiver<u64>,
        graphs: watch::Sender<Arc<Graph>>,
        mut sink: S,
        metrics: BuildMetrics,
    ) where
        S: StatusSink + Send,
    {
        loop {
            let generation = *changes.borrow_and_update();
            let snapshot = cache.read().snapshot();

            match snapshot {
                Err(error) => {
                    tracing::debug!(%error, "Cache not ready");
                }
                Ok(snapshot) => {
                    let start = Instant::now();
                    match self.build(&snapshot) {
                        Ok(Build { graph, conditions }) => {
                            let elapsed = start.elapsed();
                            metrics.published(&graph, &conditions, elapsed);
                            tracing::info!(
                                generation,
                                virtual_hosts = graph.len(),
                                routes = graph.route_count(),
                                conditions = conditions.len(),
                                ?elapsed,
                                "Published graph"
                            );
                            graphs.send_replace(Arc::new(graph));
                            for condition in &conditions {
                                sink.report(condition);
                            }
                            sink.flush();
                        }
                        Err(error) => {
                            let result = match error {
                                BuildError::SnapshotUnavailable(_) => "unavailable",
                                BuildError::TimedOut => "timeout",
                                BuildError::Invariant(_) => "invariant",
                            };
                            metrics.failed(result, start.elapsed());
                            tracing::warn!(generation, %error, "Build failed; keeping previous graph");
                        }
                    }
                }
            }

            if changes.changed().await.is_err() {
                tracing::debug!("Cache dropped");
                return;
            }
        }
    }
}
