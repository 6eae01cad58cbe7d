use super::{object_ref, Processor};
use crate::{
    backend::{self, BackendError},
    BuildError, Builder, PortRef, Snapshot,
};
use topology_controller_core::{
    Cluster, ObjectRef, Owner, Reason, Route, RouteMatch, SourceKind, VirtualHostKey,
    WILDCARD_HOST,
};
use topology_controller_k8s_api::{
    service_apis::{HttpRouteForwardTo, HttpRouteMatch, HttpRouteRule, PathMatchType},
    HttpRoute,
};

/// Builds routes from `networking.x-k8s.io/v1alpha1` HTTPRoute objects.
///
/// Only prefix path matches are supported. Each rule's forwarding targets
/// are resolved once and shared by every prefix of the rule.
#[derive(Copy, Clone, Debug, Default)]
pub struct HttpRouteProcessor(());

const OWNER: Owner = Owner::Shared(SourceKind::HttpRoute);

// === impl HttpRouteProcessor ===

impl HttpRouteProcessor {
    pub fn new() -> Self {
        Self(())
    }
}

impl Processor for HttpRouteProcessor {
    fn name(&self) -> &'static str {
        "httproute"
    }

    fn run(&self, snapshot: &Snapshot, builder: &mut Builder) -> Result<(), BuildError> {
        for (key, route) in snapshot.iter::<HttpRoute>() {
            builder.check_deadline()?;

            let source = object_ref(SourceKind::HttpRoute, key);
            builder.accept(&source);

            if route.spec.tls.is_some() {
                builder.reject(
                    &source,
                    Reason::NotImplemented,
                    "NOT IMPLEMENTED: The 'RouteTLSConfig' field is not yet implemented.",
                );
            }

            let hosts: Vec<&str> = match route.spec.hostnames.as_deref() {
                Some(hostnames) if !hostnames.is_empty() => {
                    hostnames.iter().map(String::as_str).collect()
                }
                _ => vec![WILDCARD_HOST],
            };

            for rule in route.spec.rules.iter().flatten() {
                process_rule(snapshot, builder, &source, &hosts, rule);
            }
        }
        Ok(())
    }
}

fn process_rule(
    snapshot: &Snapshot,
    builder: &mut Builder,
    source: &ObjectRef,
    hosts: &[&str],
    rule: &HttpRouteRule,
) {
    let prefixes: Vec<String> = match rule.matches.as_deref() {
        Some(matches) if !matches.is_empty() => {
            matches.iter().filter_map(|m| prefix(builder, source, m)).collect()
        }
        _ => vec!["/".to_string()],
    };
    if prefixes.is_empty() {
        return;
    }

    let namespace = source.namespace.as_str();
    let Some(clusters) = backend::resolve_clusters(
        builder,
        snapshot,
        source,
        rule.forward_to.iter().flatten(),
        |builder, snapshot, target| cluster(builder, snapshot, namespace, target),
    ) else {
        return;
    };

    for host in hosts {
        for prefix in &prefixes {
            let route = Route::forward(RouteMatch::prefix(prefix), clusters.clone(), source.clone());
            builder.add_owned_route(VirtualHostKey::insecure(*host), &OWNER, route);
        }
    }
}

/// Returns the path prefix of a match, or reports the match as unsupported.
fn prefix(builder: &mut Builder, source: &ObjectRef, m: &HttpRouteMatch) -> Option<String> {
    let Some(path) = m.path.as_ref() else {
        return Some("/".to_string());
    };
    match path.type_ {
        None | Some(PathMatchType::Prefix) => Some(
            path.value
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or("/")
                .to_string(),
        ),
        Some(_) => {
            builder.reject(
                source,
                Reason::NotImplemented,
                "NOT IMPLEMENTED: Only PathMatchPrefix is currently implemented.",
            );
            None
        }
    }
}

fn cluster(
    builder: &mut Builder,
    snapshot: &Snapshot,
    namespace: &str,
    target: &HttpRouteForwardTo,
) -> Result<Cluster, BackendError> {
    let name = target
        .service_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(BackendError::service_name_required)?;
    let port = target.port.filter(|port| *port != 0).ok_or_else(|| {
        BackendError::new(
            Reason::ServiceUnresolved,
            format!("service {name:?}: port must be specified"),
        )
    })?;

    let upstream = builder.ensure_service(snapshot, namespace, name, &PortRef::Number(port))?;
    let mut cluster = Cluster::new(upstream);
    cluster.weight = target.weight.unwrap_or(1);
    Ok(cluster)
}
