use super::Processor;
use crate::{
    backend::{self, BackendError},
    delegation::{Node, PendingRoute, Tree},
    secret, BuildError, Builder, ConflictError, PortRef, Snapshot,
};
use std::{sync::Arc, time::Duration};
use topology_controller_core::{
    Cluster, HealthCheckPolicy, Owner, Protocol, Reason, Redirect, Route, RouteAction,
    TlsConfig, TlsVersion, UpstreamValidation, VirtualHostKey,
};
use topology_controller_k8s_api::{projectcontour::httpproxy, Timeout};

/// Builds virtual hosts from root `HTTPProxy` objects and the routes of every
/// proxy they include.
#[derive(Clone, Debug, Default)]
pub struct HttpProxyProcessor {
    root_namespaces: Vec<String>,
    ingress_class: Option<String>,
    disable_permit_insecure: bool,
}

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
const DEFAULT_HEALTHY_THRESHOLD: u32 = 2;

// === impl HttpProxyProcessor ===

impl HttpProxyProcessor {
    pub fn new(
        root_namespaces: Vec<String>,
        ingress_class: Option<String>,
        disable_permit_insecure: bool,
    ) -> Self {
        Self {
            root_namespaces,
            ingress_class,
            disable_permit_insecure,
        }
    }

    /// Validates a root and claims its virtual hosts, returning the fqdn and
    /// whether a secure host was established.
    fn claim_root<'s>(
        &self,
        snapshot: &Snapshot,
        builder: &mut Builder,
        node: &Node<'s>,
    ) -> Option<(&'s str, bool)> {
        let vhost = node.proxy.spec.virtualhost.as_ref()?;
        let fqdn = vhost.fqdn.as_str();
        if fqdn.is_empty() {
            builder.reject(
                &node.object,
                Reason::InvalidVirtualHost,
                "Spec.VirtualHost.Fqdn must be specified",
            );
            return None;
        }
        if fqdn.contains('*') {
            builder.reject(
                &node.object,
                Reason::InvalidVirtualHost,
                format!("Spec.VirtualHost.Fqdn {fqdn:?} cannot use wildcards"),
            );
            return None;
        }
        if !self.root_namespaces.is_empty()
            && !self.root_namespaces.contains(&node.key.namespace)
        {
            builder.reject(
                &node.object,
                Reason::RootNamespaceNotAllowed,
                "root HTTPProxy cannot be defined in this namespace",
            );
            return None;
        }

        let owner = Owner::Exclusive(node.object.clone());
        if let Err(ConflictError::VirtualHost(conflict)) =
            builder.claim_virtual_host(VirtualHostKey::insecure(fqdn), &owner)
        {
            let (reason, message) = match &conflict.owner {
                Owner::Exclusive(other) => (
                    Reason::DuplicateVhost,
                    format!("fqdn {fqdn:?} is used in multiple HTTPProxies: {other}"),
                ),
                Owner::Shared(_) => (Reason::VirtualHostConflict, conflict.to_string()),
            };
            builder.reject(&node.object, reason, message);
            return None;
        }

        let secure = match vhost.tls.as_ref() {
            Some(tls) => self.claim_secure(snapshot, builder, node, fqdn, tls, &owner),
            None => false,
        };
        Some((fqdn, secure))
    }

    fn claim_secure(
        &self,
        snapshot: &Snapshot,
        builder: &mut Builder,
        node: &Node<'_>,
        fqdn: &str,
        tls: &httpproxy::Tls,
        owner: &Owner,
    ) -> bool {
        let Some(secret_name) = tls.secret_name.as_deref().filter(|s| !s.is_empty()) else {
            builder.reject(
                &node.object,
                Reason::SecretInvalid,
                "Spec.VirtualHost.TLS.SecretName must be specified",
            );
            return false;
        };
        let minimum_version = match tls
            .minimum_protocol_version
            .as_deref()
            .unwrap_or_default()
            .parse::<TlsVersion>()
        {
            Ok(version) => version,
            Err(error) => {
                builder.reject(&node.object, Reason::InvalidTlsVersion, error.to_string());
                return false;
            }
        };

        let namespace = &node.key.namespace;
        let secret = secret::parse_ref(namespace, secret_name);
        if let Err(error) = builder.tls_secret(snapshot, &secret, namespace) {
            tracing::debug!(proxy = %node.key, %error, "Serving insecure only");
            builder.reject(&node.object, Reason::SecretInvalid, error.to_string());
            return false;
        }

        match builder.claim_virtual_host(VirtualHostKey::secure(fqdn), owner) {
            Ok(vhost) => {
                vhost.set_tls(TlsConfig {
                    secret,
                    minimum_version,
                });
                true
            }
            Err(error) => {
                builder.reject(&node.object, Reason::VirtualHostConflict, error.to_string());
                false
            }
        }
    }

    fn add_route(
        &self,
        snapshot: &Snapshot,
        builder: &mut Builder,
        node: &Node<'_>,
        fqdn: &str,
        secure: bool,
        pending: PendingRoute<'_>,
    ) {
        let route = pending.route;
        let source = &node.object;

        let action = match (route.services.is_empty(), &route.request_redirect_policy) {
            (false, Some(_)) => {
                builder.reject(
                    source,
                    Reason::InvalidRoute,
                    "route cannot specify both services and a redirect policy",
                );
                return;
            }
            (true, None) => {
                builder.reject(
                    source,
                    Reason::InvalidRoute,
                    "route must specify at least one service or a redirect policy",
                );
                return;
            }
            (true, Some(policy)) => match redirect(policy) {
                Ok(redirect) => RouteAction::Redirect(redirect),
                Err(message) => {
                    builder.reject(source, Reason::InvalidRoute, message);
                    return;
                }
            },
            (false, None) => match clusters(snapshot, builder, node, route) {
                Some(clusters) => RouteAction::Forward(clusters),
                None => return,
            },
        };

        let timeout = match route.timeout_policy.as_ref().and_then(|t| t.response.as_deref()) {
            None => None,
            Some(s) => match s.parse::<Timeout>() {
                Ok(timeout) => timeout.as_duration(),
                Err(error) => {
                    builder.reject(
                        source,
                        Reason::InvalidRoute,
                        format!("invalid response timeout {s:?}: {error}"),
                    );
                    return;
                }
            },
        };

        let route_match = pending.conditions.route_match();
        let mk_route = |action| Route {
            route_match: route_match.clone(),
            action,
            websocket: route.enable_websockets,
            timeout,
            source: source.clone(),
        };

        if !secure {
            builder.add_route(VirtualHostKey::insecure(fqdn), mk_route(action));
            return;
        }
        let insecure = if route.permit_insecure && !self.disable_permit_insecure {
            action.clone()
        } else {
            RouteAction::Redirect(Redirect::https())
        };
        builder.add_route(VirtualHostKey::secure(fqdn), mk_route(action));
        builder.add_route(VirtualHostKey::insecure(fqdn), mk_route(insecure));
    }
}

impl Processor for HttpProxyProcessor {
    fn name(&self) -> &'static str {
        "httpproxy"
    }

    fn run(&self, snapshot: &Snapshot, builder: &mut Builder) -> Result<(), BuildError> {
        let tree = Tree::new(snapshot, self.ingress_class.as_deref());
        for node in tree.nodes() {
            builder.accept(&node.object);
        }

        let mut visited = vec![false; tree.len()];
        for root in tree.roots().collect::<Vec<_>>() {
            builder.check_deadline()?;
            visited[root] = true;
            let node = tree.node(root);
            let Some((fqdn, secure)) = self.claim_root(snapshot, builder, node) else {
                continue;
            };

            for pending in tree.walk(root, builder, &mut visited)? {
                let node = tree.node(pending.node);
                self.add_route(snapshot, builder, node, fqdn, secure, pending);
            }
        }

        for (node, _) in tree.nodes().zip(&visited).filter(|(_, visited)| !**visited) {
            tracing::debug!(proxy = %node.key, "Orphaned");
            builder.reject(
                &node.object,
                Reason::Orphaned,
                "this HTTPProxy is not part of a delegation chain from a root HTTPProxy",
            );
        }
        Ok(())
    }
}

fn clusters(
    snapshot: &Snapshot,
    builder: &mut Builder,
    node: &Node<'_>,
    route: &httpproxy::Route,
) -> Option<Arc<[Cluster]>> {
    let namespace = node.key.namespace.as_str();
    let health_check = route.health_check_policy.as_ref().map(health_check);
    // Unweighted services share traffic equally unless any weight is given.
    let weighted = route.services.iter().any(|svc| svc.weight.is_some());

    backend::resolve_clusters(
        builder,
        snapshot,
        &node.object,
        &route.services,
        |builder, snapshot, svc| {
            if svc.name.is_empty() {
                return Err(BackendError::service_name_required());
            }
            let port = u16::try_from(svc.port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| {
                    BackendError::new(
                        Reason::ServiceUnresolved,
                        format!("service {:?}: port {} is out of range", svc.name, svc.port),
                    )
                })?;
            let upstream =
                builder.ensure_service(snapshot, namespace, &svc.name, &PortRef::Number(port))?;

            let mut cluster = Cluster::new(upstream);
            cluster.weight = if weighted { svc.weight.unwrap_or(0) } else { 1 };
            cluster.health_check = health_check.clone();
            if let Some(protocol) = svc.protocol.as_deref() {
                cluster.protocol = protocol
                    .parse::<Protocol>()
                    .map_err(|error| BackendError::new(Reason::InvalidRoute, error.to_string()))?;
            }
            if let Some(validation) = svc.validation.as_ref() {
                if validation.subject_name.is_empty() {
                    return Err(BackendError::new(
                        Reason::InvalidRoute,
                        format!("service {:?}: upstream validation requires a subjectName", svc.name),
                    ));
                }
                let ca_secret = secret::parse_ref(namespace, &validation.ca_secret);
                builder.ca_secret(snapshot, &ca_secret, namespace)?;
                cluster.validation = Some(UpstreamValidation {
                    ca_secret,
                    subject_name: validation.subject_name.clone(),
                });
            }
            Ok(cluster)
        },
    )
}

fn health_check(policy: &httpproxy::HttpHealthCheckPolicy) -> HealthCheckPolicy {
    HealthCheckPolicy {
        path: policy.path.clone(),
        host: policy.host.clone(),
        interval: policy
            .interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL),
        timeout: policy
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT),
        unhealthy_threshold: policy
            .unhealthy_threshold_count
            .unwrap_or(DEFAULT_UNHEALTHY_THRESHOLD),
        healthy_threshold: policy
            .healthy_threshold_count
            .unwrap_or(DEFAULT_HEALTHY_THRESHOLD),
    }
}

fn redirect(policy: &httpproxy::HttpRequestRedirectPolicy) -> Result<Redirect, String> {
    let port = policy
        .port
        .map(|port| {
            u16::try_from(port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| format!("redirect port {port} is out of range"))
        })
        .transpose()?;
    let status = match policy.status_code {
        None | Some(302) => 302,
        Some(301) => 301,
        Some(code) => return Err(format!("redirect status code {code} must be 301 or 302")),
    };
    Ok(Redirect {
        scheme: policy.scheme.clone(),
        hostname: policy.hostname.clone(),
        port,
        status,
    })
}
