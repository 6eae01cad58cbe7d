use super::{object_ref, Processor};
use crate::{
    backend::{self, BackendError},
    ingress_class, secret, BuildError, Builder, PortRef, Snapshot,
};
use std::{collections::BTreeSet, time::Duration};
use topology_controller_core::{
    Cluster, ObjectRef, Owner, PathMatch, Reason, Redirect, Route, RouteAction, RouteMatch,
    SourceKind, TlsConfig, TlsVersion, VirtualHostKey, WILDCARD_HOST,
};
use topology_controller_k8s_api::{
    annotations, HTTPIngressPath, Ingress, IngressBackend, IngressSpec, Timeout,
};

/// Builds routes from `networking.k8s.io/v1` Ingress objects.
///
/// Ingresses share virtual hosts with each other but not with other kinds.
#[derive(Clone, Debug, Default)]
pub struct IngressProcessor {
    ingress_class: Option<String>,
}

/// Characters that mark an implementation-specific path as a regular
/// expression.
const REGEX_CHARS: &[char] = &['^', '+', '*', '[', ']', '%'];

const OWNER: Owner = Owner::Shared(SourceKind::Ingress);

#[derive(Debug, Default)]
struct Annotations {
    force_ssl_redirect: bool,
    allow_http: bool,
    websocket_routes: BTreeSet<String>,
    timeout: Option<Duration>,
}

struct Context<'a> {
    source: &'a ObjectRef,
    namespace: &'a str,
    annotations: &'a Annotations,
    secure_hosts: &'a BTreeSet<String>,
}

// === impl IngressProcessor ===

impl IngressProcessor {
    pub fn new(ingress_class: Option<String>) -> Self {
        Self { ingress_class }
    }

    fn process(
        &self,
        snapshot: &Snapshot,
        builder: &mut Builder,
        source: &ObjectRef,
        ingress: &Ingress,
        spec: &IngressSpec,
    ) {
        let annotations = Annotations::read(ingress, builder, source);
        let secure_hosts = secure_hosts(snapshot, builder, source, spec);
        let cx = Context {
            source,
            namespace: &source.namespace,
            annotations: &annotations,
            secure_hosts: &secure_hosts,
        };

        if let Some(backend) = spec.default_backend.as_ref() {
            cx.add_path(snapshot, builder, WILDCARD_HOST, RouteMatch::prefix("/"), backend);
        }

        for rule in spec.rules.iter().flatten() {
            let host = rule
                .host
                .as_deref()
                .filter(|host| !host.is_empty())
                .unwrap_or(WILDCARD_HOST);
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            for path in &http.paths {
                match path_match(path) {
                    Ok(route_match) => {
                        cx.add_path(snapshot, builder, host, route_match, &path.backend)
                    }
                    Err(error) => builder.reject(source, Reason::InvalidMatch, error.to_string()),
                }
            }
        }
    }
}

impl Processor for IngressProcessor {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn run(&self, snapshot: &Snapshot, builder: &mut Builder) -> Result<(), BuildError> {
        for (key, ingress) in snapshot.iter::<Ingress>() {
            builder.check_deadline()?;

            let spec_class = ingress
                .spec
                .as_ref()
                .and_then(|spec| spec.ingress_class_name.as_deref());
            let class = ingress_class::class_of(&ingress.metadata, spec_class);
            if !ingress_class::matches(class, self.ingress_class.as_deref()) {
                tracing::trace!(%key, ?class, "Ignoring Ingress with another class");
                continue;
            }

            let source = object_ref(SourceKind::Ingress, key);
            builder.accept(&source);
            if let Some(spec) = ingress.spec.as_ref() {
                self.process(snapshot, builder, &source, ingress, spec);
            }
        }
        Ok(())
    }
}

// === impl Context ===

impl Context<'_> {
    fn add_path(
        &self,
        snapshot: &Snapshot,
        builder: &mut Builder,
        host: &str,
        route_match: RouteMatch,
        backend: &IngressBackend,
    ) {
        let namespace = self.namespace;
        let Some(clusters) = backend::resolve_clusters(
            builder,
            snapshot,
            self.source,
            Some(backend),
            |builder, snapshot, backend| cluster(builder, snapshot, namespace, backend),
        ) else {
            return;
        };

        let websocket = self
            .annotations
            .websocket_routes
            .contains(route_match.path().as_str());
        let mk_route = |action| Route {
            route_match: route_match.clone(),
            action,
            websocket,
            timeout: self.annotations.timeout,
            source: self.source.clone(),
        };
        let forward = RouteAction::Forward(clusters);

        if self.secure_hosts.contains(host) {
            builder.add_owned_route(
                VirtualHostKey::secure(host),
                &OWNER,
                mk_route(forward.clone()),
            );
            if self.annotations.allow_http {
                let action = if self.annotations.force_ssl_redirect {
                    RouteAction::Redirect(Redirect::https())
                } else {
                    forward
                };
                builder.add_owned_route(VirtualHostKey::insecure(host), &OWNER, mk_route(action));
            }
        } else if self.annotations.allow_http {
            builder.add_owned_route(VirtualHostKey::insecure(host), &OWNER, mk_route(forward));
        }
    }
}

// === impl Annotations ===

impl Annotations {
    fn read(ingress: &Ingress, builder: &mut Builder, source: &ObjectRef) -> Self {
        let Some(annots) = ingress.metadata.annotations.as_ref() else {
            return Self {
                allow_http: true,
                ..Self::default()
            };
        };

        let timeout = match annots.get(annotations::RESPONSE_TIMEOUT) {
            None => None,
            Some(s) => match s.parse::<Timeout>() {
                Ok(timeout) => timeout.as_duration(),
                Err(error) => {
                    builder.reject(
                        source,
                        Reason::InvalidRoute,
                        format!("invalid response timeout {s:?}: {error}"),
                    );
                    None
                }
            },
        };

        Self {
            force_ssl_redirect: annots
                .get(annotations::FORCE_SSL_REDIRECT)
                .map(|v| v == "true")
                .unwrap_or(false),
            allow_http: annots
                .get(annotations::ALLOW_HTTP)
                .map(|v| v != "false")
                .unwrap_or(true),
            websocket_routes: annots
                .get(annotations::WEBSOCKET_ROUTES)
                .into_iter()
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(ToString::to_string)
                .collect(),
            timeout,
        }
    }
}

/// Registers secure virtual hosts for every TLS entry whose secret
/// validates, returning their hostnames.
fn secure_hosts(
    snapshot: &Snapshot,
    builder: &mut Builder,
    source: &ObjectRef,
    spec: &IngressSpec,
) -> BTreeSet<String> {
    let mut hosts = BTreeSet::new();
    for tls in spec.tls.iter().flatten() {
        let Some(secret_name) = tls.secret_name.as_deref() else {
            continue;
        };
        let secret = secret::parse_ref(&source.namespace, secret_name);
        if let Err(error) = builder.tls_secret(snapshot, &secret, &source.namespace) {
            tracing::debug!(%source, %error, "Serving insecure only");
            builder.reject(source, Reason::SecretInvalid, error.to_string());
            continue;
        }

        for host in tls.hosts.iter().flatten() {
            if host.is_empty() || host == WILDCARD_HOST {
                continue;
            }
            match builder.claim_virtual_host(VirtualHostKey::secure(host), &OWNER) {
                Ok(vhost) => {
                    if vhost.tls().is_none() {
                        vhost.set_tls(TlsConfig {
                            secret: secret.clone(),
                            minimum_version: TlsVersion::default(),
                        });
                    }
                    hosts.insert(host.clone());
                }
                Err(error) => {
                    builder.reject(source, Reason::VirtualHostConflict, error.to_string());
                }
            }
        }
    }
    hosts
}

fn path_match(path: &HTTPIngressPath) -> Result<RouteMatch, regex::Error> {
    let value = path
        .path
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    match path.path_type.as_str() {
        "Exact" => Ok(RouteMatch::exact(value)),
        "Prefix" => Ok(RouteMatch::prefix(value)),
        _ if value.contains(REGEX_CHARS) => {
            let path = PathMatch::regex(value)?;
            Ok(RouteMatch::new(path, None, None))
        }
        _ => Ok(RouteMatch::prefix(value)),
    }
}

fn cluster(
    builder: &mut Builder,
    snapshot: &Snapshot,
    namespace: &str,
    backend: &IngressBackend,
) -> Result<Cluster, BackendError> {
    if backend.resource.is_some() {
        return Err(BackendError::new(
            Reason::UnsupportedBackend,
            "resource backends are not supported",
        ));
    }
    let service = backend
        .service
        .as_ref()
        .filter(|svc| !svc.name.is_empty())
        .ok_or_else(BackendError::service_name_required)?;

    let port = match service.port.as_ref() {
        Some(port) => match (port.number, port.name.as_deref()) {
            (Some(number), _) => u16::try_from(number)
                .ok()
                .filter(|n| *n != 0)
                .map(PortRef::Number),
            (None, Some(name)) if !name.is_empty() => Some(PortRef::Name(name.to_string())),
            _ => None,
        },
        None => None,
    };
    let port = port.ok_or_else(|| {
        BackendError::new(
            Reason::ServiceUnresolved,
            format!("service {:?}: port must be specified", service.name),
        )
    })?;

    let upstream = builder.ensure_service(snapshot, namespace, &service.name, &port)?;
    Ok(Cluster::new(upstream))
}
