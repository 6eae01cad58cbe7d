use crate::{
    secret::{self, SecretError, SecretKind},
    service,
    snapshot::Snapshot,
    SnapshotUnavailable,
};
use ahash::AHashMap as HashMap;
use std::{fmt, sync::Arc, time::Instant};
use topology_controller_core::{
    graph::InvariantViolation, Condition, Conditions, Graph, ObjectRef, Owner, Reason, Route,
    SecretRef, Service, VirtualHost, VirtualHostConflict, VirtualHostKey,
};
use topology_controller_k8s_api as k8s;

/// Accumulates a [`Graph`] and the conditions describing how each object
/// contributed to it. A builder lives for exactly one build.
#[derive(Debug)]
pub struct Builder {
    graph: Graph,
    services: HashMap<ServiceKey, Arc<Service>>,
    secrets: HashMap<(SecretRef, SecretKind), Result<(), SecretError>>,
    conditions: Conditions,
    deadline: Option<Instant>,
}

/// The result of a successful build.
#[derive(Clone, Debug, PartialEq)]
pub struct Build {
    pub graph: Graph,
    pub conditions: Vec<Condition>,
}

/// Failures that abort a build. Nothing is published when a build fails.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    SnapshotUnavailable(#[from] SnapshotUnavailable),

    #[error("build exceeded its deadline")]
    TimedOut,

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service {name:?} does not exist in namespace {namespace:?}")]
    NotFound { namespace: String, name: String },

    #[error("service {name:?} in namespace {namespace:?} has no port {port}")]
    PortNotFound {
        namespace: String,
        name: String,
        port: PortRef,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error(transparent)]
    VirtualHost(#[from] VirtualHostConflict),
}

/// References a service port by number or by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ServiceKey {
    namespace: String,
    name: String,
    port: u16,
}

// === impl Builder ===

impl Builder {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            graph: Graph::default(),
            services: HashMap::new(),
            secrets: HashMap::new(),
            conditions: Conditions::default(),
            deadline,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    pub fn ensure_virtual_host(&mut self, key: VirtualHostKey) -> &mut VirtualHost {
        self.graph.ensure_virtual_host(key)
    }

    /// Ensures the virtual host exists and is owned by `owner`.
    ///
    /// The secure and insecure hosts for a hostname always have the same
    /// owner, so a claim also fails if the other one is owned by someone else.
    pub fn claim_virtual_host(
        &mut self,
        key: VirtualHostKey,
        owner: &Owner,
    ) -> Result<&mut VirtualHost, ConflictError> {
        let sibling = VirtualHostKey {
            hostname: key.hostname.clone(),
            secure: !key.secure,
        };
        if let Some(existing) = self.graph.virtual_host(&sibling).and_then(|vh| vh.owner()) {
            if existing != owner {
                return Err(VirtualHostConflict {
                    hostname: key.hostname,
                    owner: existing.clone(),
                }
                .into());
            }
        }

        let vhost = self.graph.ensure_virtual_host(key);
        vhost.claim(owner)?;
        Ok(vhost)
    }

    /// Resolves a service port.
    ///
    /// Each distinct namespace, name and port is resolved once per build;
    /// subsequent references share the same [`Service`].
    pub fn ensure_service(
        &mut self,
        snapshot: &Snapshot,
        namespace: &str,
        name: &str,
        port: &PortRef,
    ) -> Result<Arc<Service>, ServiceError> {
        let svc = snapshot
            .get::<k8s::Service>(namespace, name)
            .ok_or_else(|| ServiceError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        let svc_port =
            service::find_port(svc, port).ok_or_else(|| ServiceError::PortNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
                port: port.clone(),
            })?;

        let key = ServiceKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port: svc_port.port,
        };
        let service = self
            .services
            .entry(key)
            .or_insert_with(|| Arc::new(service::resolve(svc, namespace, name, svc_port)));
        Ok(service.clone())
    }

    /// Validates that `secret` holds a usable certificate and key and may be
    /// referenced from `namespace`.
    pub(crate) fn tls_secret(
        &mut self,
        snapshot: &Snapshot,
        secret: &SecretRef,
        namespace: &str,
    ) -> Result<(), SecretError> {
        self.secret(snapshot, secret, namespace, SecretKind::Tls)
    }

    /// Validates that `secret` holds a CA bundle and may be referenced from
    /// `namespace`.
    pub(crate) fn ca_secret(
        &mut self,
        snapshot: &Snapshot,
        secret: &SecretRef,
        namespace: &str,
    ) -> Result<(), SecretError> {
        self.secret(snapshot, secret, namespace, SecretKind::Ca)
    }

    fn secret(
        &mut self,
        snapshot: &Snapshot,
        secret: &SecretRef,
        namespace: &str,
        kind: SecretKind,
    ) -> Result<(), SecretError> {
        if !secret::delegation_permits(snapshot, secret, namespace) {
            return Err(SecretError::NotDelegated {
                secret: secret.clone(),
                namespace: namespace.to_string(),
            });
        }
        self.secrets
            .entry((secret.clone(), kind))
            .or_insert_with(|| secret::validate(snapshot, secret, kind))
            .clone()
    }

    /// Adds a route to the virtual host identified by `key`, reporting a
    /// conflict against the route's source if an identical match exists.
    pub fn add_route(&mut self, key: VirtualHostKey, route: Route) -> bool {
        let source = route.source.clone();
        match self.graph.ensure_virtual_host(key).add_route(route) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%source, %error, "Skipping duplicate route");
                self.conditions
                    .reject(&source, Reason::DuplicateRoute, error.to_string());
                false
            }
        }
    }

    /// Claims the virtual host for `owner` and adds a route to it. A claim
    /// conflict is reported against the route's source.
    pub fn add_owned_route(&mut self, key: VirtualHostKey, owner: &Owner, route: Route) -> bool {
        if let Err(error) = self.claim_virtual_host(key.clone(), owner) {
            tracing::debug!(source = %route.source, %error, "Skipping route");
            self.conditions
                .reject(&route.source, Reason::VirtualHostConflict, error.to_string());
            return false;
        }
        self.add_route(key, route)
    }

    pub fn accept(&mut self, object: &ObjectRef) {
        self.conditions.accept(object);
    }

    pub fn reject(&mut self, object: &ObjectRef, reason: Reason, message: impl Into<String>) {
        self.conditions.reject(object, reason, message);
    }

    pub fn check_deadline(&self) -> Result<(), BuildError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(BuildError::TimedOut),
            _ => Ok(()),
        }
    }

    /// Completes the build, verifying the graph's invariants.
    pub fn finish(self) -> Result<Build, BuildError> {
        self.check_deadline()?;
        self.graph.check_invariants()?;
        Ok(Build {
            graph: self.graph,
            conditions: self.conditions.into_vec(),
        })
    }
}

// === impl PortRef ===

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Name(n) => write!(f, "{n:?}"),
        }
    }
}
