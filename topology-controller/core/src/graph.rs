use crate::{ObjectRef, RouteMatch, SourceKind};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

/// The canonical topology produced by one build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    virtual_hosts: BTreeMap<VirtualHostKey, VirtualHost>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualHostKey {
    pub hostname: String,
    pub secure: bool,
}

/// Identifies who may contribute routes to a virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// A single object owns the host, e.g. a root `HTTPProxy`.
    Exclusive(ObjectRef),
    /// All objects of one schema share the host.
    Shared(SourceKind),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualHost {
    hostname: String,
    secure: bool,
    owner: Option<Owner>,
    tls: Option<TlsConfig>,
    routes: BTreeMap<RouteMatch, Route>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub route_match: RouteMatch,
    pub action: RouteAction,
    pub websocket: bool,
    pub timeout: Option<Duration>,

    /// The object that defined this route.
    pub source: ObjectRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteAction {
    /// Splits traffic over one or more clusters by relative weight.
    Forward(Arc<[Cluster]>),
    Redirect(Redirect),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub scheme: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub status: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    pub upstream: Arc<Service>,
    pub weight: u32,
    pub protocol: Protocol,
    pub health_check: Option<HealthCheckPolicy>,
    pub validation: Option<UpstreamValidation>,
}

/// A resolved upstream service port.
///
/// Services are only constructed by the build's resolver so that every
/// reference to the same namespace, name and port shares one instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub port: u16,
    pub port_name: Option<String>,
    pub protocol: Protocol,
    pub external_name: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    #[default]
    Http1,
    /// HTTP/2 over TLS.
    H2,
    /// HTTP/2 over cleartext.
    H2c,
    /// TLS origination with HTTP/1.
    Tls,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    pub secret: SecretRef,
    pub minimum_version: TlsVersion,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    #[default]
    V1_2,
    V1_3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    pub path: String,
    pub host: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamValidation {
    pub ca_secret: SecretRef,
    pub subject_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("duplicate route {route_match} on virtual host {hostname:?}; already defined by {existing}")]
pub struct DuplicateRoute {
    pub hostname: String,
    pub route_match: RouteMatch,
    pub existing: ObjectRef,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("virtual host {hostname:?} is already owned by {owner}")]
pub struct VirtualHostConflict {
    pub hostname: String,
    pub owner: Owner,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("graph invariant violated: {0}")]
pub struct InvariantViolation(pub String);

// === impl Graph ===

impl Graph {
    /// Returns the virtual host registered for `key`, creating it if needed.
    pub fn ensure_virtual_host(&mut self, key: VirtualHostKey) -> &mut VirtualHost {
        match self.virtual_hosts.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let vhost = VirtualHost::new(entry.key());
                entry.insert(vhost)
            }
        }
    }

    pub fn virtual_host(&self, key: &VirtualHostKey) -> Option<&VirtualHost> {
        self.virtual_hosts.get(key)
    }

    pub fn insecure(&self, hostname: &str) -> Option<&VirtualHost> {
        self.virtual_host(&VirtualHostKey::insecure(hostname))
    }

    pub fn secure(&self, hostname: &str) -> Option<&VirtualHost> {
        self.virtual_host(&VirtualHostKey::secure(hostname))
    }

    /// Iterates over virtual hosts ordered by hostname, insecure first.
    pub fn virtual_hosts(&self) -> impl Iterator<Item = &VirtualHost> {
        self.virtual_hosts.values()
    }

    pub fn len(&self) -> usize {
        self.virtual_hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.virtual_hosts.is_empty()
    }

    pub fn route_count(&self) -> usize {
        self.virtual_hosts.values().map(|vh| vh.routes.len()).sum()
    }

    /// Verifies the structural invariants that the builder is responsible
    /// for maintaining.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (key, vhost) in &self.virtual_hosts {
            if *key != vhost.key() {
                return Err(InvariantViolation(format!(
                    "virtual host {:?} registered under key {key:?}",
                    vhost.hostname
                )));
            }
            if vhost.secure && vhost.tls.is_none() {
                return Err(InvariantViolation(format!(
                    "secure virtual host {:?} has no TLS configuration",
                    vhost.hostname
                )));
            }
            for (route_match, route) in &vhost.routes {
                if *route_match != route.route_match {
                    return Err(InvariantViolation(format!(
                        "route {} registered under match {route_match}",
                        route.route_match
                    )));
                }
                if let RouteAction::Forward(clusters) = &route.action {
                    if clusters.is_empty() {
                        return Err(InvariantViolation(format!(
                            "route {route_match} on {:?} forwards to no clusters",
                            vhost.hostname
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// === impl VirtualHostKey ===

impl VirtualHostKey {
    pub fn insecure(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            secure: false,
        }
    }

    pub fn secure(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            secure: true,
        }
    }
}

impl fmt::Display for VirtualHostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.hostname)
    }
}

// === impl Owner ===

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive(object) => fmt::Display::fmt(object, f),
            Self::Shared(kind) => write!(f, "{} resources", kind.as_str()),
        }
    }
}

// === impl VirtualHost ===

impl VirtualHost {
    fn new(key: &VirtualHostKey) -> Self {
        Self {
            hostname: key.hostname.clone(),
            secure: key.secure,
            owner: None,
            tls: None,
            routes: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> VirtualHostKey {
        VirtualHostKey {
            hostname: self.hostname.clone(),
            secure: self.secure,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    pub fn set_tls(&mut self, tls: TlsConfig) {
        self.tls = Some(tls);
    }

    /// Records `owner` as the owner of this host if it is unclaimed, or
    /// checks that the existing owner matches.
    pub fn claim(&mut self, owner: &Owner) -> Result<(), VirtualHostConflict> {
        match &self.owner {
            None => {
                self.owner = Some(owner.clone());
                Ok(())
            }
            Some(existing) if existing == owner => Ok(()),
            Some(existing) => Err(VirtualHostConflict {
                hostname: self.hostname.clone(),
                owner: existing.clone(),
            }),
        }
    }

    /// Routes ordered from most to least specific.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn route(&self, route_match: &RouteMatch) -> Option<&Route> {
        self.routes.get(route_match)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Adds a route, failing if a route with an identical match already
    /// exists. The existing route is never replaced.
    pub fn add_route(&mut self, route: Route) -> Result<(), DuplicateRoute> {
        match self.routes.entry(route.route_match.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(route);
                Ok(())
            }
            Entry::Occupied(entry) => Err(DuplicateRoute {
                hostname: self.hostname.clone(),
                route_match: route.route_match,
                existing: entry.get().source.clone(),
            }),
        }
    }
}

// === impl Route ===

impl Route {
    pub fn forward(route_match: RouteMatch, clusters: Arc<[Cluster]>, source: ObjectRef) -> Self {
        Self {
            route_match,
            action: RouteAction::Forward(clusters),
            websocket: false,
            timeout: None,
            source,
        }
    }

    pub fn redirect(route_match: RouteMatch, redirect: Redirect, source: ObjectRef) -> Self {
        Self {
            route_match,
            action: RouteAction::Redirect(redirect),
            websocket: false,
            timeout: None,
            source,
        }
    }

    /// The clusters this route forwards to; empty for redirects.
    pub fn clusters(&self) -> &[Cluster] {
        match &self.action {
            RouteAction::Forward(clusters) => clusters,
            RouteAction::Redirect(_) => &[],
        }
    }

    pub fn redirect_action(&self) -> Option<&Redirect> {
        match &self.action {
            RouteAction::Redirect(redirect) => Some(redirect),
            RouteAction::Forward(_) => None,
        }
    }
}

// === impl Redirect ===

impl Redirect {
    /// Upgrades plaintext requests to HTTPS with a permanent redirect.
    pub fn https() -> Self {
        Self {
            scheme: Some("https".to_string()),
            hostname: None,
            port: None,
            status: 301,
        }
    }
}

// === impl Cluster ===

impl Cluster {
    /// A cluster with unit weight that inherits the service's protocol.
    pub fn new(upstream: Arc<Service>) -> Self {
        Self {
            protocol: upstream.protocol,
            upstream,
            weight: 1,
            health_check: None,
            validation: None,
        }
    }
}

// === impl Service ===

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

// === impl Protocol ===

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h2" => Ok(Self::H2),
            "h2c" => Ok(Self::H2c),
            "tls" => Ok(Self::Tls),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported upstream protocol {0:?}; expected one of h2, h2c, tls")]
pub struct UnknownProtocol(pub String);

// === impl SecretRef ===

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl TlsVersion ===

impl FromStr for TlsVersion {
    type Err = UnknownTlsVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "1.2" => Ok(Self::V1_2),
            "1.3" => Ok(Self::V1_3),
            _ => Err(UnknownTlsVersion(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid minimum TLS protocol version {0:?}; expected 1.2 or 1.3")]
pub struct UnknownTlsVersion(pub String);
