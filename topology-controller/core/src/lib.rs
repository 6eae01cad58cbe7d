//! Canonical proxy topology.
//!
//! A [`Graph`] maps virtual hosts to the routes they serve and each route to
//! the weighted upstream [`Cluster`]s it forwards to. Graphs are assembled by
//! the synthesis engine from a snapshot of routing-intent objects and are
//! immutable once published.
//!
//! ```text
//! [ VirtualHost (hostname, secure) ] -> [ Route (match) ] -> [ Cluster ] -> [ Service ]
//! ```
//!
//! Every object that contributed (or failed to contribute) to a graph is
//! described by a set of [`Condition`]s which are handed to a [`StatusSink`]
//! after the build completes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod condition;
pub mod graph;
pub mod route_match;


pub use self::{
    condition::{Condition, Conditions, ObjectRef, Reason, SourceKind, StatusSink},
    graph::{
        Cluster, DuplicateRoute, Graph, HealthCheckPolicy, InvariantViolation, Owner, Protocol,
        Redirect, Route, RouteAction, SecretRef, Service, TlsConfig, TlsVersion, UnknownProtocol,
        UnknownTlsVersion, UpstreamValidation, VirtualHost, VirtualHostConflict, VirtualHostKey,
    },
    route_match::{HeaderMatch, HeaderMatchKind, PathMatch, QueryParamMatch, RouteMatch},
};

/// The hostname used for virtual hosts that match any host.
pub const WILDCARD_HOST: &str = "*";
