//! Topology synthesis
//!
//! Routing intent is read from a cache of the following cluster resources:
//!
//! - `HTTPProxy` roots own a virtual host and may include other `HTTPProxy`
//!   objects, possibly across namespaces, delegating a part of their path
//!   space to them.
//! - `Ingress` rules contribute routes to hosts shared by all Ingresses.
//! - `HTTPRoute` (`networking.x-k8s.io/v1alpha1`) rules contribute prefix
//!   routes to hosts shared by all HTTPRoutes.
//! - `Service`, `Secret` and `TLSCertificateDelegation` objects are resolved
//!   by reference from the above.
//!
//! ```text
//! [ Cache ] -> [ Snapshot ] -> [ Processor ]* -> [ Builder ] -> [ Graph ]
//!                                                     \-> [ Conditions ]
//! ```
//!
//! Every change to the cache bumps a generation counter. The [`Engine`] waits
//! on that counter, takes a consistent snapshot of the cache, runs each
//! processor against it in a fixed order and, if the build succeeds, publishes
//! the resulting graph and hands the build's conditions to a status sink.
//! Changes that arrive while a build is running are coalesced into the next
//! build.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
pub mod builder;
pub mod cache;
mod delegation;
pub mod engine;
mod ingress_class;
mod match_conditions;
pub mod metrics;
pub mod processor;
mod secret;
mod service;
pub mod snapshot;


pub use self::{
    builder::{Build, BuildError, Builder, ConflictError, PortRef, ServiceError},
    cache::{Cache, SharedCache, SnapshotUnavailable},
    engine::{BuildConfig, Engine},
    match_conditions::MatchError,
    metrics::{BuildMetrics, CacheMetrics},
    processor::Processor,
    secret::SecretError,
    snapshot::{Kind, ObjectKey, Snapshot},
};
