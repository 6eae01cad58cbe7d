#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod labels;
pub mod projectcontour;
pub mod service_apis;

pub use self::{
    duration::Timeout,
    labels::{Labels, Selector},
    projectcontour::{HttpProxy, TlsCertificateDelegation},
    service_apis::HttpRoute,
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Secret, Service, ServicePort, ServiceSpec},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client, Error,
};

/// Annotation keys read from routing objects and services.
pub mod annotations {
    pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
    pub const CONTOUR_INGRESS_CLASS: &str = "projectcontour.io/ingress.class";
    pub const FORCE_SSL_REDIRECT: &str = "ingress.kubernetes.io/force-ssl-redirect";
    pub const ALLOW_HTTP: &str = "kubernetes.io/ingress.allow-http";
    pub const WEBSOCKET_ROUTES: &str = "projectcontour.io/websocket-routes";
    pub const RESPONSE_TIMEOUT: &str = "projectcontour.io/response-timeout";

    /// Prefix of the per-protocol annotations listing the service ports that
    /// speak that protocol, e.g. `projectcontour.io/upstream-protocol.h2c`.
    pub const UPSTREAM_PROTOCOL_PREFIX: &str = "projectcontour.io/upstream-protocol.";
}
