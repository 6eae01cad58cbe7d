use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// HTTPProxy is an Ingress-like resource that supports delegating parts of
/// its path space to HTTPProxies in other namespaces.
///
/// An HTTPProxy with a `virtualhost` is a root: it owns the virtual host named
/// by its `fqdn`. HTTPProxies without a `virtualhost` only take effect when
/// they are included by a root, directly or through other includes.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    root = "HttpProxy",
    status = "HttpProxyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    /// Virtualhost appears at most once. If it is present, the object is
    /// considered to be a root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,

    /// Routes are the ingress routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// Includes allow for specific routing configuration to be included from
    /// another HTTPProxy, possibly in another namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// The fully qualified domain name of the root of the ingress tree.
    /// Wildcards are not supported.
    pub fqdn: String,

    /// If present the fields describe TLS properties of the virtual host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    /// The name of a TLS secret in the current namespace, or a
    /// `namespace/name` reference to a secret delegated to this namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Minimum TLS version this vhost should negotiate: `1.2` (the default)
    /// or `1.3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_protocol_version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    /// Name of the HTTPProxy.
    pub name: String,

    /// Namespace of the HTTPProxy to include. Defaults to the current
    /// namespace if not supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Conditions are a set of routing properties that are applied to an
    /// HTTPProxy in a namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,
}

/// A set of conditions that must all be satisfied for a route or include to
/// match. Each condition may set either `prefix` or `header`.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderMatchCondition>,
}

/// Specifies how to conditionally match against HTTP headers. Exactly one of
/// the match kinds should be set.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatchCondition {
    pub name: String,

    #[serde(default)]
    pub present: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(
        default,
        rename = "notcontains",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, rename = "notexact", skip_serializing_if = "Option::is_none")]
    pub not_exact: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,

    /// Services are the services to proxy traffic.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    /// Enables websocket support for the route.
    #[serde(default)]
    pub enable_websockets: bool,

    /// Allow this path to respond to insecure requests over HTTP which are
    /// normally not permitted when a `virtualhost.tls` block is present.
    #[serde(default)]
    pub permit_insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<TimeoutPolicy>,

    /// The health check policy for this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_policy: Option<HttpHealthCheckPolicy>,

    /// The policy for redirecting the request instead of forwarding it to
    /// services. Mutually exclusive with `services`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_redirect_policy: Option<HttpRequestRedirectPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Name is the name of Kubernetes service to proxy traffic.
    pub name: String,

    /// Port (defined as Integer) to proxy traffic to since a service can have
    /// multiple defined.
    pub port: i32,

    /// Weight defines percentage of traffic to balance traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    /// Protocol may be used to specify (or override) the protocol used to
    /// reach this Service: `h2`, `h2c` or `tls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// UpstreamValidation defines how to verify the backend service's
    /// certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<UpstreamValidation>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamValidation {
    /// Name of the Kubernetes secret be used to validate the certificate
    /// presented by the backend.
    pub ca_secret: String,

    /// Key which is expected to be present in the 'subjectAltName' of the
    /// presented certificate.
    pub subject_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPolicy {
    /// Timeout for receiving a response from the server after processing a
    /// request from client. If not supplied the proxy's default is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheckPolicy {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy_threshold_count: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestRedirectPolicy {
    /// The scheme to use for the redirect, `http` or `https`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// The HTTP status code to be used in the redirect response: 301 or 302.
    /// Defaults to 302.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxyStatus {
    /// `valid`, `invalid` or `orphaned`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
