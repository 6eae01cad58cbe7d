//! The `networking.x-k8s.io/v1alpha1` service APIs.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// HTTPRoute is the Schema for the HTTPRoute resource.
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
    group = "networking.x-k8s.io",
    version = "v1alpha1",
    kind = "HTTPRoute",
    root = "HttpRoute",
    status = "HttpRouteStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Hostnames defines a set of hostname that should match against the HTTP
    /// Host header to select a HTTPRoute to process the request. An empty list
    /// matches all hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostnames: Option<Vec<String>>,

    /// Rules are a list of HTTP matchers, filters and actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<HttpRouteRule>>,

    /// TLS configuration for the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTlsConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Matches define conditions used for matching the rule against incoming
    /// HTTP requests. Each match is independent, i.e. this rule will be matched
    /// if **any** one of the matches is satisfied.
    ///
    /// If no matches are specified, the default is a prefix path match on
    /// "/", which has the effect of matching every HTTP request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<HttpRouteMatch>>,

    /// ForwardTo defines the backend(s) where matching requests should be
    /// sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_to: Option<Vec<HttpRouteForwardTo>>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path specifies a HTTP request path matcher. If this field is not
    /// specified, a default prefix match on the "/" path is provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    /// Type specifies how to match against the path Value. Defaults to
    /// `Prefix`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<PathMatchType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub enum PathMatchType {
    Exact,
    Prefix,
    RegularExpression,
    ImplementationSpecific,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteForwardTo {
    /// ServiceName refers to the name of the Service to forward matched
    /// requests to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Port specifies the destination port number to use for the Service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Weight specifies the proportion of traffic forwarded to the target.
    /// Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTlsConfig {
    pub certificate_ref: Option<LocalObjectReference>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_match_type() {
        let m = serde_json::from_value::<HttpRouteMatch>(serde_json::json!({
            "path": { "type": "RegularExpression", "value": "/v[0-9]+" },
        }))
        .unwrap();
        let path = m.path.unwrap();
        assert_eq!(path.type_, Some(PathMatchType::RegularExpression));
        assert_eq!(path.value.as_deref(), Some("/v[0-9]+"));
    }

    #[test]
    fn forward_to_without_service_name() {
        let rule = serde_json::from_value::<HttpRouteRule>(serde_json::json!({
            "forwardTo": [{ "port": 80 }],
        }))
        .unwrap();
        let targets = rule.forward_to.unwrap();
        assert_eq!(targets[0].service_name, None);
        assert_eq!(targets[0].port, Some(80));
        assert!(rule.matches.is_none());
    }
}
