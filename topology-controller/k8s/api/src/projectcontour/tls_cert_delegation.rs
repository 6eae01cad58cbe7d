/// Grants other namespaces permission to reference secrets in the namespace
/// of the delegation.
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
    kind = "TLSCertificateDelegation",
    root = "TlsCertificateDelegation",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TlsCertificateDelegationSpec {
    #[serde(default)]
    pub delegations: Vec<CertificateDelegation>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDelegation {
    /// The name of a secret in the delegation's namespace.
    pub secret_name: String,

    /// Namespaces that may reference the secret. `*` permits all namespaces.
    #[serde(default)]
    pub target_namespaces: Vec<String>,
}

impl CertificateDelegation {
    pub fn permits(&self, namespace: &str) -> bool {
        self.target_namespaces
            .iter()
            .any(|ns| ns == "*" || ns == namespace)
    }
}
