use crate::snapshot::Snapshot;
use topology_controller_core::SecretRef;
use topology_controller_k8s_api::{self as k8s, TlsCertificateDelegation};

const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";
const CA_CERT_KEY: &str = "ca.crt";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SecretKind {
    Tls,
    Ca,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(SecretRef),

    #[error("secret {secret} is not delegated to namespace {namespace:?}")]
    NotDelegated { secret: SecretRef, namespace: String },

    #[error("secret {secret} is missing {key:?}")]
    MissingKey { secret: SecretRef, key: &'static str },

    #[error("secret {secret} has an invalid {key:?}: {reason}")]
    Invalid {
        secret: SecretRef,
        key: &'static str,
        reason: String,
    },
}

/// Parses a secret reference, which is either a bare name in the
/// referencing object's namespace or a `namespace/name` pair.
pub(crate) fn parse_ref(namespace: &str, s: &str) -> SecretRef {
    match s.split_once('/') {
        Some((ns, name)) if !ns.is_empty() => SecretRef {
            namespace: ns.to_string(),
            name: name.to_string(),
        },
        Some((_, name)) => SecretRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        None => SecretRef {
            namespace: namespace.to_string(),
            name: s.to_string(),
        },
    }
}

/// Secrets may always be referenced from their own namespace. Other
/// namespaces must be named by a `TLSCertificateDelegation` in the secret's
/// namespace.
pub(crate) fn delegation_permits(snapshot: &Snapshot, secret: &SecretRef, namespace: &str) -> bool {
    if secret.namespace == namespace {
        return true;
    }
    snapshot
        .iter::<TlsCertificateDelegation>()
        .filter(|(key, _)| key.namespace == secret.namespace)
        .flat_map(|(_, d)| d.spec.delegations.iter())
        .any(|d| d.secret_name == secret.name && d.permits(namespace))
}

pub(crate) fn validate(
    snapshot: &Snapshot,
    secret: &SecretRef,
    kind: SecretKind,
) -> Result<(), SecretError> {
    let obj = snapshot
        .get::<k8s::Secret>(&secret.namespace, &secret.name)
        .ok_or_else(|| SecretError::NotFound(secret.clone()))?;
    let data = |key: &'static str| {
        obj.data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| bytes.0.as_slice())
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| SecretError::MissingKey {
                secret: secret.clone(),
                key,
            })
    };
    let invalid = |key: &'static str, reason: String| SecretError::Invalid {
        secret: secret.clone(),
        key,
        reason,
    };

    match kind {
        SecretKind::Tls => {
            let certs = data(TLS_CERT_KEY)?;
            validate_certificates(certs).map_err(|e| invalid(TLS_CERT_KEY, e))?;
            validate_private_key(certs, data(TLS_KEY_KEY)?).map_err(|e| invalid(TLS_KEY_KEY, e))?;
        }
        SecretKind::Ca => {
            validate_certificates(data(CA_CERT_KEY)?).map_err(|e| invalid(CA_CERT_KEY, e))?;
        }
    }
    Ok(())
}

/// Requires at least one PEM certificate block and that every certificate
/// block parses as X.509.
fn validate_certificates(bytes: &[u8]) -> Result<(), String> {
    let blocks = pem::parse_many(bytes).map_err(|e| e.to_string())?;
    let mut found = false;
    for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
        x509_parser::parse_x509_certificate(block.contents()).map_err(|e| e.to_string())?;
        found = true;
    }
    if !found {
        return Err("no PEM certificates found".to_string());
    }
    Ok(())
}

/// Requires a private key that parses and whose public key is the one in the
/// leaf (first) certificate.
fn validate_private_key(certs: &[u8], key: &[u8]) -> Result<(), String> {
    let mut reader = key;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no PEM private key found".to_string())?;
    let key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|e| e.to_string())?;
    let public_key = key
        .public_key()
        .ok_or_else(|| "unsupported private key algorithm".to_string())?;
    let public_key: &[u8] = public_key.as_ref();

    let leaf = pem::parse_many(certs)
        .map_err(|e| e.to_string())?
        .into_iter()
        .find(|b| b.tag() == "CERTIFICATE")
        .ok_or_else(|| "no PEM certificates found".to_string())?;
    let (_, leaf) =
        x509_parser::parse_x509_certificate(leaf.contents()).map_err(|e| e.to_string())?;
    if leaf.public_key().raw != public_key {
        return Err("private key does not match the certificate".to_string());
    }
    Ok(())
}
