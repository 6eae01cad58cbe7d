use crate::PortRef;
use topology_controller_core::{Protocol, Service};
use topology_controller_k8s_api::{self as k8s, annotations, ResourceExt};

/// A service port that matched a [`PortRef`].
#[derive(Copy, Clone, Debug)]
pub(crate) struct ResolvedPort<'s> {
    pub port: u16,
    pub name: Option<&'s str>,
}

pub(crate) fn find_port<'s>(svc: &'s k8s::Service, port: &PortRef) -> Option<ResolvedPort<'s>> {
    let ports = svc.spec.as_ref()?.ports.as_ref()?;
    let svc_port = ports.iter().find(|p| match port {
        PortRef::Number(n) => p.port == i32::from(*n),
        PortRef::Name(name) => p.name.as_deref() == Some(name.as_str()),
    })?;
    Some(ResolvedPort {
        port: u16::try_from(svc_port.port).ok()?,
        name: svc_port.name.as_deref(),
    })
}

pub(crate) fn resolve(
    svc: &k8s::Service,
    namespace: &str,
    name: &str,
    port: ResolvedPort<'_>,
) -> Service {
    let external_name = svc
        .spec
        .as_ref()
        .filter(|spec| spec.type_.as_deref() == Some("ExternalName"))
        .and_then(|spec| spec.external_name.clone());
    Service {
        namespace: namespace.to_string(),
        name: name.to_string(),
        port: port.port,
        port_name: port.name.map(ToString::to_string),
        protocol: upstream_protocol(svc, port),
        external_name,
    }
}

/// Reads the `projectcontour.io/upstream-protocol.<protocol>` annotations,
/// each holding a comma-separated list of port names or numbers.
fn upstream_protocol(svc: &k8s::Service, port: ResolvedPort<'_>) -> Protocol {
    let number = port.port.to_string();
    for (key, value) in svc.annotations() {
        let Some(protocol) = key.strip_prefix(annotations::UPSTREAM_PROTOCOL_PREFIX) else {
            continue;
        };
        let selected = value
            .split(',')
            .map(str::trim)
            .any(|p| p == number || Some(p) == port.name);
        if !selected {
            continue;
        }
        match protocol.parse() {
            Ok(protocol) => return protocol,
            Err(error) => {
                tracing::debug!(service = %svc.name_unchecked(), %error, "Ignoring upstream protocol annotation");
            }
        }
    }
    Protocol::Http1
}
