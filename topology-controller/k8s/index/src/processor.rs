mod http_route;
mod httpproxy;
mod ingress;

pub use self::{
    http_route::HttpRouteProcessor, httpproxy::HttpProxyProcessor, ingress::IngressProcessor,
};
use crate::{snapshot::ObjectKey, BuildError, Builder, Snapshot};
use topology_controller_core::{ObjectRef, SourceKind};

/// Translates one routing schema into the graph.
///
/// Processors only read the snapshot and only add to the builder. They hold
/// no state between builds.
pub trait Processor {
    fn name(&self) -> &'static str;

    fn run(&self, snapshot: &Snapshot, builder: &mut Builder) -> Result<(), BuildError>;
}

pub(crate) fn object_ref(kind: SourceKind, key: &ObjectKey) -> ObjectRef {
    ObjectRef::new(kind, key.namespace.clone(), key.name.clone())
}
