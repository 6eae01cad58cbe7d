use std::{collections::BTreeMap, fmt, sync::Arc};
use topology_controller_k8s_api::{
    self as k8s, HttpProxy, HttpRoute, Ingress, ResourceExt, Secret, Selector, Service,
    TlsCertificateDelegation,
};

/// Identifies a namespaced object. Objects are iterated in `namespace/name`
/// order so that every build visits them in the same order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

pub type Objects<T> = BTreeMap<ObjectKey, Arc<T>>;

/// A point-in-time view of every watched resource.
///
/// Cloning a snapshot only clones the object maps; the objects themselves are
/// shared.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    http_proxies: Objects<HttpProxy>,
    ingresses: Objects<Ingress>,
    http_routes: Objects<HttpRoute>,
    services: Objects<Service>,
    secrets: Objects<Secret>,
    delegations: Objects<TlsCertificateDelegation>,
}

/// A resource kind held by a [`Snapshot`].
pub trait Kind: k8s::Resource<DynamicType = ()> + Sized {
    const KIND: &'static str;

    fn objects(snapshot: &Snapshot) -> &Objects<Self>;
    fn objects_mut(snapshot: &mut Snapshot) -> &mut Objects<Self>;
}

macro_rules! impl_kind {
    ($ty:ty, $field:ident, $kind:literal) => {
        impl Kind for $ty {
            const KIND: &'static str = $kind;

            fn objects(snapshot: &Snapshot) -> &Objects<Self> {
                &snapshot.$field
            }

            fn objects_mut(snapshot: &mut Snapshot) -> &mut Objects<Self> {
                &mut snapshot.$field
            }
        }
    };
}

impl_kind!(HttpProxy, http_proxies, "HTTPProxy");
impl_kind!(Ingress, ingresses, "Ingress");
impl_kind!(HttpRoute, http_routes, "HTTPRoute");
impl_kind!(Service, services, "Service");
impl_kind!(Secret, secrets, "Secret");
impl_kind!(TlsCertificateDelegation, delegations, "TLSCertificateDelegation");

// === impl ObjectKey ===

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: k8s::Resource>(obj: &K) -> Self {
        let namespace = obj.namespace().expect("namespaced resource must have a namespace");
        Self {
            namespace,
            name: obj.name_unchecked(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// Lists objects of kind `K` whose labels match `selector`, optionally
    /// restricted to one namespace.
    pub fn list<'s, K: Kind + 's>(
        &'s self,
        namespace: Option<&'s str>,
        selector: &'s Selector,
    ) -> impl Iterator<Item = &'s Arc<K>> + 's {
        K::objects(self)
            .iter()
            .filter(move |(key, _)| namespace.map(|ns| key.namespace == ns).unwrap_or(true))
            .filter(move |(_, obj)| {
                selector.is_everything()
                    || obj
                        .meta()
                        .labels
                        .as_ref()
                        .map(|labels| selector.matches(labels))
                        .unwrap_or_else(|| selector.matches(&Default::default()))
            })
            .map(|(_, obj)| obj)
    }

    pub fn get<K: Kind>(&self, namespace: &str, name: &str) -> Option<&Arc<K>> {
        K::objects(self).get(&ObjectKey::new(namespace, name))
    }

    /// Iterates over all objects of kind `K` in `namespace/name` order.
    pub fn iter<'a, K: Kind + 'a>(&'a self) -> impl Iterator<Item = (&'a ObjectKey, &'a Arc<K>)> {
        K::objects(self).iter()
    }

    pub fn len<K: Kind>(&self) -> usize {
        K::objects(self).len()
    }

    /// Counts the objects of kind `K` in `namespace`.
    pub fn count_in<K: Kind>(&self, namespace: &str) -> usize {
        K::objects(self)
            .keys()
            .filter(|key| key.namespace == namespace)
            .count()
    }

    /// Inserts or replaces an object, returning true if the snapshot changed.
    pub fn insert<K: Kind + PartialEq>(&mut self, obj: K) -> bool {
        let key = ObjectKey::of(&obj);
        let objects = K::objects_mut(self);
        if objects.get(&key).map(|o| **o == obj).unwrap_or(false) {
            return false;
        }
        objects.insert(key, Arc::new(obj));
        true
    }

    pub fn remove<K: Kind>(&mut self, namespace: String, name: String) -> bool {
        K::objects_mut(self)
            .remove(&ObjectKey { namespace, name })
            .is_some()
    }

    /// Replaces all objects of kind `K`.
    pub fn replace<K: Kind>(&mut self, objs: impl IntoIterator<Item = K>) {
        let objects = K::objects_mut(self);
        objects.clear();
        for obj in objs {
            objects.insert(ObjectKey::of(&obj), Arc::new(obj));
        }
    }
}
