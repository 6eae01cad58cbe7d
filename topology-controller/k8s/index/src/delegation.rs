use crate::{
    ingress_class, match_conditions::MatchSet, processor::object_ref, snapshot::ObjectKey,
    BuildError, Builder, Snapshot,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use topology_controller_core::{ObjectRef, Reason, SourceKind};
use topology_controller_k8s_api::{projectcontour::httpproxy, HttpProxy};

/// The `HTTPProxy` objects eligible for a build, addressable by index.
pub(crate) struct Tree<'s> {
    nodes: Vec<Node<'s>>,
    by_key: HashMap<&'s ObjectKey, usize>,
}

pub(crate) struct Node<'s> {
    pub key: &'s ObjectKey,
    pub proxy: &'s HttpProxy,
    pub object: ObjectRef,
}

/// A route reached from a root, carrying the conditions accumulated along
/// the include path that reached it.
pub(crate) struct PendingRoute<'s> {
    pub node: usize,
    pub route: &'s httpproxy::Route,
    pub conditions: MatchSet,
}

struct Frame {
    node: usize,
    conditions: MatchSet,
    next_include: usize,
}

// === impl Tree ===

impl<'s> Tree<'s> {
    pub(crate) fn new(snapshot: &'s Snapshot, ingress_class: Option<&str>) -> Self {
        let mut nodes = Vec::new();
        let mut by_key = HashMap::new();
        for (key, proxy) in snapshot.iter::<HttpProxy>() {
            let class = ingress_class::class_of(&proxy.metadata, None);
            if !ingress_class::matches(class, ingress_class) {
                tracing::trace!(%key, ?class, "Ignoring HTTPProxy with another class");
                continue;
            }
            by_key.insert(key, nodes.len());
            nodes.push(Node {
                key,
                proxy: &**proxy,
                object: object_ref(SourceKind::HttpProxy, key),
            });
        }
        Self { nodes, by_key }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, idx: usize) -> &Node<'s> {
        &self.nodes[idx]
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node<'s>> {
        self.nodes.iter()
    }

    /// Indexes of proxies that define a virtual host, in `namespace/name`
    /// order.
    pub(crate) fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_root())
            .map(|(idx, _)| idx)
    }

    fn find(&self, namespace: &str, name: &str) -> Option<usize> {
        self.by_key.get(&ObjectKey::new(namespace, name)).copied()
    }

    /// Walks the include graph from `root`, returning every route reachable
    /// from it.
    ///
    /// Proxies reached by the walk are marked in `visited`. Includes that
    /// would re-enter a proxy already on the current path form a cycle: each
    /// proxy on the cycle contributes no routes, and the includer that closes
    /// the cycle is rejected once.
    pub(crate) fn walk(
        &self,
        root: usize,
        builder: &mut Builder,
        visited: &mut [bool],
    ) -> Result<Vec<PendingRoute<'s>>, BuildError> {
        let mut routes = Vec::new();
        let mut in_cycle = HashSet::new();

        visited[root] = true;
        self.collect_routes(root, &MatchSet::default(), builder, &mut routes);
        let mut path = vec![Frame {
            node: root,
            conditions: MatchSet::default(),
            next_include: 0,
        }];

        while let Some(frame) = path.last_mut() {
            builder.check_deadline()?;

            let includer = &self.nodes[frame.node];
            let Some(include) = includer.proxy.spec.includes.get(frame.next_include) else {
                path.pop();
                continue;
            };
            frame.next_include += 1;
            let parent_conditions = frame.conditions.clone();

            let include_conditions = match MatchSet::parse(&include.conditions) {
                Ok(conditions) => conditions,
                Err(error) => {
                    builder.reject(&includer.object, Reason::InvalidMatch, error.to_string());
                    continue;
                }
            };

            let namespace = include
                .namespace
                .as_deref()
                .unwrap_or(&includer.key.namespace);
            let Some(child) = self.find(namespace, &include.name) else {
                builder.reject(
                    &includer.object,
                    Reason::IncludeNotFound,
                    format!("include {namespace}/{} not found", include.name),
                );
                continue;
            };

            if let Some(pos) = path.iter().position(|f| f.node == child) {
                let chain = path[pos..]
                    .iter()
                    .map(|f| self.nodes[f.node].key.to_string())
                    .chain(Some(self.nodes[child].key.to_string()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                in_cycle.extend(path[pos..].iter().map(|f| f.node));
                tracing::debug!(%chain, "Include cycle");
                builder.reject(
                    &includer.object,
                    Reason::IncludeCycle,
                    format!("include creates a cycle: {chain}"),
                );
                continue;
            }

            if self.nodes[child].is_root() {
                builder.reject(
                    &includer.object,
                    Reason::RootIncludesRoot,
                    format!(
                        "root httpproxy cannot include another root httpproxy {}",
                        self.nodes[child].key
                    ),
                );
                continue;
            }

            let conditions = parent_conditions.merge(&include_conditions);
            visited[child] = true;
            self.collect_routes(child, &conditions, builder, &mut routes);
            path.push(Frame {
                node: child,
                conditions,
                next_include: 0,
            });
        }

        routes.retain(|route| !in_cycle.contains(&route.node));
        Ok(routes)
    }

    fn collect_routes(
        &self,
        idx: usize,
        parent: &MatchSet,
        builder: &mut Builder,
        routes: &mut Vec<PendingRoute<'s>>,
    ) {
        let node = &self.nodes[idx];
        for route in &node.proxy.spec.routes {
            match MatchSet::parse(&route.conditions) {
                Ok(conditions) => routes.push(PendingRoute {
                    node: idx,
                    route,
                    conditions: parent.merge(&conditions),
                }),
                Err(error) => {
                    builder.reject(&node.object, Reason::InvalidMatch, error.to_string());
                }
            }
        }
    }
}

// === impl Node ===

impl Node<'_> {
    pub(crate) fn is_root(&self) -> bool {
        self.proxy.spec.virtualhost.is_some()
    }
}
