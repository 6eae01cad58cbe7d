use topology_controller_core::{HeaderMatch, HeaderMatchKind, PathMatch, RouteMatch};
use topology_controller_k8s_api::projectcontour::httpproxy::{HeaderMatchCondition, MatchCondition};

/// The conditions accumulated along a delegation chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MatchSet {
    prefix: Option<String>,
    headers: Vec<HeaderMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("more than one prefix is not allowed in a condition block")]
    MultiplePrefixes,

    #[error("prefix {0:?} must start with a slash")]
    PrefixWithoutSlash(String),

    #[error("header condition {0:?} must specify exactly one match kind")]
    HeaderMatchKind(String),

    #[error("header condition must specify a name")]
    HeaderName,
}

// === impl MatchSet ===

impl MatchSet {
    pub(crate) fn parse(conditions: &[MatchCondition]) -> Result<Self, MatchError> {
        let mut prefix = None;
        let mut headers = Vec::new();
        for cond in conditions {
            if let Some(p) = cond.prefix.as_deref() {
                if prefix.is_some() {
                    return Err(MatchError::MultiplePrefixes);
                }
                if !p.starts_with('/') {
                    return Err(MatchError::PrefixWithoutSlash(p.to_string()));
                }
                prefix = Some(p.to_string());
            }
            if let Some(header) = cond.header.as_ref() {
                headers.push(header_match(header)?);
            }
        }
        Ok(Self { prefix, headers })
    }

    /// Appends a child's conditions to this set. Prefixes concatenate and
    /// headers accumulate.
    pub(crate) fn merge(&self, child: &Self) -> Self {
        let prefix = match (self.prefix.as_deref(), child.prefix.as_deref()) {
            (Some(parent), Some(child)) => Some(join_prefix(parent, child)),
            (parent, child) => child.or(parent).map(ToString::to_string),
        };
        let mut headers = self.headers.clone();
        headers.extend(child.headers.iter().cloned());
        Self { prefix, headers }
    }

    pub(crate) fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("/")
    }

    pub(crate) fn route_match(&self) -> RouteMatch {
        RouteMatch::new(
            PathMatch::Prefix(self.prefix().to_string()),
            self.headers.iter().cloned(),
            None,
        )
    }
}

fn join_prefix(parent: &str, child: &str) -> String {
    if parent.is_empty() || parent == "/" {
        return child.to_string();
    }
    if child.is_empty() || child == "/" {
        return parent.to_string();
    }
    format!("{}{}", parent.trim_end_matches('/'), child)
}

fn header_match(header: &HeaderMatchCondition) -> Result<HeaderMatch, MatchError> {
    if header.name.is_empty() {
        return Err(MatchError::HeaderName);
    }
    let mut kinds = Vec::with_capacity(1);
    if header.present {
        kinds.push(HeaderMatchKind::Present);
    }
    if let Some(v) = &header.exact {
        kinds.push(HeaderMatchKind::Exact(v.clone()));
    }
    if let Some(v) = &header.not_exact {
        kinds.push(HeaderMatchKind::NotExact(v.clone()));
    }
    if let Some(v) = &header.contains {
        kinds.push(HeaderMatchKind::Contains(v.clone()));
    }
    if let Some(v) = &header.not_contains {
        kinds.push(HeaderMatchKind::NotContains(v.clone()));
    }
    match kinds.pop() {
        Some(kind) if kinds.is_empty() => Ok(HeaderMatch::new(&header.name, kind)),
        _ => Err(MatchError::HeaderMatchKind(header.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(p: &str) -> MatchCondition {
        MatchCondition {
            prefix: Some(p.to_string()),
            header: None,
        }
    }

    fn header(name: &str, exact: &str) -> MatchCondition {
        MatchCondition {
            prefix: None,
            header: Some(HeaderMatchCondition {
                name: name.to_string(),
                exact: Some(exact.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn joins_prefixes() {
        for (parent, child, expected) in [
            ("/", "/api", "/api"),
            ("/api", "/", "/api"),
            ("/api", "/v1", "/api/v1"),
            ("/api/", "/v1", "/api/v1"),
            ("", "/v1", "/v1"),
        ] {
            assert_eq!(join_prefix(parent, child), expected, "{parent} + {child}");
        }
    }

    #[test]
    fn merges_down_a_chain() {
        let root = MatchSet::parse(&[prefix("/blog"), header("x-tenant", "a")]).unwrap();
        let child = MatchSet::parse(&[prefix("/posts"), header("x-env", "prod")]).unwrap();
        let merged = root.merge(&child);
        assert_eq!(merged.prefix(), "/blog/posts");
        assert_eq!(
            merged.route_match().to_string(),
            "prefix:/blog/posts x-env==prod x-tenant==a"
        );

        let empty = MatchSet::default();
        assert_eq!(empty.merge(&root).prefix(), "/blog");
        assert_eq!(root.merge(&empty).prefix(), "/blog");
        assert_eq!(empty.route_match(), RouteMatch::prefix("/"));
    }

    #[test]
    fn rejects_invalid_conditions() {
        assert_eq!(
            MatchSet::parse(&[prefix("/a"), prefix("/b")]),
            Err(MatchError::MultiplePrefixes)
        );
        assert_eq!(
            MatchSet::parse(&[prefix("api")]),
            Err(MatchError::PrefixWithoutSlash("api".to_string()))
        );

        let mut both = header("x-a", "1");
        both.header.as_mut().unwrap().present = true;
        assert_eq!(
            MatchSet::parse(&[both]),
            Err(MatchError::HeaderMatchKind("x-a".to_string()))
        );

        let mut none = header("x-a", "1");
        none.header.as_mut().unwrap().exact = None;
        assert_eq!(
            MatchSet::parse(&[none]),
            Err(MatchError::HeaderMatchKind("x-a".to_string()))
        );
    }
}
