use std::{cmp::Ordering, fmt};

/// The full match condition that identifies a route within a virtual host.
///
/// Header and query parameter conditions are kept sorted and deduplicated so
/// that two conditions written in a different order compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteMatch {
    path: PathMatch,
    headers: Vec<HeaderMatch>,
    query_params: Vec<QueryParamMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderMatch {
    name: String,
    kind: HeaderMatchKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderMatchKind {
    Present,
    Exact(String),
    NotExact(String),
    Contains(String),
    NotContains(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryParamMatch {
    pub name: String,
    pub value: String,
}

// === impl RouteMatch ===

impl RouteMatch {
    pub fn new(
        path: PathMatch,
        headers: impl IntoIterator<Item = HeaderMatch>,
        query_params: impl IntoIterator<Item = QueryParamMatch>,
    ) -> Self {
        let mut headers = headers.into_iter().collect::<Vec<_>>();
        headers.sort();
        headers.dedup();
        let mut query_params = query_params.into_iter().collect::<Vec<_>>();
        query_params.sort();
        query_params.dedup();
        Self {
            path,
            headers,
            query_params,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::new(PathMatch::Prefix(prefix.into()), None, None)
    }

    pub fn exact(path: impl Into<String>) -> Self {
        Self::new(PathMatch::Exact(path.into()), None, None)
    }

    pub fn path(&self) -> &PathMatch {
        &self.path
    }

    pub fn headers(&self) -> &[HeaderMatch] {
        &self.headers
    }

    pub fn query_params(&self) -> &[QueryParamMatch] {
        &self.query_params
    }
}

/// Routes are ordered from most to least specific: exact paths, then regular
/// expressions, then prefixes; longer paths before shorter ones; more header
/// and query conditions before fewer. Remaining ties are broken lexically so
/// that the order is total.
impl Ord for RouteMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .rank()
            .cmp(&other.path.rank())
            .then_with(|| other.path.as_str().len().cmp(&self.path.as_str().len()))
            .then_with(|| other.headers.len().cmp(&self.headers.len()))
            .then_with(|| other.query_params.len().cmp(&self.query_params.len()))
            .then_with(|| self.path.as_str().cmp(other.path.as_str()))
            .then_with(|| self.headers.cmp(&other.headers))
            .then_with(|| self.query_params.cmp(&other.query_params))
    }
}

impl PartialOrd for RouteMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path, f)?;
        for header in &self.headers {
            write!(f, " {header}")?;
        }
        for QueryParamMatch { name, value } in &self.query_params {
            write!(f, " ?{name}={value}")?;
        }
        Ok(())
    }
}

// === impl PathMatch ===

impl PathMatch {
    /// Returns a regular expression path match if `s` compiles.
    pub fn regex(s: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(s)?;
        Ok(Self::Regex(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) | Self::Prefix(s) | Self::Regex(s) => s,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Exact(_) => 0,
            Self::Regex(_) => 1,
            Self::Prefix(_) => 2,
        }
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(path) => write!(f, "exact:{path}"),
            Self::Prefix(prefix) => write!(f, "prefix:{prefix}"),
            Self::Regex(re) => write!(f, "regex:{re}"),
        }
    }
}

// === impl HeaderMatch ===

impl HeaderMatch {
    /// Header names are case-insensitive and are stored lowercased.
    pub fn new(name: impl AsRef<str>, kind: HeaderMatchKind) -> Self {
        Self {
            name: name.as_ref().to_ascii_lowercase(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &HeaderMatchKind {
        &self.kind
    }
}

impl fmt::Display for HeaderMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.name;
        match &self.kind {
            HeaderMatchKind::Present => write!(f, "{name} present"),
            HeaderMatchKind::Exact(v) => write!(f, "{name}=={v}"),
            HeaderMatchKind::NotExact(v) => write!(f, "{name}!={v}"),
            HeaderMatchKind::Contains(v) => write!(f, "{name}~={v}"),
            HeaderMatchKind::NotContains(v) => write!(f, "{name}!~{v}"),
        }
    }
}
