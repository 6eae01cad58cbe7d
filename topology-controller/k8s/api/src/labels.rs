use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

/// Selects objects by label. The default selector matches everything.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Vec<Expression>,
}

// === Selector ===

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Vec::new(),
        }
    }

    pub fn with_expression(mut self, expr: Expression) -> Self {
        self.match_expressions.push(expr);
        self
    }

    pub fn is_everything(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Map) -> bool {
        for expr in &self.match_expressions {
            if !expr.matches(labels) {
                return false;
            }
        }

        for (k, v) in &self.match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self {
            match_labels: Map::new(),
            match_expressions: iter.into_iter().collect(),
        }
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self(Arc::new(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }
}

// === Expression ===

impl Expression {
    pub fn new(key: impl Into<String>, operator: Operator) -> Self {
        Self {
            key: key.into(),
            operator,
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        let value = labels.get(&self.key);
        match &self.operator {
            Operator::In(values) => value.map(|v| values.contains(v)).unwrap_or(false),
            Operator::NotIn(values) => value.map(|v| !values.contains(v)).unwrap_or(true),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}
