use std::{collections::BTreeMap, fmt};

/// The schema an object was read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    HttpProxy,
    Ingress,
    HttpRoute,
}

/// Identifies a routing-intent object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reason {
    Valid,
    NotImplemented,
    ServiceNameRequired,
    ServiceUnresolved,
    InvalidMatch,
    DuplicateRoute,
    VirtualHostConflict,
    DuplicateVhost,
    IncludeCycle,
    IncludeNotFound,
    RootIncludesRoot,
    Orphaned,
    RootNamespaceNotAllowed,
    InvalidVirtualHost,
    SecretInvalid,
    InvalidRoute,
    UnsupportedBackend,
    InvalidTlsVersion,
}

/// The outcome of processing one object, or one problem found while doing so.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Condition {
    pub object: ObjectRef,
    pub reason: Reason,
    pub message: String,
    pub accepted: bool,
}

/// Receives the conditions produced by a build.
pub trait StatusSink {
    /// Called once for each distinct condition of a build.
    fn report(&mut self, condition: &Condition);

    /// Called after all of a build's conditions have been reported.
    fn flush(&mut self) {}
}

impl<S: StatusSink> StatusSink for Option<S> {
    fn report(&mut self, condition: &Condition) {
        if let Some(sink) = self {
            sink.report(condition);
        }
    }

    fn flush(&mut self) {
        if let Some(sink) = self {
            sink.flush();
        }
    }
}

/// Collects conditions for the duration of a single build.
///
/// An object that was seen but had no errors recorded against it is reported
/// with a single `Valid` condition; otherwise one condition is reported per
/// distinct error.
#[derive(Clone, Debug, Default)]
pub struct Conditions {
    objects: BTreeMap<ObjectRef, Vec<(Reason, String)>>,
}

// === impl SourceKind ===

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpProxy => "HTTPProxy",
            Self::Ingress => "Ingress",
            Self::HttpRoute => "HTTPRoute",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ObjectRef ===

impl ObjectRef {
    pub fn new(kind: SourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

// === impl Reason ===

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "Valid",
            Self::NotImplemented => "NotImplemented",
            Self::ServiceNameRequired => "ServiceNameRequired",
            Self::ServiceUnresolved => "ServiceUnresolved",
            Self::InvalidMatch => "InvalidMatch",
            Self::DuplicateRoute => "DuplicateRoute",
            Self::VirtualHostConflict => "VirtualHostConflict",
            Self::DuplicateVhost => "DuplicateVhost",
            Self::IncludeCycle => "IncludeCycle",
            Self::IncludeNotFound => "IncludeNotFound",
            Self::RootIncludesRoot => "RootIncludesRoot",
            Self::Orphaned => "Orphaned",
            Self::RootNamespaceNotAllowed => "RootNamespaceNotAllowed",
            Self::InvalidVirtualHost => "InvalidVirtualHost",
            Self::SecretInvalid => "SecretInvalid",
            Self::InvalidRoute => "InvalidRoute",
            Self::UnsupportedBackend => "UnsupportedBackend",
            Self::InvalidTlsVersion => "InvalidTLSVersion",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Condition ===

impl Condition {
    pub fn accepted(object: ObjectRef) -> Self {
        let message = format!("valid {}", object.kind);
        Self {
            object,
            reason: Reason::Valid,
            message,
            accepted: true,
        }
    }

    pub fn rejected(object: ObjectRef, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            object,
            reason,
            message: message.into(),
            accepted: false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.object, self.reason, self.message)
    }
}

// === impl Conditions ===

impl Conditions {
    /// Records that `object` was processed. Has no effect on any errors
    /// already recorded against it.
    pub fn accept(&mut self, object: &ObjectRef) {
        if !self.objects.contains_key(object) {
            self.objects.insert(object.clone(), Vec::new());
        }
    }

    pub fn reject(&mut self, object: &ObjectRef, reason: Reason, message: impl Into<String>) {
        let errors = self.objects.entry(object.clone()).or_default();
        let error = (reason, message.into());
        if !errors.contains(&error) {
            errors.push(error);
        }
    }

    pub fn is_rejected(&self, object: &ObjectRef) -> bool {
        self.objects
            .get(object)
            .map(|errors| !errors.is_empty())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Produces the final conditions ordered by object.
    pub fn into_vec(self) -> Vec<Condition> {
        let mut conditions = Vec::with_capacity(self.objects.len());
        for (object, errors) in self.objects {
            if errors.is_empty() {
                conditions.push(Condition::accepted(object));
                continue;
            }
            for (reason, message) in errors {
                conditions.push(Condition::rejected(object.clone(), reason, message));
            }
        }
        conditions
    }
}
