use topology_controller_k8s_api::{annotations, ObjectMeta};

/// The class assumed when no class is configured.
pub(crate) const DEFAULT_CLASS: &str = "contour";

/// Returns the class named by an object's annotations, falling back to the
/// `spec.ingressClassName` field where the kind has one.
pub(crate) fn class_of<'a>(meta: &'a ObjectMeta, spec_class: Option<&'a str>) -> Option<&'a str> {
    let annots = meta.annotations.as_ref();
    annots
        .and_then(|a| a.get(annotations::CONTOUR_INGRESS_CLASS))
        .or_else(|| annots.and_then(|a| a.get(annotations::INGRESS_CLASS)))
        .map(String::as_str)
        .or(spec_class)
}

/// When a class is configured, only objects with exactly that class match.
/// Otherwise objects with no class, or the default class, match.
pub(crate) fn matches(class: Option<&str>, configured: Option<&str>) -> bool {
    match (class, configured) {
        (Some(class), Some(configured)) => class == configured,
        (None, Some(_)) => false,
        (None, None) => true,
        (Some(class), None) => class == DEFAULT_CLASS,
    }
}
