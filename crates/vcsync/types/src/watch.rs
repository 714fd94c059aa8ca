//! Watch event model
//!
//! Watches deliver identity only. The reconciler re-fetches the object at
//! dequeue time, so bursts of updates to one object collapse into a single
//! reconciliation.

use crate::ids::{NamespacedName, ResourceUid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of change reported by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEventType::Added => write!(f, "added"),
            WatchEventType::Modified => write!(f, "modified"),
            WatchEventType::Deleted => write!(f, "deleted"),
        }
    }
}

/// Identity of an object observed in a tenant cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: NamespacedName,
    pub uid: ResourceUid,

    /// Opaque version marker, bumped by the cluster on every write
    pub resource_version: u64,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectRef {
    pub fn new(key: NamespacedName, uid: ResourceUid) -> Self {
        Self {
            key,
            uid,
            resource_version: 0,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One raw watch notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: ObjectRef,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, object: ObjectRef) -> Self {
        Self { event_type, object }
    }
}

/// Filter applied when establishing a watch or list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Restrict to one namespace
    pub namespace: Option<String>,

    /// Equality-based label selector: comma-separated `key=value`,
    /// `key==value`, `key!=value`, `key` or `!key` terms, all of which
    /// must hold
    pub label_selector: Option<String>,
}

impl WatchOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Whether an object passes this filter.
    ///
    /// A term with an empty key never matches.
    pub fn matches(&self, object: &ObjectRef) -> bool {
        if let Some(ref ns) = self.namespace {
            if &object.key.namespace != ns {
                return false;
            }
        }

        match self.label_selector {
            Some(ref selector) => selector
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .all(|term| LabelRequirement::parse(term).is_some_and(|r| r.matches(&object.labels))),
            None => true,
        }
    }
}

/// One parsed label selector term
#[derive(Debug, PartialEq, Eq)]
enum LabelRequirement<'a> {
    Equals(&'a str, &'a str),
    NotEquals(&'a str, &'a str),
    Exists(&'a str),
    DoesNotExist(&'a str),
}

impl<'a> LabelRequirement<'a> {
    fn parse(term: &'a str) -> Option<Self> {
        let requirement = if let Some((key, value)) = term.split_once("!=") {
            Self::NotEquals(key.trim(), value.trim())
        } else if let Some((key, value)) = term.split_once("==") {
            Self::Equals(key.trim(), value.trim())
        } else if let Some((key, value)) = term.split_once('=') {
            Self::Equals(key.trim(), value.trim())
        } else if let Some(key) = term.strip_prefix('!') {
            Self::DoesNotExist(key.trim())
        } else {
            Self::Exists(term)
        };

        let key = match requirement {
            Self::Equals(key, _) | Self::NotEquals(key, _) | Self::Exists(key) | Self::DoesNotExist(key) => key,
        };
        (!key.is_empty()).then_some(requirement)
    }

    /// `!=` also matches objects without the label
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match *self {
            Self::Equals(key, value) => labels.get(key).map(String::as_str) == Some(value),
            Self::NotEquals(key, value) => labels.get(key).map(String::as_str) != Some(value),
            Self::Exists(key) => labels.contains_key(key),
            Self::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(ns: &str, name: &str) -> ObjectRef {
        ObjectRef::new(NamespacedName::new(ns, name), ResourceUid::new(format!("{ns}-{name}")))
    }

    #[test]
    fn test_default_options_match_everything() {
        assert!(WatchOptions::default().matches(&object("a", "b")));
    }

    #[test]
    fn test_namespace_filter() {
        let opts = WatchOptions::in_namespace("default");
        assert!(opts.matches(&object("default", "web")));
        assert!(!opts.matches(&object("kube-system", "dns")));
    }

    #[test]
    fn test_label_selector() {
        let opts = WatchOptions::default().with_label_selector("app=web, tier=front");
        let matching = object("default", "web")
            .with_label("app", "web")
            .with_label("tier", "front");
        let partial = object("default", "web").with_label("app", "web");

        assert!(opts.matches(&matching));
        assert!(!opts.matches(&partial));
        assert!(!WatchOptions::default()
            .with_label_selector("=web")
            .matches(&matching));
    }

    #[test]
    fn test_label_selector_operators() {
        let web = object("default", "web").with_label("app", "web");
        let selects = |selector: &str| WatchOptions::default().with_label_selector(selector).matches(&web);

        assert!(selects("app==web"));
        assert!(!selects("app==db"));
        assert!(selects("app!=db"));
        assert!(!selects("app!=web"));
        assert!(selects("tier!=front"));
        assert!(selects("app"));
        assert!(!selects("tier"));
        assert!(selects("!tier"));
        assert!(!selects("!app"));
        assert!(selects("app == web, !tier"));
    }

    #[test]
    fn test_requirement_parsing() {
        assert_eq!(LabelRequirement::parse("a!=b"), Some(LabelRequirement::NotEquals("a", "b")));
        assert_eq!(LabelRequirement::parse("a==b"), Some(LabelRequirement::Equals("a", "b")));
        assert_eq!(LabelRequirement::parse("a=b"), Some(LabelRequirement::Equals("a", "b")));
        assert_eq!(LabelRequirement::parse("!a"), Some(LabelRequirement::DoesNotExist("a")));
        assert_eq!(LabelRequirement::parse("!=b"), None);
        assert_eq!(LabelRequirement::parse("!"), None);
    }
}
