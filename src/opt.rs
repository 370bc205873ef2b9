//! Tri-state optional values for the inheritance-merge model.
//!
//! A plain `Option<T>` cannot distinguish "the field was never set" from
//! "the field was explicitly set to null". Search templates need all three
//! states: an unset child field inherits the parent's value, while an
//! explicitly null child field overrides it. [`Opt`] models the triple and
//! round-trips through JSON and YAML: unset fields are omitted entirely,
//! set-null fields serialize as `null`, and set values serialize as the
//! inner value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A tri-state optional: unset, explicitly null, or a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Opt<T> {
    /// The field was never set; merges inherit the other side.
    #[default]
    Unset,
    /// The field was explicitly set to null.
    Null,
    /// The field carries a value.
    Value(T),
}

impl<T> Opt<T> {
    /// True when the field was never set.
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// True when the field was set, either to null or to a value.
    pub const fn is_set(&self) -> bool {
        !self.is_unset()
    }

    /// True when the field carries a value.
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Get a reference to the inner value, if any.
    pub const fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Consume the triple and return the inner value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Return the inner value or a fallback.
    pub fn value_or(self, fallback: T) -> T {
        match self {
            Self::Value(v) => v,
            _ => fallback,
        }
    }

    /// Merge semantics: `self` wins when set, otherwise take `parent`.
    ///
    /// This is the child side of `merge_into`: a set child field (including
    /// an explicit null) overrides the parent; an unset child inherits.
    pub fn or_inherit(self, parent: Self) -> Self {
        if self.is_set() {
            self
        } else {
            parent
        }
    }

    /// Map the inner value, preserving the unset/null states.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Opt<U> {
        match self {
            Self::Unset => Opt::Unset,
            Self::Null => Opt::Null,
            Self::Value(v) => Opt::Value(f(v)),
        }
    }
}

impl<T: Clone> Opt<T> {
    /// Clone the inner value out of a reference.
    pub fn to_value(&self) -> Option<T> {
        self.as_value().cloned()
    }
}

impl Opt<String> {
    /// Borrow the inner string as a `&str`, if any.
    pub fn as_deref(&self) -> Option<&str> {
        self.as_value().map(String::as_str)
    }
}

impl<T> From<T> for Opt<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T> From<Option<T>> for Opt<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Value(v),
            None => Self::Null,
        }
    }
}

impl From<&str> for Opt<String> {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

// Serialization relies on the containing struct using
// `#[serde(default, skip_serializing_if = "Opt::is_unset")]`: the Unset arm
// is never reached by Serialize, and a missing field deserializes to Unset
// through Default.
impl<T: Serialize> Serialize for Opt<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unset | Self::Null => serializer.serialize_none(),
            Self::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Opt<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Probe {
        #[serde(default, skip_serializing_if = "Opt::is_unset")]
        size: Opt<i64>,
        #[serde(default, skip_serializing_if = "Opt::is_unset")]
        index: Opt<String>,
    }

    #[test]
    fn unset_fields_are_omitted() {
        let probe = Probe::default();
        assert_eq!(serde_json::to_string(&probe).unwrap(), "{}");
    }

    #[test]
    fn null_round_trips() {
        let probe = Probe {
            size: Opt::Null,
            index: Opt::Unset,
        };
        let json = serde_json::to_string(&probe).unwrap();
        assert_eq!(json, r#"{"size":null}"#);

        let back: Probe = serde_json::from_str(&json).unwrap();
        assert_eq!(back.size, Opt::Null);
        assert_eq!(back.index, Opt::Unset);
    }

    #[test]
    fn value_round_trips_through_yaml() {
        let probe = Probe {
            size: Opt::Value(100),
            index: Opt::from("prod-logs"),
        };
        let yaml = serde_yaml::to_string(&probe).unwrap();
        let back: Probe = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn inherit_prefers_set_child() {
        let parent: Opt<i64> = Opt::Value(10);
        assert_eq!(Opt::Value(20).or_inherit(parent.clone()), Opt::Value(20));
        assert_eq!(Opt::Null.or_inherit(parent.clone()), Opt::<i64>::Null);
        assert_eq!(Opt::Unset.or_inherit(parent), Opt::Value(10));
    }

    #[test]
    fn accessors() {
        let v: Opt<String> = Opt::from("x");
        assert!(v.is_value());
        assert_eq!(v.as_deref(), Some("x"));
        assert_eq!(Opt::<i64>::Unset.value_or(7), 7);
        assert_eq!(Opt::Value(3).value_or(7), 3);
    }
}
