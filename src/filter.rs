//! Recursive filter tree: validation, client-side evaluation, and the
//! building block every backend translator consumes.
//!
//! The wire shape is a single record with mutually exclusive leaf fields
//! (`field`/`op`/`value`/`negate`) and branch fields (`logic`/`filters`),
//! matching the search-spec JSON/YAML format. [`Filter::kind`] exposes a
//! borrowed sum-type view so validation, evaluation and the translators can
//! pattern-match exhaustively instead of re-checking field combinations.

use serde::{Deserialize, Serialize};

use crate::error::{FuseError, Result};
use crate::model::LogEntry;

/// Sentinel field name for free-text matching against the raw message.
pub const FREE_TEXT_FIELD: &str = "_";

/// Branch combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    /// All children must match.
    And,
    /// Any child must match.
    Or,
    /// Matches when any child does not match (negated AND).
    Not,
}

/// The closed operator set for leaf conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact string equality.
    Equals,
    /// Case-insensitive substring.
    Match,
    /// Shell glob, `*` and `?`, anchored.
    Wildcard,
    /// Regular expression.
    Regex,
    /// Field is present and non-empty; needs no value.
    Exists,
    /// Numeric (or lexicographic fallback) greater-than.
    Gt,
    /// Numeric (or lexicographic fallback) greater-or-equal.
    Gte,
    /// Numeric (or lexicographic fallback) less-than.
    Lt,
    /// Numeric (or lexicographic fallback) less-or-equal.
    Lte,
}

impl FilterOp {
    /// Parse an operator string; the empty string defaults to `equals`.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "" | "equals" => Some(Self::Equals),
            "match" => Some(Self::Match),
            "wildcard" => Some(Self::Wildcard),
            "regex" => Some(Self::Regex),
            "exists" => Some(Self::Exists),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    /// Canonical operator name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Match => "match",
            Self::Wildcard => "wildcard",
            Self::Regex => "regex",
            Self::Exists => "exists",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }
}

/// A filter tree node.
///
/// Exactly one of two shapes per node: a leaf condition (`field` set) or a
/// branch (`logic` set). A node with neither is valid and matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Leaf: field to test; `"_"` targets the raw message.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field: String,

    /// Leaf: operator name; empty means `equals`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub op: String,

    /// Leaf: comparison value; required unless the operator is `exists`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,

    /// Leaf: invert the final result.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub negate: bool,

    /// Branch: combinator over `filters`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,

    /// Branch: child nodes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

/// Borrowed sum-type view of a [`Filter`] node.
#[derive(Debug, Clone, Copy)]
pub enum FilterKind<'a> {
    /// Neither leaf nor branch fields set: matches everything.
    Empty,
    /// A leaf condition.
    Leaf {
        /// Field under test.
        field: &'a str,
        /// Operator; unknown strings degrade to `equals` here, validation
        /// reports them before any backend sees the tree.
        op: FilterOp,
        /// Comparison value.
        value: &'a str,
        /// Invert the result.
        negate: bool,
    },
    /// A branch over child nodes.
    Branch {
        /// Combinator.
        logic: Logic,
        /// Child nodes.
        children: &'a [Filter],
    },
}

impl Filter {
    /// Build a leaf condition.
    pub fn leaf(field: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: op.as_str().to_string(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Build an equality leaf, the most common condition.
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::leaf(field, FilterOp::Equals, value)
    }

    /// Build an AND branch.
    #[must_use]
    pub fn and(filters: Vec<Filter>) -> Self {
        Self {
            logic: Some(Logic::And),
            filters,
            ..Self::default()
        }
    }

    /// Build an OR branch.
    #[must_use]
    pub fn or(filters: Vec<Filter>) -> Self {
        Self {
            logic: Some(Logic::Or),
            filters,
            ..Self::default()
        }
    }

    /// Build a NOT branch.
    #[must_use]
    pub fn not(filters: Vec<Filter>) -> Self {
        Self {
            logic: Some(Logic::Not),
            filters,
            ..Self::default()
        }
    }

    /// Mark this leaf negated.
    #[must_use]
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// The sum-type view of this node.
    #[must_use]
    pub fn kind(&self) -> FilterKind<'_> {
        if let Some(logic) = self.logic {
            FilterKind::Branch {
                logic,
                children: &self.filters,
            }
        } else if !self.field.is_empty() {
            FilterKind::Leaf {
                field: &self.field,
                op: FilterOp::parse(&self.op).unwrap_or(FilterOp::Equals),
                value: &self.value,
                negate: self.negate,
            }
        } else {
            FilterKind::Empty
        }
    }

    /// Validate the tree shape recursively.
    pub fn validate(&self) -> Result<()> {
        if !self.field.is_empty() && self.logic.is_some() {
            return Err(FuseError::invalid_filter(format!(
                "node sets both field '{}' and logic; leaf and branch are mutually exclusive",
                self.field
            )));
        }
        if self.logic.is_none() && !self.filters.is_empty() {
            return Err(FuseError::invalid_filter(
                "child filters require a logic combinator",
            ));
        }

        match self.kind() {
            FilterKind::Empty => Ok(()),
            FilterKind::Leaf { field, value, .. } => {
                let op = FilterOp::parse(&self.op).ok_or_else(|| FuseError::UnknownOperator {
                    op: self.op.clone(),
                })?;
                if value.is_empty() && op != FilterOp::Exists {
                    return Err(FuseError::invalid_filter(format!(
                        "leaf on field '{field}' has no value for operator '{}'",
                        op.as_str()
                    )));
                }
                Ok(())
            }
            FilterKind::Branch { logic, children } => {
                if !self.value.is_empty() {
                    return Err(FuseError::invalid_filter(
                        "branch node cannot carry a value",
                    ));
                }
                if logic == Logic::Not && children.is_empty() {
                    return Err(FuseError::invalid_filter("NOT requires at least one child"));
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate the filter against an entry.
    ///
    /// Empty nodes and empty AND/OR groups match everything. Branch NOT
    /// matches when any child fails, the negation of AND rather than
    /// per-child negation.
    #[must_use]
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self.kind() {
            FilterKind::Empty => true,
            FilterKind::Branch { logic, children } => match logic {
                Logic::And => children.iter().all(|f| f.matches(entry)),
                Logic::Or => {
                    children.is_empty() || children.iter().any(|f| f.matches(entry))
                }
                Logic::Not => children.iter().any(|f| !f.matches(entry)),
            },
            FilterKind::Leaf {
                field,
                op,
                value,
                negate,
            } => {
                let target = if field == FREE_TEXT_FIELD {
                    entry.message.clone()
                } else {
                    entry.field(field)
                };

                let hit = match op {
                    FilterOp::Exists => !target.is_empty(),
                    FilterOp::Equals => target == value,
                    FilterOp::Match => target.to_lowercase().contains(&value.to_lowercase()),
                    FilterOp::Wildcard => wildcard_matches(value, &target),
                    FilterOp::Regex => regex::Regex::new(value)
                        .map(|re| re.is_match(&target))
                        .unwrap_or(false),
                    FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                        compare(op, &target, value)
                    }
                };

                hit != negate
            }
        }
    }
}

/// Evaluate an optional filter; absence matches everything.
#[must_use]
pub fn matches_opt(filter: Option<&Filter>, entry: &LogEntry) -> bool {
    filter.map_or(true, |f| f.matches(entry))
}

/// Translate a shell glob into an anchored regex and test it.
fn wildcard_matches(pattern: &str, target: &str) -> bool {
    let translated = wildcard_to_regex(pattern);
    regex::Regex::new(&translated)
        .map(|re| re.is_match(target))
        .unwrap_or(false)
}

/// Quote the pattern, then rewrite the quoted glob metacharacters:
/// `*` becomes `.*` and `?` becomes `.`, anchored at both ends.
#[must_use]
pub fn wildcard_to_regex(pattern: &str) -> String {
    let quoted = regex::escape(pattern);
    let rewritten = quoted.replace(r"\*", ".*").replace(r"\?", ".");
    format!("^{rewritten}$")
}

/// Ordered comparison: numeric when both sides parse as floats, otherwise
/// lexicographic with the same operator.
fn compare(op: FilterOp, left: &str, right: &str) -> bool {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => match op {
            FilterOp::Gt => l > r,
            FilterOp::Gte => l >= r,
            FilterOp::Lt => l < r,
            FilterOp::Lte => l <= r,
            _ => false,
        },
        _ => match op {
            FilterOp::Gt => left > right,
            FilterOp::Gte => left >= right,
            FilterOp::Lt => left < right,
            FilterOp::Lte => left <= right,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(message: &str, fields: &[(&str, &str)]) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), json!(v)))
                .collect(),
            ..LogEntry::default()
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn empty_node_is_valid() {
            assert!(Filter::default().validate().is_ok());
        }

        #[test]
        fn leaf_and_branch_are_exclusive() {
            let mut f = Filter::equals("level", "ERROR");
            f.logic = Some(Logic::And);
            assert!(f.validate().is_err());
        }

        #[test]
        fn leaf_with_children_is_invalid() {
            let mut f = Filter::equals("level", "ERROR");
            f.logic = None;
            f.filters = vec![Filter::equals("a", "b")];
            assert!(f.validate().is_err());
        }

        #[test]
        fn branch_with_value_is_invalid() {
            let mut f = Filter::and(vec![Filter::equals("a", "b")]);
            f.value = "stray".to_string();
            assert!(f.validate().is_err());
        }

        #[test]
        fn unknown_operator_is_invalid() {
            let mut f = Filter::equals("level", "ERROR");
            f.op = "approx".to_string();
            let err = f.validate().unwrap_err();
            assert!(matches!(err, FuseError::UnknownOperator { op } if op == "approx"));
        }

        #[test]
        fn leaf_without_value_is_invalid_except_exists() {
            let mut f = Filter::equals("level", "");
            assert!(f.validate().is_err());

            f.op = "exists".to_string();
            assert!(f.validate().is_ok());
        }

        #[test]
        fn not_requires_children() {
            assert!(Filter::not(vec![]).validate().is_err());
            assert!(Filter::not(vec![Filter::equals("a", "b")]).validate().is_ok());
        }

        #[test]
        fn empty_and_or_groups_are_valid() {
            assert!(Filter::and(vec![]).validate().is_ok());
            assert!(Filter::or(vec![]).validate().is_ok());
        }

        #[test]
        fn validation_recurses() {
            let bad_child = Filter {
                field: "x".to_string(),
                op: "nope".to_string(),
                value: "1".to_string(),
                ..Filter::default()
            };
            let tree = Filter::and(vec![Filter::equals("a", "b"), bad_child]);
            assert!(tree.validate().is_err());
        }
    }

    mod evaluation {
        use super::*;

        #[test]
        fn empty_groups_match_all() {
            let e = entry("anything", &[]);
            assert!(Filter::default().matches(&e));
            assert!(Filter::and(vec![]).matches(&e));
            assert!(Filter::or(vec![]).matches(&e));
            assert!(matches_opt(None, &e));
        }

        #[test]
        fn equals_and_negate() {
            let e = entry("", &[("level", "ERROR")]);
            let f = Filter::equals("level", "ERROR");
            assert!(f.matches(&e));
            assert!(!f.clone().negated().matches(&e));
        }

        #[test]
        fn free_text_match_is_case_insensitive() {
            let e = entry("An error occurred", &[]);
            let f = Filter::leaf(FREE_TEXT_FIELD, FilterOp::Match, "ERROR");
            assert!(f.matches(&e));
        }

        #[test]
        fn wildcard_is_anchored() {
            let e = entry("", &[("host", "web-01")]);
            assert!(Filter::leaf("host", FilterOp::Wildcard, "web-*").matches(&e));
            assert!(Filter::leaf("host", FilterOp::Wildcard, "web-??").matches(&e));
            assert!(!Filter::leaf("host", FilterOp::Wildcard, "web").matches(&e));
        }

        #[test]
        fn regex_compile_failure_is_false() {
            let e = entry("", &[("host", "web-01")]);
            assert!(!Filter::leaf("host", FilterOp::Regex, "([").matches(&e));
        }

        #[test]
        fn exists_requires_non_empty() {
            let e = entry("", &[("present", "x"), ("blank", "")]);
            let exists = |field: &str| Filter {
                field: field.to_string(),
                op: "exists".to_string(),
                ..Filter::default()
            };
            assert!(exists("present").matches(&e));
            assert!(!exists("blank").matches(&e));
            assert!(!exists("missing").matches(&e));
        }

        #[test]
        fn numeric_comparison_with_string_fallback() {
            let e = entry("", &[("latency_ms", "1500"), ("version", "v2")]);
            assert!(Filter::leaf("latency_ms", FilterOp::Gt, "1000").matches(&e));
            assert!(!Filter::leaf("latency_ms", FilterOp::Lte, "1000").matches(&e));
            // "v2" > "v10" lexicographically even though 2 < 10.
            assert!(Filter::leaf("version", FilterOp::Gt, "v10").matches(&e));
        }

        #[test]
        fn branch_not_is_any_child_false() {
            let e = entry("", &[("a", "1"), ("b", "2")]);
            let both_true = Filter::not(vec![
                Filter::equals("a", "1"),
                Filter::equals("b", "2"),
            ]);
            assert!(!both_true.matches(&e));

            // One child false is enough, even when another child is true.
            let mixed = Filter::not(vec![
                Filter::equals("a", "1"),
                Filter::equals("b", "wrong"),
            ]);
            assert!(mixed.matches(&e));
        }

        #[test]
        fn not_of_single_leaf_inverts() {
            let e = entry("", &[("level", "INFO")]);
            let inner = Filter::equals("level", "ERROR");
            assert_eq!(
                Filter::not(vec![inner.clone()]).matches(&e),
                !inner.matches(&e)
            );
        }

        #[test]
        fn nested_and_or() {
            let e = entry("", &[("level", "WARN"), ("env", "prod")]);
            let tree = Filter::and(vec![
                Filter::equals("env", "prod"),
                Filter::or(vec![
                    Filter::equals("level", "ERROR"),
                    Filter::equals("level", "WARN"),
                ]),
            ]);
            assert!(tree.matches(&e));
        }
    }

    mod wire {
        use super::*;

        #[test]
        fn deserializes_wire_example() {
            let json = r#"{"logic":"OR","filters":[
                {"field":"level","op":"equals","value":"ERROR"},
                {"field":"latency_ms","op":"gt","value":"1000"}]}"#;
            let f: Filter = serde_json::from_str(json).unwrap();
            assert!(f.validate().is_ok());
            match f.kind() {
                FilterKind::Branch { logic, children } => {
                    assert_eq!(logic, Logic::Or);
                    assert_eq!(children.len(), 2);
                }
                other => panic!("expected branch, got {other:?}"),
            }
        }

        #[test]
        fn serialization_omits_defaults() {
            let f = Filter::equals("level", "ERROR");
            let json = serde_json::to_value(&f).unwrap();
            assert_eq!(
                json,
                json!({"field": "level", "op": "equals", "value": "ERROR"})
            );
        }
    }
}
