//! `${VAR}` substitution for search specifications.
//!
//! Supported forms: `${NAME}`, `${NAME:-default}` and `$NAME`. Lookup order
//! is caller-supplied runtime values, then the process environment, then the
//! variable's declared default. Defaults may themselves contain variables and
//! are resolved recursively. Unresolvable tokens are left untouched so the
//! backend (or the user) can see exactly what was missing.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `${NAME}`, `${NAME:-default}` or bare `$NAME`.
static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable pattern is valid")
});

/// Recursion guard for defaults that reference other variables.
const MAX_DEPTH: usize = 8;

/// Resolves variables against runtime values, the environment, and declared
/// defaults.
pub struct VarResolver<'a> {
    runtime: &'a HashMap<String, String>,
    defaults: IndexMap<String, String>,
}

impl<'a> VarResolver<'a> {
    /// Create a resolver. `defaults` maps variable names to their declared
    /// default expressions.
    #[must_use]
    pub fn new(runtime: &'a HashMap<String, String>, defaults: IndexMap<String, String>) -> Self {
        Self { runtime, defaults }
    }

    /// Substitute every variable token in `input`.
    #[must_use]
    pub fn substitute(&self, input: &str) -> String {
        self.substitute_depth(input, 0)
    }

    fn substitute_depth(&self, input: &str, depth: usize) -> String {
        if depth >= MAX_DEPTH || !input.contains('$') {
            return input.to_string();
        }

        VAR_PATTERN
            .replace_all(input, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let inline_default = caps.get(2).map(|m| m.as_str());

                match self.resolve(name, inline_default, depth) {
                    Some(value) => value,
                    // Leave the original token literally in place.
                    None => caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
                }
            })
            .into_owned()
    }

    fn resolve(&self, name: &str, inline_default: Option<&str>, depth: usize) -> Option<String> {
        if let Some(value) = self.runtime.get(name) {
            return Some(value.clone());
        }
        if let Ok(value) = std::env::var(name) {
            return Some(value);
        }
        if let Some(default) = inline_default {
            return Some(self.substitute_depth(default, depth + 1));
        }
        self.defaults
            .get(name)
            .map(|default| self.substitute_depth(default, depth + 1))
    }
}
