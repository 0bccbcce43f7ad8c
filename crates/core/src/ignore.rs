//! Ignore rules compiled into a matcher
//!
//! Rules come from the `sync.ignore` list in the configuration. A rule
//! containing any of `*?[]` is a shell-style glob matched against the
//! basename; every other rule acts both as a directory rule (the path
//! contains the rule as a whole component) and as an exact basename rule.

use std::collections::HashSet;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

/// Compiled ignore rule set, immutable and safe for concurrent reads
pub struct IgnoreMatcher {
    /// Directory components to exclude, surrounding slashes stripped
    dir_rules: HashSet<String>,
    /// Exact basename matches
    name_rules: HashSet<String>,
    /// Shell-style glob patterns matched against the basename
    glob_rules: Vec<GlobMatcher>,
}

impl IgnoreMatcher {
    /// Compile a rule list. Empty rules are discarded; glob rules that fail
    /// to compile are dropped with a warning.
    #[must_use]
    pub fn new(rules: &[String]) -> Self {
        let mut dir_rules = HashSet::new();
        let mut name_rules = HashSet::new();
        let mut glob_rules = Vec::new();

        for rule in rules {
            let rule = rule.trim();
            if rule.is_empty() {
                continue;
            }

            if rule.contains(['*', '?', '[', ']']) {
                match GlobBuilder::new(rule).literal_separator(true).build() {
                    Ok(glob) => glob_rules.push(glob.compile_matcher()),
                    Err(err) => tracing::warn!("invalid ignore pattern {rule:?}: {err}"),
                }
            } else {
                dir_rules.insert(rule.trim_matches('/').to_string());
                name_rules.insert(rule.to_string());
            }
        }

        Self {
            dir_rules,
            name_rules,
            glob_rules,
        }
    }

    /// Whether `path` is excluded from replication
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();

        for rule in &self.dir_rules {
            if text.contains(&format!("/{rule}/")) || text.ends_with(&format!("/{rule}")) {
                return true;
            }
        }

        let Some(base) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        if self.name_rules.contains(base.as_ref()) {
            return true;
        }

        self.glob_rules.iter().any(|g| g.is_match(base.as_ref()))
    }

    /// Whether the matcher carries no rules at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dir_rules.is_empty() && self.name_rules.is_empty() && self.glob_rules.is_empty()
    }
}
