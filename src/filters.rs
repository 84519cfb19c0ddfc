// ABOUTME: Blacklist filtering for schema objects
// ABOUTME: Case-insensitive glob patterns, schema qualifiers ignored

use regex::Regex;

/// Compiled blacklist of object-name patterns.
///
/// Patterns come from a comma-separated list (`EMP, T_*, TEST.SECRET_*`).
/// Matching is case-insensitive, `*` matches any run of characters and a
/// schema qualifier on either the pattern or the name is ignored.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl NameFilter {
    /// Creates a filter from a comma-separated pattern list
    ///
    /// Surrounding `[` and `]` are tolerated so list-literal values copied
    /// from other config formats keep working. Empty entries are ignored.
    pub fn new(csv: &str) -> Self {
        let patterns: Vec<String> = csv
            .replace(['[', ']'], "")
            .split(',')
            .map(|p| strip_qualifier(p.trim()).to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let compiled = patterns.iter().map(|p| glob_to_regex(p)).collect();

        Self { patterns, compiled }
    }

    /// Creates an empty filter (excludes nothing)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks if any patterns are configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns after trimming and qualifier stripping
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Determines if an object is excluded by any pattern
    pub fn is_excluded(&self, name: &str) -> bool {
        let name = strip_qualifier(name.trim());
        self.compiled.iter().any(|re| re.is_match(name))
    }
}

/// One-shot form of [`NameFilter::is_excluded`].
pub fn is_excluded(name: &str, patterns: &str) -> bool {
    NameFilter::new(patterns).is_excluded(name)
}

fn strip_qualifier(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

fn glob_to_regex(pattern: &str) -> Regex {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    // Every literal segment is escaped, so the expression is always valid.
    Regex::new(&format!("(?is)^{}$", body)).expect("escaped glob is a valid regex")
}
