//! Glob patterns for selecting page files.
//!
//! Matching is done by `globset` against `/`-separated paths relative to the
//! pages directory, with `*` confined to one path segment. Gulp-style extglob
//! groups `@(a|b)` and `+(a|b)` are rewritten to brace alternation first, so
//! the default `**/*.+(html|njk)` keeps working.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

use crate::error::CollectionError;

#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, CollectionError> {
        let invalid = |reason: String| CollectionError::Pattern {
            pattern: pattern.to_string(),
            reason,
        };

        let glob = rewrite_extglob(pattern).map_err(invalid)?;
        let matcher = GlobBuilder::new(&glob)
            .literal_separator(true)
            .build()
            .map_err(|e| invalid(e.kind().to_string()))?
            .compile_matcher();

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    /// Match a relative filesystem path, normalizing separators.
    pub fn matches_path(&self, path: &Path) -> bool {
        let normalized = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.matches(&normalized)
    }
}

/// Turn `@(a|b)` and `+(a|b)` into `{a,b}`. `+(...)` matches exactly one
/// alternative. Groups that need repetition or negation are refused.
fn rewrite_extglob(pattern: &str) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len());
    let mut groups = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(c);
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
            continue;
        }
        if in_class {
            in_class = c != ']';
            out.push(c);
            continue;
        }

        match c {
            '@' | '+' | '?' | '*' | '!' if chars.peek() == Some(&'(') => {
                if !matches!(c, '@' | '+') {
                    return Err(format!("extglob group `{c}(...)` is not supported"));
                }
                chars.next();
                groups += 1;
                out.push('{');
            }
            '|' if groups > 0 => out.push(','),
            ')' if groups > 0 => {
                groups -= 1;
                out.push('}');
            }
            '[' => {
                in_class = true;
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if groups > 0 {
        return Err("missing closing `)`".to_string());
    }
    Ok(out)
}
