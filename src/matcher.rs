//! "Anywhere in path" glob matching (component C).
//!
//! A user glob is compiled once into a `GlobSet` rather than evaluated
//! pattern-by-pattern per path.

use globset::{Error as GlobError, GlobBuilder, GlobSet, GlobSetBuilder};

/// Compiles a set of user-supplied globs so that each one matches either the
/// literal path or the path at any depth (`G` compiles to `**/G`; `**`
/// matches zero or more path components, so the root-level case is covered
/// by the same pattern). Filesystem and in-archive paths are both
/// normalised to `/`-separated strings before matching.
#[derive(Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PathMatcher {
    pub fn new() -> Self {
        Self { patterns: Vec::new(), set: GlobSet::empty() }
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut matcher = Self::new();
        for pattern in patterns {
            matcher.add(pattern)?;
        }
        Ok(matcher)
    }

    pub fn add(&mut self, pattern: impl Into<String>) -> Result<(), GlobError> {
        self.patterns.push(pattern.into());
        self.rebuild()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.set.is_match(normalized.as_ref())
    }

    fn rebuild(&mut self) -> Result<(), GlobError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let glob = GlobBuilder::new(&format!("**/{pattern}")).literal_separator(true).build()?;
            builder.add(glob);
        }
        self.set = builder.build()?;
        Ok(())
    }
}

fn normalize(path: &str) -> std::borrow::Cow<'_, str> {
    if path.contains('\\') {
        std::borrow::Cow::Owned(path.replace('\\', "/"))
    } else {
        std::borrow::Cow::Borrowed(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_pattern_at_root_and_nested() {
        let matcher = PathMatcher::from_patterns(["*.py"]).unwrap();
        assert!(matcher.matches("3.py"));
        assert!(matcher.matches("d1/6.py"));
        assert!(matcher.matches("d1/d2/deep.py"));
        assert!(!matcher.matches("3.java"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let matcher = PathMatcher::new();
        assert!(matcher.is_empty());
        assert!(!matcher.matches("anything"));
    }

    #[test]
    fn matches_any_of_several_patterns() {
        let matcher = PathMatcher::from_patterns(["*.py", "1*"]).unwrap();
        assert!(matcher.matches("1.j"));
        assert!(matcher.matches("11.py"));
        assert!(!matcher.matches("2.j"));
    }

    #[test]
    fn windows_style_separators_are_normalised() {
        let matcher = PathMatcher::from_patterns(["*.py"]).unwrap();
        assert!(matcher.matches("d1\\6.py"));
    }

    #[test]
    fn directory_glob_matches_the_directory_component_itself() {
        let matcher = PathMatcher::from_patterns(["d*"]).unwrap();
        assert!(matcher.matches("d1"));
        assert!(matcher.matches("sub/d3"));
    }
}
