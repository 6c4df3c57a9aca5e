use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::CollectionError;
use crate::pattern::Pattern;

/// Finds the page templates of a site.
pub struct SourceCollector {
    root: PathBuf,
    pattern: Pattern,
    exclude: Vec<Pattern>,
}

impl SourceCollector {
    pub fn new<P: AsRef<Path>>(root: P, pattern: &str) -> Result<Self, CollectionError> {
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            pattern: Pattern::new(pattern)?,
            exclude: Vec::new(),
        })
    }

    /// Skip files matching `pattern` even when they match the main pattern.
    pub fn exclude(mut self, pattern: &str) -> Result<Self, CollectionError> {
        self.exclude.push(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the pages directory.
    ///
    /// Yields paths relative to the root, sorted by file name at every level
    /// so repeated builds see pages in the same order.
    pub fn collect(
        &self,
    ) -> Result<impl Iterator<Item = Result<PathBuf, CollectionError>> + '_, CollectionError> {
        if !self.root.is_dir() {
            return Err(CollectionError::MissingRoot(self.root.clone()));
        }
        tracing::debug!(
            root = %self.root.display(),
            pattern = self.pattern.as_str(),
            "collecting pages"
        );

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Ok(walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(CollectionError::Walk(e))),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let relative = entry.path().strip_prefix(&self.root).ok()?.to_path_buf();
            self.accepts(&relative).then_some(Ok(relative))
        }))
    }

    fn accepts(&self, relative: &Path) -> bool {
        self.pattern.matches_path(relative)
            && !self.exclude.iter().any(|p| p.matches_path(relative))
    }
}
