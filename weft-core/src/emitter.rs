use std::path::{Path, PathBuf};

use crate::error::WriteError;

/// A rendered page, keyed by its path relative to the pages directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub relative_path: PathBuf,
    pub content: String,
}

/// Writes rendered pages beneath an output directory.
#[derive(Debug, Clone)]
pub struct Emitter {
    root: PathBuf,
    pretty_urls: bool,
}

impl Emitter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pretty_urls: false,
        }
    }

    /// Write `about.njk` as `about/index.html` instead of `about.html`.
    pub fn pretty_urls(mut self, enabled: bool) -> Self {
        self.pretty_urls = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output path for a page at `relative` under the pages directory.
    pub fn destination(&self, relative: &Path) -> PathBuf {
        let is_index = relative.file_stem().is_some_and(|stem| stem == "index");
        let relative = if self.pretty_urls && !is_index {
            relative.with_extension("").join("index.html")
        } else {
            relative.with_extension("html")
        };
        self.root.join(relative)
    }

    pub fn emit(&self, result: &RenderResult) -> Result<PathBuf, WriteError> {
        let path = self.destination(&result.relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, &result.content).map_err(|source| WriteError {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = result.content.len(), "wrote page");

        Ok(path)
    }
}
