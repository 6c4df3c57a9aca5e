use std::path::{Component, Path, PathBuf};

/// Finds templates by name in an ordered list of root directories.
///
/// The first root containing the name wins, so a project can shadow a shared
/// layout by listing its own template directory first.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    roots: Vec<PathBuf>,
}

impl Resolver {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots.into_iter().map(|r| r.as_ref().to_path_buf()).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Path of the first file named `name` under any root.
    ///
    /// Names must be relative and may not climb out of a root with `..`.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !confined {
            return None;
        }

        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
    }
}
