use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything a build needs to know.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct BuildSettings {
    /// Directory containing the page templates to render.
    pub pages: PathBuf,
    /// Glob selecting pages, relative to `pages`.
    pub pattern: String,
    /// Globs of pages to skip.
    pub exclude: Vec<String>,
    /// Template search roots, in priority order.
    pub templates: Vec<PathBuf>,
    /// Optional JSON or TOML data document.
    pub data: Option<PathBuf>,
    /// Variables available to every template, below the data document.
    pub globals: BTreeMap<String, serde_json::Value>,
    /// Destination directory.
    pub output: PathBuf,
    /// Write `about.njk` as `about/index.html`.
    pub pretty_urls: bool,
    /// Remove the output directory before writing.
    pub clean: bool,
    pub render: RenderOptions,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            pages: PathBuf::from("./src/pages"),
            pattern: "**/*.+(html|njk)".to_string(),
            exclude: Vec::new(),
            templates: vec![PathBuf::from("./src/templates")],
            data: None,
            globals: BTreeMap::new(),
            output: PathBuf::from("./dist"),
            pretty_urls: false,
            clean: false,
            render: RenderOptions::default(),
        }
    }
}

/// How templates are evaluated.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderOptions {
    /// HTML-escape printed values that are not marked safe.
    pub autoescape: bool,
    /// Fail when printing or iterating an undefined variable instead of
    /// rendering nothing.
    pub strict_undefined: bool,
    /// Recursion budget for includes, macro calls and nested frames.
    pub max_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            autoescape: true,
            strict_undefined: false,
            max_depth: 500,
        }
    }
}
