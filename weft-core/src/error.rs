//! Error types for every stage of a build.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while enumerating source pages.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("pages directory `{0}` does not exist")]
    MissingRoot(PathBuf),

    #[error("invalid glob pattern `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("failed to walk pages directory")]
    Walk(#[from] walkdir::Error),
}

/// Failures while loading the data document.
#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("malformed JSON in `{0}`")]
    Json(PathBuf, #[source] serde_json::Error),

    #[error("malformed TOML in `{0}`")]
    Toml(PathBuf, #[source] toml::de::Error),

    #[error("data document `{0}` must contain a mapping at the top level")]
    NotAMapping(PathBuf),

    #[error("unsupported data document `{0}` (expected .json or .toml)")]
    UnsupportedFormat(PathBuf),
}

/// Failures while parsing or rendering a template.
///
/// `template` is always the name of the file containing the offending
/// directive, so the message points at the place to fix.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("syntax error in `{template}` line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    #[error("`{template}` extends `{target}`, which is not in any template root")]
    ExtendsResolution { template: String, target: String },

    #[error("`{template}` includes `{target}`, which is not in any template root")]
    IncludeResolution { template: String, target: String },

    #[error("`{template}` imports `{target}`, which is not in any template root")]
    ImportResolution { template: String, target: String },

    #[error("`{template}` line {line} calls an unknown macro: {message}")]
    MacroInvocation {
        template: String,
        line: usize,
        message: String,
    },

    #[error("`{template}` line {line}: {message}")]
    UndefinedVariable {
        template: String,
        line: usize,
        message: String,
    },

    #[error("render error in `{template}` line {line}: {message}")]
    Render {
        template: String,
        line: usize,
        message: String,
    },

    #[error("recursion limit reached while rendering `{template}` (cyclic extends or include?)")]
    RecursionLimit { template: String },

    #[error("IO error when reading template `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Failure while writing a rendered page.
#[derive(Debug, Error)]
#[error("failed to write `{path}`")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Any failure that aborts a build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("pages directory not specified")]
    MissingPagesDir,

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    DataLoad(#[from] DataLoadError),

    #[error("failed to render page `{page}`")]
    Render {
        page: PathBuf,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("failed to clean output directory `{0}`")]
    Clean(PathBuf, #[source] std::io::Error),
}
