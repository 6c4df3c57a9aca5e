//! Template rendering: minijinja evaluates `extends`/`block`, `include`,
//! macros with `import`/`from`, loops and filters; this module confines its
//! lookups to the configured template roots.

mod render;
mod resolver;

pub use render::Environment;
pub use resolver::Resolver;

pub use crate::error::TemplateError;
