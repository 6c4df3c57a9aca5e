pub mod collector;
pub mod config;
pub mod data;
pub mod emitter;
pub mod error;
pub mod pattern;
pub mod pipeline;
pub mod template;
pub mod value;

// Re-export main types
pub use collector::SourceCollector;
pub use config::{BuildSettings, RenderOptions};
pub use data::{DataContext, DataProvider};
pub use emitter::{Emitter, RenderResult};
pub use error::{BuildError, CollectionError, DataLoadError, TemplateError, WriteError};
pub use pipeline::{build_site, BuildReport, EmittedPage, Pipeline, PipelineBuilder};
pub use template::{Environment, Resolver};
pub use value::Value;
