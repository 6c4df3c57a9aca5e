use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::collector::SourceCollector;
use crate::config::{BuildSettings, RenderOptions};
use crate::data::{DataContext, DataProvider};
use crate::emitter::{Emitter, RenderResult};
use crate::error::BuildError;
use crate::template::{Environment, Resolver};

/// Hook applied to every rendered page before it is written.
pub type PostProcess = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct PipelineBuilder {
    pages_dir: Option<PathBuf>,
    pattern: String,
    exclude: Vec<String>,
    template_roots: Vec<PathBuf>,
    data_file: Option<PathBuf>,
    globals: BTreeMap<String, serde_json::Value>,
    output_dir: PathBuf,
    options: RenderOptions,
    pretty_urls: bool,
    clean: bool,
    post_process: Option<PostProcess>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        let defaults = BuildSettings::default();
        Self {
            pages_dir: None,
            pattern: defaults.pattern,
            exclude: Vec::new(),
            template_roots: Vec::new(),
            data_file: None,
            globals: BTreeMap::new(),
            output_dir: defaults.output,
            options: RenderOptions::default(),
            pretty_urls: false,
            clean: false,
            post_process: None,
        }
    }

    // Required configuration
    pub fn pages_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.pages_dir = Some(path.as_ref().to_path_buf());
        self
    }

    // Page selection
    pub fn pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn exclude<S: Into<String>>(mut self, pattern: S) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Add a template search root. Roots are searched in the order added.
    pub fn template_root<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.template_roots.push(path.as_ref().to_path_buf());
        self
    }

    // Context
    pub fn data_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Variable visible to every page unless the data document defines the
    /// same key.
    pub fn add_global<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.globals.insert(key.to_string(), value.into());
        self
    }

    // Output
    pub fn output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn autoescape(mut self, enabled: bool) -> Self {
        self.options.autoescape = enabled;
        self
    }

    pub fn strict_undefined(mut self, enabled: bool) -> Self {
        self.options.strict_undefined = enabled;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }

    pub fn pretty_urls(mut self, enabled: bool) -> Self {
        self.pretty_urls = enabled;
        self
    }

    pub fn clean(mut self, enabled: bool) -> Self {
        self.clean = enabled;
        self
    }

    pub fn post_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.post_process = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let pages_dir = self.pages_dir.ok_or(BuildError::MissingPagesDir)?;

        let mut collector = SourceCollector::new(&pages_dir, &self.pattern)?;
        for pattern in &self.exclude {
            collector = collector.exclude(pattern)?;
        }

        Ok(Pipeline {
            collector,
            environment: Environment::new(Resolver::new(&self.template_roots), self.options),
            data_file: self.data_file,
            globals: self.globals,
            emitter: Emitter::new(&self.output_dir).pretty_urls(self.pretty_urls),
            clean: self.clean,
            post_process: self.post_process,
        })
    }
}

/// One source page and the file it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedPage {
    pub source: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub pages: Vec<EmittedPage>,
    pub elapsed: Duration,
}

/// A configured build: collect pages, load data, render, write.
pub struct Pipeline {
    collector: SourceCollector,
    environment: Environment,
    data_file: Option<PathBuf>,
    globals: BTreeMap<String, serde_json::Value>,
    emitter: Emitter,
    clean: bool,
    post_process: Option<PostProcess>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builder preloaded from file/CLI settings.
    pub fn configure(settings: &BuildSettings) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new()
            .pages_dir(&settings.pages)
            .pattern(settings.pattern.as_str())
            .output_dir(&settings.output)
            .autoescape(settings.render.autoescape)
            .strict_undefined(settings.render.strict_undefined)
            .max_depth(settings.render.max_depth)
            .pretty_urls(settings.pretty_urls)
            .clean(settings.clean);

        for pattern in &settings.exclude {
            builder = builder.exclude(pattern.as_str());
        }
        for root in &settings.templates {
            builder = builder.template_root(root);
        }
        if let Some(data) = &settings.data {
            builder = builder.data_file(data);
        }
        for (key, value) in &settings.globals {
            builder = builder.add_global(key, value.clone());
        }
        builder
    }

    pub fn from_settings(settings: &BuildSettings) -> Result<Self, BuildError> {
        Self::configure(settings).build()
    }

    pub fn output_dir(&self) -> &Path {
        self.emitter.root()
    }

    /// Run one full build. The first failure aborts it.
    pub fn run(&self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();

        let sources = self.collector.collect()?.collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            count = sources.len(),
            root = %self.collector.root().display(),
            "collected pages"
        );

        let data = match &self.data_file {
            Some(path) => DataProvider::load(path)?,
            None => DataContext::new(),
        }
        .with_globals(self.globals.clone());

        let output_dir = self.emitter.root();
        if self.clean && output_dir.exists() {
            tracing::debug!(path = %output_dir.display(), "cleaning output directory");
            std::fs::remove_dir_all(output_dir)
                .map_err(|e| BuildError::Clean(output_dir.to_path_buf(), e))?;
        }

        let mut pages = Vec::with_capacity(sources.len());
        for relative in sources {
            let output = self.render_page(&relative, &data)?;
            tracing::info!(page = %relative.display(), output = %output.display(), "rendered");
            pages.push(EmittedPage {
                source: relative,
                output,
            });
        }

        let report = BuildReport {
            pages,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            pages = report.pages.len(),
            output = %output_dir.display(),
            "build finished in {:.2?}",
            report.elapsed
        );

        Ok(report)
    }

    fn render_page(&self, relative: &Path, data: &DataContext) -> Result<PathBuf, BuildError> {
        let name = template_name(relative);
        let source = self.collector.root().join(relative);

        let mut content = self
            .environment
            .render_file(&name, &source, data)
            .map_err(|source| BuildError::Render {
                page: relative.to_path_buf(),
                source,
            })?;
        if let Some(hook) = &self.post_process {
            content = hook(&content);
        }

        let output = self.emitter.emit(&RenderResult {
            relative_path: relative.to_path_buf(),
            content,
        })?;
        Ok(output)
    }
}

/// Run a build described by `settings`.
pub fn build_site(settings: &BuildSettings) -> Result<BuildReport, BuildError> {
    Pipeline::from_settings(settings)?.run()
}

/// Name of a page in messages: its relative path with `/` separators.
fn template_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
