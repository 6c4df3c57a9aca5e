use anyhow::{Context, Result};
use clap::ArgMatches;
use clap::parser::ValueSource;
use config::{Config as ConfigBuilder, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use weft_core::BuildSettings;

pub const DEFAULT_CONFIG_FILE: &str = "./weft.toml";

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WeftConfig {
    /// Build settings handed to weft-core
    #[serde(default)]
    pub build: BuildSettings,
    /// Development server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Host for dev server
    pub host: String,
    /// Port for dev server
    pub port: u16,
    /// Open browser automatically
    pub open: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: false,
        }
    }
}

impl WeftConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (WEFT_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        Self::load_with_env(args, None)
    }

    /// Like [`WeftConfig::load`], reading environment variables from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(args: &ArgMatches, env: Option<Map<String, String>>) -> Result<Self> {
        let config_file = config_path(args);
        // A file named on the command line must exist; the default one is optional.
        let explicit = args.value_source("config") == Some(ValueSource::CommandLine);

        let mut builder = ConfigBuilder::builder();

        // 1. Start with defaults
        builder = builder.add_source(ConfigBuilder::try_from(&Self::default())?);

        // 2. Add configuration file
        if explicit || config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.as_path())
                    .format(FileFormat::Toml)
                    .required(explicit),
            );
        }

        // 3. Add environment variables with WEFT_ prefix
        builder = builder.add_source(
            Environment::with_prefix("WEFT")
                .prefix_separator("_")
                .separator("__") // Use double underscore for nested keys
                .list_separator(",")
                .with_list_parse_key("build.templates")
                .with_list_parse_key("build.exclude")
                .try_parsing(true)
                .source(env),
        );

        // 4. Override with CLI arguments that are actually defined for this command
        for (arg, key) in [
            ("pages", "build.pages"),
            ("pattern", "build.pattern"),
            ("data", "build.data"),
            ("output", "build.output"),
            ("host", "serve.host"),
        ] {
            if let Some(value) = string_arg(args, arg) {
                builder = builder.set_override(key, value.as_str())?;
            }
        }
        for (arg, key) in [("templates", "build.templates"), ("exclude", "build.exclude")] {
            if let Some(values) = args.try_get_many::<String>(arg).ok().flatten() {
                let values: Vec<String> = values.cloned().collect();
                builder = builder.set_override(key, values)?;
            }
        }
        for (arg, key) in [
            ("strict", "build.render.strict_undefined"),
            ("clean", "build.clean"),
            ("pretty-urls", "build.pretty_urls"),
            ("open", "serve.open"),
        ] {
            if flag(args, arg) {
                builder = builder.set_override(key, true)?;
            }
        }
        if let Some(port) = args.try_get_one::<u16>("port").ok().flatten() {
            builder = builder.set_override("serve.port", i64::from(*port))?;
        }

        // Build and deserialize
        let config = builder
            .build()
            .with_context(|| format!("failed to load configuration from {}", config_file.display()))?;
        let weft_config: WeftConfig = config.try_deserialize()?;

        Ok(weft_config)
    }
}

/// Configuration file named by `--config`, or the default `weft.toml`.
pub fn config_path(args: &ArgMatches) -> PathBuf {
    args.try_get_one::<String>("config")
        .ok()
        .flatten()
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

fn string_arg(args: &ArgMatches, id: &str) -> Option<String> {
    args.try_get_one::<String>(id).ok().flatten().cloned()
}

fn flag(args: &ArgMatches, id: &str) -> bool {
    args.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

/// Directories and files whose changes should trigger a rebuild.
pub fn watched_paths(config: &WeftConfig, config_file: &Path) -> Vec<PathBuf> {
    let build = &config.build;
    let mut paths = vec![build.pages.clone()];
    paths.extend(build.templates.iter().cloned());
    paths.extend(build.data.iter().cloned());
    paths.push(config_file.to_path_buf());
    paths.retain(|p| p.exists());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd;

    fn matches(args: &[&str]) -> ArgMatches {
        cmd::serve::make_subcommand()
            .no_binary_name(true)
            .try_get_matches_from(args)
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = WeftConfig::default();
        assert_eq!(config.build.pages, PathBuf::from("./src/pages"));
        assert_eq!(config.build.output, PathBuf::from("./dist"));
        assert_eq!(config.build.templates, vec![PathBuf::from("./src/templates")]);
        assert_eq!(config.serve.port, 3000);
    }

    #[test]
    fn test_cli_args_override() {
        let args = matches(&[
            "--config", "/nonexistent/weft.toml",
            "--pages", "/custom/pages",
            "--output", "/custom/output",
        ]);
        // A missing file named explicitly is an error...
        assert!(WeftConfig::load_with_env(&args, Some(Map::new())).is_err());

        // ...while the default file is optional.
        let args = cmd::build::make_subcommand()
            .no_binary_name(true)
            .try_get_matches_from(["--pages", "/custom/pages", "-t", "a", "-t", "b", "--strict"])
            .unwrap();
        let config = WeftConfig::load_with_env(&args, Some(Map::new())).unwrap();
        assert_eq!(config.build.pages, PathBuf::from("/custom/pages"));
        assert_eq!(config.build.templates, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(config.build.render.strict_undefined);
        // Should still have defaults for non-overridden values
        assert_eq!(config.build.output, PathBuf::from("./dist"));
        assert_eq!(config.serve.host, "127.0.0.1");
    }

    #[test]
    fn test_layering_file_env_cli() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("weft.toml");
        std::fs::write(
            &file,
            r#"
[build]
pages = "file/pages"
output = "file/dist"
pretty_urls = true

[build.globals]
site_name = "From file"

[serve]
port = 4000
"#,
        )
        .unwrap();

        let env = Map::from([
            ("WEFT_BUILD__OUTPUT".to_string(), "env/dist".to_string()),
            ("WEFT_SERVE__PORT".to_string(), "5000".to_string()),
        ]);
        let file_arg = file.to_string_lossy().to_string();
        let args = matches(&["--config", &file_arg, "--port", "6000"]);
        let config = WeftConfig::load_with_env(&args, Some(env)).unwrap();

        assert_eq!(config.build.pages, PathBuf::from("file/pages"));
        assert_eq!(config.build.output, PathBuf::from("env/dist"));
        assert!(config.build.pretty_urls);
        assert_eq!(config.build.globals["site_name"], serde_json::json!("From file"));
        assert_eq!(config.serve.port, 6000);
    }

    #[test]
    fn test_watched_paths_skip_missing() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages");
        std::fs::create_dir_all(&pages).unwrap();

        let mut config = WeftConfig::default();
        config.build.pages = pages.clone();
        config.build.templates = vec![dir.path().join("missing")];

        let watched = watched_paths(&config, &dir.path().join("weft.toml"));
        assert_eq!(watched, vec![pages]);
    }
}
