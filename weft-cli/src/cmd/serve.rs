use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use weft_core::{BuildReport, BuildSettings, Pipeline};
use weft_dev_server::{LiveServer, LiveServerConfig, Reloader, inject_livereload_script};
use crate::cmd::build::add_build_args;
use crate::config::{WeftConfig, config_path, watched_paths};

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("serve"))
        .about("Build the site, serve it with live reload and rebuild on changes")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Port to serve on [default: 3000]"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to [default: 127.0.0.1]"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    // Load cascading configuration
    let config = WeftConfig::load(args)?;

    // Pages get the reload script, so build before serving
    run_blocking(dev_pipeline(&config.build)?)
        .await
        .with_context(|| format!("failed to build site from {}", config.build.pages.display()))?;

    let server = LiveServer::new(LiveServerConfig {
        host: config.serve.host.clone(),
        port: config.serve.port,
        root: config.build.output.clone(),
        open: config.serve.open,
    });
    let reloader = server.reloader();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Dev server error: {e:#}");
        }
    });

    // Watch source files and rebuild on changes
    let watcher_args = args.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watch_sources(watcher_args, config, reloader).await {
            tracing::error!("Source watcher error: {e:#}");
        }
    });

    // Wait for both tasks
    let _ = tokio::try_join!(server_handle, watcher_handle)?;

    Ok(())
}

fn dev_pipeline(settings: &BuildSettings) -> Result<Arc<Pipeline>> {
    let pipeline = Pipeline::configure(settings)
        .post_process(inject_livereload_script)
        .build()?;
    Ok(Arc::new(pipeline))
}

/// Run a build on the blocking pool so rendering and file IO stay off the
/// runtime threads the server and watcher use.
async fn run_blocking(pipeline: Arc<Pipeline>) -> Result<BuildReport> {
    let report = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .context("build task panicked")??;
    Ok(report)
}

async fn watch_sources(args: ArgMatches, mut config: WeftConfig, reloader: Reloader) -> Result<()> {
    let config_file = config_path(&args);
    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let mut debouncer = new_debouncer(
        Duration::from_millis(300),
        move |res: DebounceEventResult| match res {
            Ok(events) => {
                for event in events {
                    let _ = tx.blocking_send(event.path);
                }
            }
            Err(e) => tracing::warn!("Watch error: {e}"),
        },
    )?;

    for path in watched_paths(&config, &config_file) {
        let mode = if path.is_dir() {
            notify::RecursiveMode::Recursive
        } else {
            notify::RecursiveMode::NonRecursive
        };
        debouncer
            .watcher()
            .watch(&path, mode)
            .with_context(|| format!("failed to watch {}", path.display()))?;
        tracing::debug!("Watching {}", path.display());
    }
    tracing::info!("Watching for changes...");

    let mut pipeline = dev_pipeline(&config.build)?;
    let config_file = absolute(&config_file);

    while let Some(path) = rx.recv().await {
        // Collapse a burst of events into one rebuild
        let mut changed = vec![path];
        while let Ok(path) = rx.try_recv() {
            changed.push(path);
        }

        // Writes to the output directory are our own
        let output = absolute(&config.build.output);
        let changed: Vec<PathBuf> = changed
            .iter()
            .map(|p| absolute(p))
            .filter(|p| !p.starts_with(&output))
            .collect();
        if changed.is_empty() {
            continue;
        }
        for path in &changed {
            tracing::debug!("Changed: {}", path.display());
        }

        if changed.contains(&config_file) {
            match WeftConfig::load(&args).and_then(|c| Ok((dev_pipeline(&c.build)?, c))) {
                Ok((p, c)) => {
                    pipeline = p;
                    config = c;
                    tracing::info!("Reloaded {}", config_file.display());
                }
                Err(e) => {
                    tracing::error!("Keeping previous configuration: {e:#}");
                    continue;
                }
            }
        }

        match run_blocking(Arc::clone(&pipeline)).await {
            Ok(report) => {
                tracing::info!("Rebuilt {} page(s)", report.pages.len());
                reloader.reload();
            }
            Err(e) => tracing::error!("Rebuild failed: {e:#}"),
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
