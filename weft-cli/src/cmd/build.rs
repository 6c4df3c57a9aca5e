use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use weft_core::build_site;
use crate::config::WeftConfig;

pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("pages")
                .long("pages")
                .value_name("DIR")
                .help("Directory containing the page templates [default: ./src/pages]"),
        )
        .arg(
            Arg::new("pattern")
                .long("pattern")
                .value_name("GLOB")
                .help("Glob selecting pages inside the pages directory [default: **/*.+(html|njk)]"),
        )
        .arg(
            Arg::new("exclude")
                .short('x')
                .long("exclude")
                .value_name("GLOB")
                .action(ArgAction::Append)
                .help("Skip pages matching this glob (repeatable)"),
        )
        .arg(
            Arg::new("templates")
                .short('t')
                .long("templates")
                .value_name("DIR")
                .action(ArgAction::Append)
                .help("Template search root, searched in the order given (repeatable) [default: ./src/templates]"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("FILE")
                .help("JSON or TOML document whose keys become template variables"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for generated site [default: ./dist]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file [default: ./weft.toml]"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Fail on undefined variables instead of rendering nothing"),
        )
        .arg(
            Arg::new("clean")
                .long("clean")
                .action(ArgAction::SetTrue)
                .help("Remove the output directory before building"),
        )
        .arg(
            Arg::new("pretty-urls")
                .long("pretty-urls")
                .action(ArgAction::SetTrue)
                .help("Write about.njk as about/index.html"),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build"))
        .about("Render every page into the output directory")
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    // Load cascading configuration
    let config = WeftConfig::load(args)?;
    let settings = &config.build;

    build_site(settings)
        .with_context(|| format!("failed to build site from {}", settings.pages.display()))?;

    Ok(())
}
