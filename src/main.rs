// ABOUTME: CLI entry point for sqlite-db-transfer
// ABOUTME: Takes SOURCE and DEST paths and copies one SQLite database into the other

use clap::Parser;
use sqlite_db_transfer::{
    load_connect_options, transfer_between, Database, Location, CONFIG_ENV_VAR,
};
use std::ffi::OsString;
use std::path::PathBuf;

const HELP_TEXT: &str = "\
Transfer one SQLite database to another.

sqlite-db-transfer <SOURCE> <DEST>

If the destination is an existing database, the source database will be added
to it. Otherwise, the destination will be a copy of the source database.";

#[derive(Parser, Debug)]
#[command(name = "sqlite-db-transfer")]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    source: PathBuf,
    dest: PathBuf,
}

/// Accept exactly two arguments after the program name
///
/// Both are taken as file paths whatever they look like, including `--`
/// and anything starting with a dash.
fn parse_args(args: impl IntoIterator<Item = OsString>) -> Option<Cli> {
    let mut args: Vec<OsString> = args.into_iter().collect();
    if args.len() != 3 {
        tracing::debug!("Expected 2 arguments, got {}", args.len().saturating_sub(1));
        return None;
    }

    args.insert(1, OsString::from("--"));
    match Cli::try_parse_from(args) {
        Ok(cli) => Some(cli),
        Err(e) => {
            tracing::debug!("Invalid arguments: {}", e);
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(cli) = parse_args(std::env::args_os()) else {
        println!("{}", HELP_TEXT);
        return Ok(());
    };

    let config_path = std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|path| !path.is_empty());
    let options = load_connect_options(config_path.as_deref())?;

    let source = Database::open_with_options(Location::File(cli.source), &options)?;
    let mut destination = Database::open_with_options(Location::File(cli.dest), &options)?;
    transfer_between(&source, &mut destination)?;
    source.close()?;
    destination.close()?;

    Ok(())
}
