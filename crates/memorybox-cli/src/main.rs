//! Command-line entry point for content-addressed archive storage
//! (spec §6 "External interfaces").

#![deny(unsafe_code)]

mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memorybox_core::{build_store, import, put, PutInput, PutOptions};
use tokio_util::sync::CancellationToken;
use tracing::error;

use config::Config;

/// Content-addressed archive storage.
#[derive(Parser, Debug)]
#[command(name = "memorybox", about = "Content-addressed archive storage")]
struct Cli {
    /// Bounds in-flight work per pipeline stage.
    #[arg(long, global = true, default_value_t = 10)]
    concurrency: usize,
    /// Emit debug-level logs.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    /// Path to the configuration file, overriding `$MEMORYBOX_CONFIG`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one or more inputs into a target.
    Put {
        /// Name of a configured store target.
        target: String,
        /// Input specifiers: `"-"` for stdin, an `http(s)://` URL, or a
        /// local path.
        inputs: Vec<String>,
    },
    /// Fetch a datafile by digest prefix.
    Get {
        /// Name of a configured store target.
        target: String,
        /// A digest prefix resolving to exactly one datafile.
        digest_prefix: String,
    },
    /// Read or mutate a datafile's metafile.
    Meta {
        /// Name of a configured store target.
        target: String,
        /// A digest prefix resolving to exactly one datafile.
        digest_prefix: String,
        #[command(subcommand)]
        action: Option<MetaAction>,
    },
    /// Bulk-ingest from one or more manifest files.
    Import {
        /// Name of a configured store target.
        target: String,
        /// Manifest file paths.
        manifests: Vec<PathBuf>,
    },
    /// Manage configured store targets.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum MetaAction {
    /// Set `data.<key> = <value>`.
    Set {
        /// Key within the metafile's `data` object.
        key: String,
        /// Value, parsed as JSON when possible and stored as a string otherwise.
        value: String,
    },
    /// Delete `data.<key>`.
    ///
    /// Memorybox has no whole-metafile or whole-target delete operation
    /// (spec §3: datafiles are deleted only by an out-of-band operator) so
    /// a key is required here rather than silently no-op'ing on an empty
    /// key when one is omitted.
    Delete {
        /// Key to remove from `data`.
        key: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the full configuration document as YAML.
    Show,
    /// Set `key = value` on a target, creating it if new.
    Set {
        /// Target name.
        target: String,
        /// Key within the target's store factory configuration.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Remove a target entirely.
    Delete {
        /// Target name.
        target: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = memorybox_telemetry::init_json_logging(cli.debug) {
        eprintln!("warning: {e}");
    }

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "memorybox: command failed");
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(exit_code);
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Core(#[from] memorybox_core::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Command::Config { action } = &cli.command {
        return run_config(&config_path, action);
    }

    let ctx = CancellationToken::new();
    let watch = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watch.cancel();
        }
    });

    let target_name = match &cli.command {
        Command::Put { target, .. }
        | Command::Get { target, .. }
        | Command::Meta { target, .. }
        | Command::Import { target, .. } => target.clone(),
        Command::Config { .. } => unreachable!("handled above"),
    };
    let cfg = Config::load(&config_path)?;
    let store = build_store(cfg.target(&target_name)?).await?;

    match cli.command {
        Command::Put { inputs, .. } => {
            let scratch_dir = std::env::temp_dir().join("memorybox-scratch");
            let put_inputs = inputs.into_iter().map(PutInput::new).collect();
            put(store, put_inputs, PutOptions { concurrency: cli.concurrency, scratch_dir }, ctx).await?;
        }
        Command::Get { digest_prefix, .. } => {
            let stdout = tokio::io::stdout();
            memorybox_core::ops::get(store.as_ref(), &digest_prefix, stdout, &ctx).await?;
        }
        Command::Meta { digest_prefix, action, .. } => {
            run_meta(store.as_ref(), &digest_prefix, action, &ctx).await?;
        }
        Command::Import { manifests, .. } => {
            let scratch_dir = std::env::temp_dir().join("memorybox-scratch");
            import(store, &manifests, PutOptions { concurrency: cli.concurrency, scratch_dir }, ctx).await?;
        }
        Command::Config { .. } => unreachable!("handled above"),
    }
    Ok(())
}

async fn run_meta(
    store: &dyn memorybox_core::Store,
    digest_prefix: &str,
    action: Option<MetaAction>,
    ctx: &CancellationToken,
) -> Result<(), CliError> {
    match action {
        None => {
            let bytes = memorybox_core::ops::meta_read_bytes(store, digest_prefix, ctx).await?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        Some(MetaAction::Set { key, value }) => {
            memorybox_core::ops::meta_set(store, digest_prefix, &key, &value, ctx).await?;
        }
        Some(MetaAction::Delete { key }) => {
            memorybox_core::ops::meta_delete(store, digest_prefix, &key, ctx).await?;
        }
    }
    Ok(())
}

fn run_config(config_path: &std::path::Path, action: &ConfigAction) -> Result<(), CliError> {
    let mut cfg = Config::load(config_path)?;
    match action {
        ConfigAction::Show => {
            println!("{}", serde_yaml::to_string(&cfg).map_err(config::ConfigError::from)?);
        }
        ConfigAction::Set { target, key, value } => {
            cfg.set(target, key, value);
            cfg.persist(config_path)?;
        }
        ConfigAction::Delete { target } => {
            cfg.delete(target)?;
            cfg.persist(config_path)?;
        }
    }
    Ok(())
}
