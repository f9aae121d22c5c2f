//! quarry CLI - dump, load and copy MySQL-compatible servers

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use quarry::options::{parse_options, read_options_file};
use quarry::{Console, CopyOptions, DumpOptions, DumpScope, Dumper, LoadOptions, Loader};
use quarry_session::{ConnectionOptions, MySqlSessionFactory, SessionFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - logical dump, load and copy for MySQL-compatible servers")]
#[command(version)]
#[command(after_help = "Options files may be JSON or YAML and expand ${VAR} from the environment.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Options file (.json, .yaml or .yml)
    #[arg(long)]
    options: Option<PathBuf>,

    /// Options as inline JSON, applied instead of the file
    #[arg(long, conflicts_with = "options")]
    options_json: Option<String>,

    /// Number of worker sessions
    #[arg(short, long)]
    threads: Option<usize>,

    /// Plan only, make no changes
    #[arg(long)]
    dry_run: bool,

    /// Show a progress line while data moves
    #[arg(long)]
    show_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every schema of an instance, plus user accounts
    DumpInstance {
        /// Output location: a directory or s3://, oci://, azure:// URL
        output: String,

        /// Source server, as user@host:port or mysql:// URL
        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[command(flatten)]
        common: Common,
    },

    /// Dump the listed schemas
    DumpSchemas {
        output: String,

        /// Schemas to dump
        #[arg(required = true)]
        schemas: Vec<String>,

        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[command(flatten)]
        common: Common,
    },

    /// Dump tables and views of one schema
    DumpTables {
        output: String,

        schema: String,

        /// Tables or views to dump
        tables: Vec<String>,

        /// Dump every table and view of the schema
        #[arg(long)]
        all: bool,

        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[command(flatten)]
        common: Common,
    },

    /// Load a dump
    Load {
        /// Dump location
        input: String,

        /// Target server, as user@host:port or mysql:// URL
        #[arg(short, long, env = "QUARRY_TARGET")]
        target: String,

        #[command(flatten)]
        common: Common,
    },

    /// Copy an instance to another server
    CopyInstance {
        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[arg(short, long, env = "QUARRY_TARGET")]
        target: String,

        #[command(flatten)]
        common: Common,
    },

    /// Copy the listed schemas to another server
    CopySchemas {
        #[arg(required = true)]
        schemas: Vec<String>,

        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[arg(short, long, env = "QUARRY_TARGET")]
        target: String,

        #[command(flatten)]
        common: Common,
    },

    /// Copy tables and views of one schema to another server
    CopyTables {
        schema: String,

        tables: Vec<String>,

        #[arg(long)]
        all: bool,

        #[arg(short, long, env = "QUARRY_SOURCE")]
        source: String,

        #[arg(short, long, env = "QUARRY_TARGET")]
        target: String,

        #[command(flatten)]
        common: Common,
    },
}

fn read_options<T>(common: &Common) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if let Some(path) = &common.options {
        return read_options_file(path)
            .with_context(|| format!("Failed to read options from {}", path.display()));
    }
    if let Some(json) = &common.options_json {
        return parse_options(json, true, |name| std::env::var(name).ok())
            .context("Failed to parse --options-json");
    }
    Ok(T::default())
}

fn dump_options(common: &Common, scope: DumpScope) -> anyhow::Result<DumpOptions> {
    let mut options: DumpOptions = read_options(common)?;
    if let Some(threads) = common.threads {
        options.threads = threads;
    }
    options.dry_run |= common.dry_run;
    options.show_progress |= common.show_progress;
    Ok(options.with_scope(scope))
}

fn load_options(common: &Common) -> anyhow::Result<LoadOptions> {
    let mut options: LoadOptions = read_options(common)?;
    if let Some(threads) = common.threads {
        options.threads = threads;
    }
    options.dry_run |= common.dry_run;
    options.show_progress |= common.show_progress;
    Ok(options)
}

fn copy_options(common: &Common, scope: DumpScope) -> anyhow::Result<CopyOptions> {
    let mut options: CopyOptions = read_options(common)?;
    if let Some(threads) = common.threads {
        options.dump.threads = threads;
        options.load.threads = threads;
    }
    options.dump.dry_run |= common.dry_run;
    options.load.dry_run |= common.dry_run;
    options.dump.show_progress |= common.show_progress;
    options.load.show_progress |= common.show_progress;
    options.dump = options.dump.with_scope(scope);
    Ok(options)
}

fn connect(raw: &str) -> anyhow::Result<Arc<dyn SessionFactory>> {
    let options = ConnectionOptions::parse(raw)?;
    Ok(Arc::new(MySqlSessionFactory::new(options)))
}

/// Token cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping workers...");
            cancel.cancel();
        }
    });
    token
}

async fn dump(
    output: &str,
    source: &str,
    options: DumpOptions,
    console: Console,
) -> anyhow::Result<()> {
    let storage = quarry_storage::open_location(output, &options.storage)?;
    let summary = Dumper::new(connect(source)?, storage, options, console)
        .with_cancellation(interrupt_token())
        .run()
        .await?;
    tracing::debug!("Dump finished: {:?}", summary);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let console = Console::stdout();

    match cli.command {
        Commands::DumpInstance {
            output,
            source,
            common,
        } => {
            let options = dump_options(&common, DumpScope::Instance)?;
            dump(&output, &source, options, console).await?;
        }
        Commands::DumpSchemas {
            output,
            schemas,
            source,
            common,
        } => {
            let options = dump_options(&common, DumpScope::Schemas(schemas))?;
            dump(&output, &source, options, console).await?;
        }
        Commands::DumpTables {
            output,
            schema,
            tables,
            all,
            source,
            common,
        } => {
            let scope = DumpScope::Tables {
                schema,
                tables,
                all,
            };
            let options = dump_options(&common, scope)?;
            dump(&output, &source, options, console).await?;
        }
        Commands::Load {
            input,
            target,
            common,
        } => {
            let options = load_options(&common)?;
            let storage = quarry_storage::open_location(&input, &options.storage)?;
            let summary = Loader::new(connect(&target)?, storage, options, console)
                .with_cancellation(interrupt_token())
                .run()
                .await?;
            tracing::debug!("Load finished: {:?}", summary);
        }
        Commands::CopyInstance {
            source,
            target,
            common,
        } => {
            let options = copy_options(&common, DumpScope::Instance)?;
            quarry::copy::copy(connect(&source)?, connect(&target)?, options, console).await?;
        }
        Commands::CopySchemas {
            schemas,
            source,
            target,
            common,
        } => {
            let options = copy_options(&common, DumpScope::Schemas(schemas))?;
            quarry::copy::copy(connect(&source)?, connect(&target)?, options, console).await?;
        }
        Commands::CopyTables {
            schema,
            tables,
            all,
            source,
            target,
            common,
        } => {
            let scope = DumpScope::Tables {
                schema,
                tables,
                all,
            };
            let options = copy_options(&common, scope)?;
            quarry::copy::copy(connect(&source)?, connect(&target)?, options, console).await?;
        }
    }

    Ok(())
}
