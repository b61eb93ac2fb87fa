//! Schema Import CLI
//!
//! Drives the import engine against JSON snapshots of the message log and the
//! document store, so batches can be imported, previewed and exported offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ledger_schemas::bundle::{load_bundle, write_bundle};
use ledger_schemas::memory::{InMemoryMessageLog, InMemoryStore, InMemoryTagStore, StaticAccounts};
use ledger_schemas::services::{Account, LogNotifier};
use ledger_schemas::{
    ImportConfig, ImportMode, ImportOptions, ImportResult, Owner, SchemaCache, SchemaCategory,
    SchemaImporter,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-import")]
#[command(about = "Import, preview and export ledger schemas")]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Importing user (creator and owner)
    #[arg(long)]
    owner: String,

    /// Target topic ("draft" or unset: do not publish)
    #[arg(long)]
    topic: Option<String>,

    /// Schema category (POLICY, TOOL, SYSTEM)
    #[arg(long)]
    category: Option<SchemaCategory>,

    /// Keep the incoming uuids
    #[arg(long)]
    skip_generate_id: bool,

    /// Stamp schemas as DEMO and never publish
    #[arg(long)]
    demo: bool,

    /// Delete already-saved schemas when the batch fails
    #[arg(long)]
    rollback: bool,

    /// Account used to sign published messages
    #[arg(long, default_value = "0.0.0")]
    account: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a bundle directory of descriptor files
    Import {
        /// Bundle directory
        #[arg(short, long)]
        bundle: PathBuf,

        /// Document store snapshot (created if missing)
        #[arg(short, long)]
        store: PathBuf,

        /// Message log snapshot, written back when schemas are published
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Import as read-only system schemas
        #[arg(long)]
        system: bool,

        #[command(flatten)]
        target: Target,
    },

    /// Import schemas published on the message log
    ImportMessages {
        /// Message log snapshot
        #[arg(short, long)]
        log: PathBuf,

        /// Document store snapshot (created if missing)
        #[arg(short, long)]
        store: PathBuf,

        /// Message ids to import
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        target: Target,
    },

    /// Show schemas from the message log with available upgrades
    Preview {
        /// Message log snapshot
        #[arg(short, long)]
        log: PathBuf,

        /// Message ids to preview
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Export stored schemas and their definitions into a bundle directory
    Export {
        /// Document store snapshot
        #[arg(short, long)]
        store: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Store ids to export
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print the effective configuration
    Config {
        /// Also save it to this file
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ImportConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli.command, config).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct Session {
    log: Arc<InMemoryMessageLog>,
    store: Arc<InMemoryStore>,
    importer: SchemaImporter,
}

impl Session {
    fn open(log: Option<&Path>, store: Option<&Path>, account: &str, config: &ImportConfig) -> anyhow::Result<Self> {
        let log = match log.filter(|p| p.exists()) {
            Some(path) => InMemoryMessageLog::load(path)
                .with_context(|| format!("reading message log {}", path.display()))?,
            None => InMemoryMessageLog::new(),
        };
        let store = match store {
            Some(path) => InMemoryStore::load(path)
                .with_context(|| format!("reading document store {}", path.display()))?,
            None => InMemoryStore::new(),
        };
        let log = Arc::new(log);
        let store = Arc::new(store);
        let accounts = StaticAccounts::single(Account {
            account_id: account.to_string(),
            key: String::new(),
        });

        let importer = SchemaImporter::new(
            log.clone(),
            store.clone(),
            Arc::new(InMemoryTagStore::new()),
            Arc::new(accounts),
            Arc::new(SchemaCache::from_config(&config.cache)),
        )
        .with_external_schemas(config.external_schemas.clone());

        Ok(Self { log, store, importer })
    }
}

fn options_for(target: &Target, config: &ImportConfig) -> ImportOptions {
    let mode = if target.demo { ImportMode::Demo } else { ImportMode::Common };
    let mut options = config.import_options(mode);
    if target.topic.is_some() {
        options.topic_id = target.topic.clone();
    }
    if let Some(category) = target.category {
        options.category = category;
    }
    options.skip_generate_id |= target.skip_generate_id;
    options.rollback_on_failure |= target.rollback;
    options
}

fn print_result(result: &ImportResult) {
    println!("📦 Imported {} schemas", result.schemas_map.len());
    for entry in &result.schemas_map {
        println!(
            "  {} -> {} (id {})",
            entry.old_iri.as_deref().unwrap_or("-"),
            entry.new_iri.as_deref().unwrap_or("-"),
            entry.new_id.as_deref().unwrap_or("-"),
        );
    }
    if !result.errors.is_empty() {
        println!();
        println!("⚠️  {} schemas with errors:", result.errors.len());
        for issue in &result.errors {
            println!("  {} ({}): {}", issue.name, issue.uuid, issue.error);
        }
    }
}

async fn run(command: Commands, config: ImportConfig) -> anyhow::Result<()> {
    match command {
        Commands::Import { bundle, store, log, system, target } => {
            let schemas = load_bundle(&bundle)
                .with_context(|| format!("reading bundle {}", bundle.display()))?;
            let session = Session::open(log.as_deref(), Some(store.as_path()), &target.account, &config)?;
            let owner = Owner::new(target.owner.clone());
            let options = options_for(&target, &config);

            let result = if system {
                session.importer.import_system(schemas, &owner, &options, &LogNotifier).await?
            } else {
                session.importer.import_by_files(schemas, &owner, &options, &LogNotifier).await?
            };

            session.store.save(&store).await?;
            if let Some(log) = &log {
                session.log.save(log).await?;
            }
            print_result(&result);
            Ok(())
        }

        Commands::ImportMessages { log, store, ids, target } => {
            if !log.exists() {
                bail!("message log {} does not exist", log.display());
            }
            let session = Session::open(Some(log.as_path()), Some(store.as_path()), &target.account, &config)?;
            let owner = Owner::new(target.owner.clone());
            let options = options_for(&target, &config);

            let result = session
                .importer
                .import_by_message(&ids, &owner, &options, &LogNotifier)
                .await?;

            session.store.save(&store).await?;
            session.log.save(&log).await?;
            print_result(&result);
            Ok(())
        }

        Commands::Preview { log, ids } => {
            if !log.exists() {
                bail!("message log {} does not exist", log.display());
            }
            let session = Session::open(Some(log.as_path()), None, "0.0.0", &config)?;
            let schemas = session.importer.preview_by_messages(&ids, &LogNotifier).await;

            println!("🔍 {} schemas", schemas.len());
            for schema in &schemas {
                println!("  {} {} [{}]", schema.iri_str(), schema.label(), schema.version);
                for newer in &schema.new_versions {
                    println!(
                        "    └─ {} available (message {})",
                        newer.version,
                        newer.message_id.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }

        Commands::Export { store, out, ids } => {
            let session = Session::open(None, Some(store.as_path()), "0.0.0", &config)?;
            let schemas = session.importer.export_schemas(&ids).await?;
            let paths = write_bundle(&out, &schemas, config.export.output_format)?;
            println!("✅ Exported {} schemas to {}", paths.len(), out.display());
            Ok(())
        }

        Commands::Config { path } => {
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
            if let Some(path) = path {
                config.save(&path)?;
                println!("✅ Saved to {}", path);
            }
            Ok(())
        }
    }
}
