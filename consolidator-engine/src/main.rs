use anyhow::Context;
use clap::{Parser, Subcommand};
use consolidator_core::{create_chat_backend, ChatBackend, ConsolidatorConfig, Segment};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use consolidator_engine::subsystems::store::{JsonDirSessionStore, SessionStore};
use consolidator_engine::subsystems::{aggregate, linker, roster};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Aggregate activity into sessions and link them to customers",
    long_about = None
)]
struct Args {
    #[arg(short, long, env = "CONSOLIDATOR_CONFIG", default_value = "consolidator.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link stored sessions to roster customers and contacts
    Link,

    /// Cluster a JSON array of segments into sessions and store them
    Aggregate {
        /// File holding the normalized segments
        #[arg(short, long)]
        input: PathBuf,

        /// Source system recorded on every built session
        #[arg(short, long)]
        source_system: String,
    },

    /// Roster snapshot maintenance
    Roster {
        #[command(subcommand)]
        command: RosterCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RosterCommand {
    /// Build the lean roster from raw customer and contact dumps
    Build {
        #[arg(long)]
        customers: PathBuf,

        #[arg(long)]
        contacts: PathBuf,

        /// Defaults to the configured roster path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (GOOGLE_API_KEY in dev)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match ConsolidatorConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    match args.command {
        Command::Link => run_link(&config).await,
        Command::Aggregate {
            input,
            source_system,
        } => run_aggregate(&config, &input, &source_system).await,
        Command::Roster {
            command:
                RosterCommand::Build {
                    customers,
                    contacts,
                    output,
                },
        } => {
            let output = output.unwrap_or_else(|| config.paths.roster_path());
            run_roster_build(&customers, &contacts, &output).await
        }
    }
}

async fn run_link(config: &ConsolidatorConfig) -> anyhow::Result<()> {
    let store = JsonDirSessionStore::new(config.paths.sessions_folder());
    let provider = roster::JsonRosterProvider::new(config.paths.roster_path());

    let backend: Option<Box<dyn ChatBackend>> = match create_chat_backend(&config.llm) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!("LLM disambiguation disabled: failed to create chat backend: {}", e);
            None
        }
    };

    let linked =
        linker::link_sessions(&store, &provider, backend.as_deref(), &config.linking).await;
    let report = match linked {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Linking aborted: {}", e);
            std::process::exit(1);
        }
    };

    println!("Sessions scanned:  {}", report.scanned);
    println!(
        "Linked:            {} (exact {}, fuzzy {}, llm {})",
        report.linked, report.linked_exact, report.linked_fuzzy, report.linked_llm
    );
    println!("Contacts linked:   {}", report.contacts_linked);
    println!("Errors:            {}", report.errored);
    println!("Skipped:           {}", report.skipped);
    println!("Cache hits:        {}", report.cache_hits);
    if report.save_failures > 0 {
        println!("Save failures:     {}", report.save_failures);
    }
    Ok(())
}

async fn run_aggregate(
    config: &ConsolidatorConfig,
    input: &Path,
    source_system: &str,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("reading segments from {}", input.display()))?;
    let segments: Vec<Segment> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing segments from {}", input.display()))?;

    let source_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());

    let sessions =
        aggregate::aggregate(segments, &config.aggregation, source_system, &source_name)?;

    let store = JsonDirSessionStore::new(config.paths.sessions_folder());
    for session in &sessions {
        store.save(session).await?;
    }

    println!("Built {} sessions from {}", sessions.len(), source_name);
    Ok(())
}

async fn run_roster_build(customers: &Path, contacts: &Path, output: &Path) -> anyhow::Result<()> {
    let raw_customers = roster::read_json_array(customers)
        .await
        .with_context(|| format!("reading customers from {}", customers.display()))?;
    let raw_contacts = roster::read_json_array(contacts)
        .await
        .with_context(|| format!("reading contacts from {}", contacts.display()))?;

    let lean = roster::build_roster(&raw_customers, &raw_contacts);
    roster::write_roster(output, &lean).await?;

    let contact_count: usize = lean.iter().map(|c| c.contacts.len()).sum();
    tracing::info!(
        customers = lean.len(),
        contacts = contact_count,
        path = %output.display(),
        "Roster snapshot written"
    );
    println!(
        "Wrote {} customers ({} contacts) to {}",
        lean.len(),
        contact_count,
        output.display()
    );
    Ok(())
}
