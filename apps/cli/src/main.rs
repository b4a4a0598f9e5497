use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mod_resolver::{
    Deploy, ModBoard, ModCatalog, ModId, ModResolver, ResolverConfig, connect_command,
    extract_mod_ids,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[derive(Parser)]
#[command(name = "modres", about = "Resolve mod lists and configuration options of a deployment")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every mod referenced by a deployment
    Resolve {
        /// Deployment record (JSON)
        #[arg(long, conflicts_with = "blob")]
        deploy: Option<PathBuf>,
        /// Raw override blob
        #[arg(long)]
        blob: Option<String>,
        /// Only print the referenced ids
        #[arg(long)]
        ids_only: bool,
    },
    /// Search the catalog
    Search { text: String },
    /// Resolve one mod as if it were added from search results
    Add { id: String },
    /// Evaluate a configuration script file in the sandbox
    Eval {
        file: PathBuf,
        /// Mod id the script belongs to
        #[arg(long, default_value = "0")]
        id: String,
    },
    /// Print the console command joining a deployment
    Connect {
        #[arg(long)]
        deploy: PathBuf,
        /// Host to use when the deployment has no public address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = ResolverConfig::from_env().context("loading resolver configuration")?;

    match cli.command {
        Command::Resolve { deploy, blob, ids_only } => {
            let blob = match (deploy, blob) {
                (Some(path), _) => Deploy::load(&path).await?.override_blob().to_string(),
                (None, Some(blob)) => blob,
                (None, None) => bail!("either --deploy or --blob is required"),
            };

            if ids_only {
                let ids: Vec<String> =
                    extract_mod_ids(&blob).iter().map(ToString::to_string).collect();
                println!("{}", serde_json::to_string_pretty(&ids)?);
                return Ok(());
            }

            let resolver = Arc::new(ModResolver::from_config(&config)?);
            let board = ModBoard::new(Arc::clone(&resolver));
            let cancel = CancellationToken::new();

            // Ctrl-C abandons the run without printing a partial list
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            board.load_existing(&blob, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&board.snapshot().picked)?);
            tracing::info!("{:?}", resolver.metrics().snapshot());
        }
        Command::Search { text } => {
            let resolver = ModResolver::from_config(&config)?;
            let found = resolver.search(&text).await?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Command::Add { id } => {
            let id = parse_id(&id)?;
            let resolver = ModResolver::from_config(&config)?;
            // Single-add starts from catalog metadata, as the search view would
            let metadata = resolver
                .catalog()
                .fetch_metadata(std::slice::from_ref(&id))
                .await?
                .into_iter()
                .next()
                .with_context(|| format!("mod {} is not in the catalog", id))?;
            let resolved = resolver.resolve_one_mod(metadata).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Eval { file, id } => {
            let id = parse_id(&id)?;
            let code = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            tracing::debug!("Evaluating {} with {:?}", file.display(), config.script_limits);

            let resolver = ModResolver::from_config(&config)?;
            let options = resolver.evaluate_script(&id, &code)?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        Command::Connect { deploy, host } => {
            let deploy = Deploy::load(&deploy).await?;
            println!("{}", connect_command(&deploy, &host));
        }
    }

    Ok(())
}

fn parse_id(raw: &str) -> Result<ModId> {
    ModId::parse(raw).with_context(|| format!("'{}' is not a mod id", raw))
}
