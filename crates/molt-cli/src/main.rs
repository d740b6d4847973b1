//! molt - delta-based schema deployment for model-driven databases.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use molt::{
    Config, DeployOptions, DeployOutcome, Dialect, DiffOptions, DropOptions, LoadMode, Migrator,
    PostgresAdapter, ProcessEngine, SqlModelCompiler,
};
use owo_colors::OwoColorize;

/// Delta-based schema deployment for model-driven databases.
#[derive(Parser, Debug)]
#[command(name = "molt", version, about)]
struct Cli {
    /// Path to the molt configuration file
    #[arg(long, default_value = "molt.json", global = true)]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Identify the delta to the live database and deploy it
    Deploy {
        /// Allow the delta to drop tables no longer in the model
        #[arg(long)]
        auto_undeploy: bool,

        /// Render the update SQL instead of applying it
        #[arg(long)]
        dry: bool,

        /// Create the target database first if it does not exist
        #[arg(long)]
        create_db: bool,

        /// Trigger a post-deploy data load
        #[arg(long, value_enum)]
        load_via: Option<LoadVia>,
    },
    /// Generate a diff report between the model and the live database
    Diff {
        /// Persist the report to this file instead of printing it
        #[arg(long)]
        file: Option<Utf8PathBuf>,
    },
    /// Drop the managed tables and views from the database
    Drop {
        /// Drop everything in the schema, including non-managed objects
        #[arg(long)]
        all: bool,
    },
    /// Load data from the configured sources
    Load {
        #[arg(long, value_enum, default_value_t = LoadVia::Full)]
        via: LoadVia,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LoadVia {
    Delta,
    Full,
}

impl From<LoadVia> for LoadMode {
    fn from(via: LoadVia) -> Self {
        match via {
            LoadVia::Delta => LoadMode::Delta,
            LoadVia::Full => LoadMode::Full,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "molt=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> molt::Result<()> {
    let config = Config::load(&cli.config)?;
    tracing::info!(
        service = %config.service.name,
        dialect = ?config.service.dialect,
        "configuration loaded"
    );

    let adapter = match config.service.dialect {
        Dialect::Postgres => PostgresAdapter::new(
            config.service.credentials.clone(),
            config.migrations.schema.clone(),
        ),
        _ => unreachable!("unsupported dialect"),
    };
    let engine = ProcessEngine::new(config.engine.binary.clone());
    let compiler = SqlModelCompiler::new(config.service.model.clone());
    let migrator = Migrator::new(
        config.service.name.clone(),
        config.migrations.clone(),
        adapter,
        engine,
        compiler,
    );

    match cli.command {
        Commands::Deploy {
            auto_undeploy,
            dry,
            create_db,
            load_via,
        } => {
            let outcome = migrator
                .deploy(DeployOptions {
                    auto_undeploy,
                    load_mode: load_via.map(LoadMode::from),
                    dry_run: dry,
                    create_db,
                })
                .await?;
            match outcome {
                DeployOutcome::Applied => {
                    println!("{}", "delta deployed".green().bold());
                }
                DeployOutcome::Previewed { sql } => {
                    println!("{sql}");
                    println!("{}", "dry run, nothing applied".yellow());
                }
            }
        }
        Commands::Diff { file } => {
            if let Some(report) = migrator.diff(DiffOptions { output_file: file }).await? {
                println!("{report}");
            }
        }
        Commands::Drop { all } => {
            migrator.drop(DropOptions { drop_all: all }).await?;
            println!("{}", "dropped".green().bold());
        }
        Commands::Load { via } => {
            migrator.load(via.into()).await?;
            println!("{}", "data loaded".green().bold());
        }
    }
    Ok(())
}
