mod output;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use schemastep_config::{AppConfig, ConfigLoader, LogConfig};
use schemastep_db::{MigrationExecutor, MigrationKey, questions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemastep", version, about = "Apply declarative schema migrations to SQLite")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to the platform config directory.
    #[arg(long, global = true, env = "SCHEMASTEP_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the config file.
    #[arg(long, global = true, env = "SCHEMASTEP_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply unapplied migrations, optionally only up to APP NAME.
    Migrate { app: Option<String>, name: Option<String> },
    /// Revert a single applied migration.
    Rollback { app: String, name: String },
    /// List migrations and whether each has been applied.
    Showmigrations {
        #[arg(long)]
        json: bool,
    },
    /// Print the SQL a migration would run.
    Sqlmigrate { app: String, name: String },
    /// Print the migrations `migrate` would apply, in order.
    Plan,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // the log level lives in the config, so loading it logs through a
    // RUST_LOG-only subscriber
    let loader = ConfigLoader::new();
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let mut config: AppConfig =
        tracing::subscriber::with_default(bootstrap, || loader.load(cli.config.as_deref()))
            .context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    init_tracing(&config.log);
    match &cli.config {
        Some(path) => info!("using config {}", path.display()),
        None => info!("using config directory {}", loader.config_dir().display()),
    }

    let graph = questions::graph().context("invalid migration graph")?;
    let executor = MigrationExecutor::open(&config.database.path, graph).context(format!(
        "failed to open {}",
        config.database.path.display()
    ))?;
    executor.set_foreign_keys(config.database.foreign_keys)?;

    match cli.command {
        Command::Migrate { app, name } => {
            let target = match (app, name) {
                (Some(app), Some(name)) => Some(resolve(&executor, &app, &name)?),
                (Some(app), None) => {
                    let leaves: Vec<MigrationKey> = executor
                        .graph()
                        .leaves()
                        .into_iter()
                        .filter(|k| k.app_label == app)
                        .cloned()
                        .collect();
                    if leaves.is_empty() {
                        bail!("app '{app}' has no migrations");
                    }
                    let mut outcomes = Vec::new();
                    for leaf in &leaves {
                        outcomes.extend(
                            executor
                                .migrate(Some(leaf))
                                .context("migration run aborted")?,
                        );
                    }
                    print!("{}", output::render_outcomes(&outcomes));
                    return Ok(());
                }
                (None, _) => None,
            };
            let outcomes = executor
                .migrate(target.as_ref())
                .context("migration run aborted")?;
            print!("{}", output::render_outcomes(&outcomes));
        }
        Command::Rollback { app, name } => {
            let key = resolve(&executor, &app, &name)?;
            executor
                .unapply(&key)
                .context(format!("failed to roll back {key}"))?;
            info!("rolled back {key}");
            println!("  Unapplying {key}... OK");
        }
        Command::Showmigrations { json } => {
            let status = executor.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", output::render_status(&status));
            }
        }
        Command::Sqlmigrate { app, name } => {
            let key = resolve(&executor, &app, &name)?;
            for statement in executor.sql_for(&key)? {
                println!("{statement};");
            }
        }
        Command::Plan => {
            let plan = executor.plan(None)?;
            print!("{}", output::render_plan(&plan));
        }
    }

    Ok(())
}

fn resolve(executor: &MigrationExecutor, app: &str, name: &str) -> Result<MigrationKey> {
    Ok(executor.graph().resolve(app, name)?.clone())
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
