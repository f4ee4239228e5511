//! sql-bulkload CLI - create tables from CSV files and bulk load them into
//! SQL Server, PostgreSQL or MySQL.

use clap::{Args, Parser, Subcommand};
use sql_bulkload::{
    ColumnNaming, Config, CreateTableOptions, CsvOptions, CsvSource, LoadError, LoadOptions,
    Repository, RepositoryRouter, SelectOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "sql-bulkload")]
#[command(about = "Create tables from CSV files and bulk load them into SQL databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: DB_URL__<ALIAS> environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database alias to use (default: the only configured alias, or "default")
    #[arg(long)]
    alias: Option<String>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test database connections
    HealthCheck,

    /// List configured aliases
    Aliases,

    /// Create an empty table shaped like a CSV file
    CreateTable {
        #[command(flatten)]
        csv: CsvArgs,

        #[command(flatten)]
        target: TableArgs,

        #[command(flatten)]
        create: CreateArgs,
    },

    /// Create the table if needed, then insert every CSV row
    Load {
        #[command(flatten)]
        csv: CsvArgs,

        #[command(flatten)]
        target: TableArgs,

        #[command(flatten)]
        create: CreateArgs,

        /// Rows per insert chunk (default: loader.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Count rows in a table
    Count {
        #[command(flatten)]
        target: TableArgs,
    },

    /// Print the first rows of a table as JSON lines
    Top {
        #[command(flatten)]
        target: TableArgs,

        /// Number of rows
        #[arg(short, default_value = "10")]
        n: u64,

        /// Raw WHERE predicate
        #[arg(long = "where")]
        where_clause: Option<String>,

        /// Raw ORDER BY expression
        #[arg(long)]
        order_by: Option<String>,
    },
}

#[derive(Args)]
struct CsvArgs {
    /// CSV file to read
    #[arg(long)]
    csv: PathBuf,

    /// Field delimiter
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Decimal separator
    #[arg(long, default_value = ".")]
    decimal: char,

    /// Columns to parse as dates (repeatable)
    #[arg(long = "parse-dates")]
    parse_dates: Vec<String>,

    /// chrono format for date columns (default: common ISO formats)
    #[arg(long)]
    date_format: Option<String>,
}

#[derive(Args)]
struct TableArgs {
    /// Target schema (default: the alias' schema)
    #[arg(long)]
    schema: Option<String>,

    /// Target table
    #[arg(long)]
    table: String,
}

#[derive(Args)]
struct CreateArgs {
    /// Prefix added to every column name before sanitizing
    #[arg(long)]
    prefix: Option<String>,

    /// Primary key column (repeatable)
    #[arg(long = "pk")]
    primary_key: Vec<String>,

    /// Rows sampled for type inference (default: loader.sample_rows)
    #[arg(long)]
    sample_rows: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_env()?,
    };
    let router = RepositoryRouter::from_config(&config)?;

    match cli.command {
        Commands::Aliases => {
            for alias in router.aliases() {
                println!("{}", alias);
            }
        }

        Commands::HealthCheck => {
            let mut healthy = true;
            println!("Health Check Results:");
            for (alias, repo) in router.iter() {
                if cli.alias.as_deref().is_some_and(|a| !a.eq_ignore_ascii_case(alias)) {
                    continue;
                }
                let start = Instant::now();
                match repo.health_check().await {
                    Ok(()) => println!(
                        "  {} ({}): OK ({}ms)",
                        alias,
                        repo.dialect().name(),
                        start.elapsed().as_millis()
                    ),
                    Err(e) => {
                        healthy = false;
                        println!("  {} ({}): FAILED", alias, repo.dialect().name());
                        println!("    Error: {}", e);
                    }
                }
            }
            if !healthy {
                return Err(LoadError::pool("Health check failed", "health-check"));
            }
        }

        Commands::CreateTable {
            csv,
            target,
            create,
        } => {
            let repo = repository(&router, &config, cli.alias.as_deref())?;
            let mut source = open_csv(&csv)?;
            let created = repo
                .create_table_from_source(
                    &mut source,
                    target.schema.as_deref(),
                    Some(target.table.as_str()),
                    &create.options(),
                )
                .await?;
            println!(
                "{}",
                serde_json::json!({ "table": target.table, "created": created })
            );
        }

        Commands::Load {
            csv,
            target,
            create,
            chunk_size,
        } => {
            let repo = repository(&router, &config, cli.alias.as_deref())?;
            let mut source = open_csv(&csv)?;
            let options = LoadOptions {
                create: create.options(),
                chunk_size,
            };
            let start = Instant::now();
            let report = repo
                .load(&mut source, target.schema.as_deref(), Some(target.table.as_str()), &options)
                .await?;
            info!(
                "Loaded {} rows into {} in {:.2}s",
                report.rows_inserted,
                report.target,
                start.elapsed().as_secs_f64()
            );
            println!("{}", serde_json::to_string(&report)?);
        }

        Commands::Count { target } => {
            let repo = repository(&router, &config, cli.alias.as_deref())?;
            let count = repo.count(target.schema.as_deref(), Some(target.table.as_str())).await?;
            println!("{}", serde_json::json!({ "table": target.table, "count": count }));
        }

        Commands::Top {
            target,
            n,
            where_clause,
            order_by,
        } => {
            let repo = repository(&router, &config, cli.alias.as_deref())?;
            let options = SelectOptions {
                where_clause,
                order_by,
                ..SelectOptions::default()
            };
            let rows = repo
                .select_top(target.schema.as_deref(), Some(target.table.as_str()), n, &options)
                .await?;
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
    }

    Ok(())
}

impl CreateArgs {
    fn options(&self) -> CreateTableOptions {
        CreateTableOptions {
            naming: ColumnNaming::prefixed(self.prefix.clone().unwrap_or_default()),
            primary_key: self.primary_key.clone(),
            sample_rows: self.sample_rows,
            max_text_length: None,
        }
    }
}

/// Repository for `--alias`, or the configured default alias.
fn repository(router: &RepositoryRouter, config: &Config, alias: Option<&str>) -> Result<Repository, LoadError> {
    let alias = match alias {
        Some(alias) => alias.to_string(),
        None => config.default_alias().ok_or_else(|| {
            LoadError::Config(format!(
                "several aliases configured ({}); pass --alias",
                config.aliases().join(", ")
            ))
        })?,
    };
    router.for_alias(&alias)
}

fn open_csv(args: &CsvArgs) -> Result<CsvSource, LoadError> {
    let delimiter = u8::try_from(args.delimiter)
        .map_err(|_| LoadError::Config(format!("delimiter {:?} is not a single byte", args.delimiter)))?;
    let options = CsvOptions {
        delimiter,
        decimal: args.decimal,
        parse_dates: args.parse_dates.clone(),
        date_format: args.date_format.clone(),
    };
    CsvSource::with_options(&args.csv, options)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
