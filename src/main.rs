use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use stockroom::projector::{low_stock_lines, CSV_HEADERS};
use stockroom::{
    AppConfig, AppError, DirectorySink, InventoryApp, LogNotifier, MemoryIdentityProvider,
    MemoryStore, RecordDraft, RecordId,
};

#[derive(Debug, Parser)]
#[command(name = "stockroom", about = "Shared inventory tracker", version)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Account e-mail.
    #[arg(long, global = true)]
    email: Option<String>,
    /// Account password.
    #[arg(long, global = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account.
    Signup,
    /// Add stock. An existing code has the quantity added to it.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        quantity: String,
        #[arg(long)]
        unit: String,
        /// Quantity below which the item is reported as low stock.
        #[arg(long)]
        low_threshold: Option<String>,
    },
    /// Set the quantity of a record.
    Edit { id: String, quantity: String },
    /// Delete a record.
    Delete {
        id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// List records, optionally filtered by name or code.
    List {
        #[arg(long)]
        search: Option<String>,
        /// Emit the records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show low-stock alerts.
    Low,
    /// Write the inventory as CSV.
    Export {
        /// Output directory; defaults to the current directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::load(cli.config.as_deref()).context("load configuration")?;
    let _log_guard = stockroom::init_logging(&config).context("initialize logging")?;
    tracing::debug!(target: "stockroom", "cli booted");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("create data directory {}", config.data_dir.display())
    })?;
    let store = MemoryStore::open(&config.store_path()).context("open local store")?;
    let provider =
        MemoryIdentityProvider::open(&config.accounts_path()).context("open account store")?;
    let mut app = InventoryApp::new(store, provider, &config, Arc::new(LogNotifier));

    let (Some(email), Some(password)) = (cli.email.as_deref(), cli.password.as_deref()) else {
        eprintln!("Error: --email and --password are required");
        return Ok(2);
    };

    if matches!(cli.command, Commands::Signup) {
        return Ok(match app.sign_up(email, password).await {
            Ok(identity) => {
                println!("signed up {}", identity.email);
                0
            }
            Err(err) => report(err.into()),
        });
    }

    if let Err(err) = app.sign_in(email, password).await {
        return Ok(report(err.into()));
    }

    let code = match cli.command {
        Commands::Signup => 0,
        Commands::Add {
            name,
            code,
            quantity,
            unit,
            low_threshold,
        } => {
            let mut draft = RecordDraft::new(name, code, quantity, unit);
            if let Some(threshold) = low_threshold {
                draft = draft.with_low_threshold(threshold);
            }
            match app.add(&draft).await {
                Ok(accepted) => {
                    let id = app
                        .reconciler()
                        .find_by_code(draft.code.trim())
                        .map(|record| record.id.clone())
                        .unwrap_or(accepted.id);
                    println!("{id}");
                    0
                }
                Err(err) => report(err.into()),
            }
        }
        Commands::Edit { id, quantity } => {
            match app.edit_quantity(&RecordId::remote(id), &quantity).await {
                Ok(_) => 0,
                Err(err) => report(err.into()),
            }
        }
        Commands::Delete { id, yes } => {
            match app.delete(&RecordId::remote(id), |_| yes).await {
                Ok(Some(_)) => 0,
                Ok(None) => {
                    eprintln!("Delete not confirmed; pass --yes to delete");
                    1
                }
                Err(err) => report(err.into()),
            }
        }
        Commands::List { search, json } => {
            let records = app.search(search.as_deref().unwrap_or(""));
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&records).context("serialize records")?
                );
            } else {
                println!("ID\t{}", CSV_HEADERS.join("\t"));
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        record.id, record.name, record.code, record.quantity, record.unit
                    );
                }
            }
            0
        }
        Commands::Low => {
            for line in low_stock_lines(app.low_stock()) {
                println!("{line}");
            }
            0
        }
        Commands::Export { out } => {
            let dir = match out {
                Some(dir) => dir,
                None => std::env::current_dir().context("resolve current directory")?,
            };
            let sink = DirectorySink::new(dir).with_file_name(config.export_file_name.clone());
            match app.export_csv(&sink) {
                Ok(path) => {
                    println!("{}", path.display());
                    0
                }
                Err(err) => report(err),
            }
        }
    };

    app.close();
    Ok(code)
}

fn report(err: AppError) -> i32 {
    eprintln!("Error: {err}");
    1
}
