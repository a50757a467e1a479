use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pdf_extractor_lib::batch::FileStatus;
use pdf_extractor_lib::commands::{self, AppState, ExtractOptions};
use pdf_extractor_lib::config::Settings;
use pdf_extractor_lib::export;
use pdf_extractor_lib::types::FieldDefinition;
use std::path::PathBuf;
use tracing::warn;

/// Extract structured fields from batches of PDF bills.
#[derive(Debug, Parser)]
#[command(name = "pdf-extractor", about, version)]
struct Cli {
    /// Database file (defaults to the app data folder)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and extract every given PDF concurrently
    Extract {
        /// PDF files to process
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Saved configuration to use (default: most recently used)
        #[arg(long, value_name = "NAME")]
        config: Option<String>,

        /// Extra field as name:type:description; replaces the saved configuration
        #[arg(long = "field", value_name = "SPEC")]
        fields: Vec<FieldDefinition>,

        /// Write CSV; without a path it goes to Downloads (or Desktop)
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        csv: Option<Option<PathBuf>>,

        /// Write an Excel workbook; without a path it goes to Downloads (or Desktop)
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        xlsx: Option<Option<PathBuf>>,

        /// Print per-file results as JSON
        #[arg(long)]
        json: bool,

        /// API key for this run only
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
    },

    /// Manage saved field configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// List saved configurations
    List,
    /// Print one configuration as JSON
    Show { name: String },
    /// Create or replace a configuration
    Save {
        name: String,
        #[arg(long = "field", value_name = "SPEC", required = true)]
        fields: Vec<FieldDefinition>,
    },
    /// Delete a configuration
    Delete { name: String },
    /// Make a configuration the default for the next run
    Use { name: String },
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    /// Store the API key
    Set { key: String },
    /// Remove the stored API key
    Clear,
    /// Show where the API key comes from
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    pdf_extractor_lib::init_tracing(cli.verbose);

    let mut settings = Settings::from_env();
    if let Some(path) = &cli.db {
        settings = settings.with_db_path(path);
    }
    let state = AppState::open(settings).context("failed to open database")?;

    match cli.command {
        Commands::Extract {
            files,
            config,
            fields,
            csv,
            xlsx,
            json,
            api_key,
        } => run_extract(&state, files, config, fields, csv, xlsx, json, api_key).await,
        Commands::Config { action } => run_config(&state, action),
        Commands::Key { action } => run_key(&state, action),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_extract(
    state: &AppState,
    files: Vec<PathBuf>,
    config: Option<String>,
    fields: Vec<FieldDefinition>,
    csv: Option<Option<PathBuf>>,
    xlsx: Option<Option<PathBuf>>,
    json: bool,
    api_key: Option<String>,
) -> Result<()> {
    let opts = ExtractOptions {
        files,
        config,
        fields,
        api_key,
    };
    let report = commands::run_extraction(state, opts).await?;
    let controller = &report.controller;
    let records = controller.records();
    let all_fields = controller.all_fields();

    if json {
        let out = serde_json::to_string_pretty(&commands::record_reports(records))?;
        println!("{}", out);
    } else {
        for r in records {
            match r.status() {
                FileStatus::Completed => {
                    let data = serde_json::to_string(r.extracted_data())?;
                    println!("{}  completed  {}", r.file().name, data);
                }
                status => println!(
                    "{}  {}  {}",
                    r.file().name,
                    status.as_str(),
                    r.error().unwrap_or("")
                ),
            }
        }
    }

    // CSV is the default output unless something else was asked for.
    let csv = match (&csv, &xlsx, json) {
        (None, None, false) => Some(None),
        _ => csv,
    };
    if report.summary.completed == 0 {
        if csv.is_some() || xlsx.is_some() {
            warn!("no completed files, nothing exported");
        }
    } else {
        if let Some(path) = csv {
            let written = export::write_csv(records, &all_fields, path.as_deref())?;
            eprintln!("CSV written to {}", written.display());
        }
        if let Some(path) = xlsx {
            let written = export::export_xlsx(records, &all_fields, path.as_deref())?;
            eprintln!("Excel written to {}", written.display());
        }
    }

    eprintln!(
        "{} completed, {} failed",
        report.summary.completed, report.summary.failed
    );
    if report.summary.failed > 0 {
        bail!("{} of {} files failed", report.summary.failed, report.summary.total());
    }
    Ok(())
}

fn run_config(state: &AppState, action: ConfigAction) -> Result<()> {
    let db = &state.db;
    match action {
        ConfigAction::List => {
            let configs = commands::list_configurations(db)?;
            let current = db.most_recently_used()?.map(|c| c.id);
            if configs.is_empty() {
                println!("No saved configurations.");
            }
            for c in configs {
                let marker = if Some(c.id) == current { "*" } else { " " };
                println!("{} {}  ({} fields)", marker, c.name, c.fields.len());
            }
        }
        ConfigAction::Show { name } => {
            let cfg = commands::show_configuration(db, &name)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        ConfigAction::Save { name, fields } => {
            let id = commands::save_configuration(db, &name, fields)?;
            println!("Saved configuration '{}' (id {})", name.trim(), id);
        }
        ConfigAction::Delete { name } => {
            commands::delete_configuration(db, &name)?;
            println!("Deleted configuration '{}'", name);
        }
        ConfigAction::Use { name } => {
            let cfg = commands::use_configuration(db, &name)?;
            println!("Using configuration '{}'", cfg.name);
        }
    }
    Ok(())
}

fn run_key(state: &AppState, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Set { key } => {
            commands::set_api_key(&state.db, &key)?;
            println!("API key stored.");
        }
        KeyAction::Clear => {
            commands::clear_api_key(&state.db)?;
            println!("Stored API key removed.");
        }
        KeyAction::Status => {
            println!("{}", commands::api_key_status(state)?.as_str());
        }
    }
    Ok(())
}
