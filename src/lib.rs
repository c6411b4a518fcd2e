pub mod cli;
pub mod config;
pub mod contract;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod io_utils;
pub mod pipeline;
pub mod projection;
pub mod rows;
pub mod schema;
pub mod table;
pub mod upsert;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::LoaderConfig,
    dispatch::Dispatcher,
    io_utils::CsvTableReader,
    pipeline::{Pipeline, open_database},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("turnover_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Ingest(args) => handle_ingest(config, &args),
        Commands::Check(args) => handle_check(config, &args),
        Commands::Contract(args) => handle_contract(&config, &args),
        Commands::Dispatch(args) => handle_dispatch(config, &args),
    }
}

fn load_config(path: Option<&Path>) -> Result<LoaderConfig> {
    match path {
        Some(path) => {
            let config = LoaderConfig::load(path)
                .with_context(|| format!("Loading configuration from {path:?}"))?;
            info!(
                "Loaded contract with {} field(s) for table '{}' from {:?}",
                config.contract.fields().len(),
                config.table,
                path
            );
            Ok(config)
        }
        None => {
            debug!("Using built-in turnover contract");
            Ok(LoaderConfig::default())
        }
    }
}

fn table_reader(args: &cli::InputArgs) -> Result<CsvTableReader> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    Ok(CsvTableReader::new(args.delimiter, encoding))
}

fn handle_ingest(config: LoaderConfig, args: &cli::IngestArgs) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let reader = table_reader(&args.input)?;
    let mut conn = open_database(&args.database.database)
        .with_context(|| format!("Opening database {:?}", args.database.database))?;

    let mut reports = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        info!("Ingesting '{}'", input.display());
        let report = pipeline
            .ingest_path(&mut conn, &reader, input)
            .with_context(|| format!("Ingesting {input:?}"))?;
        info!(
            "✓ {}: {} row(s) in file, {} written",
            report.source_file, report.rows_seen, report.rows_written
        );
        reports.push(report);
    }
    print!("{}", table::render_reports(&reports));
    Ok(())
}

fn handle_check(config: LoaderConfig, args: &cli::DatabaseArgs) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let conn = open_database(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let schema = pipeline.schema();
    schema
        .ensure_schema(&conn)
        .context("Ensuring snapshot schema")?;
    let columns = schema.existing_columns(&conn)?;
    let rows = pipeline.engine().count_rows(&conn)?;

    let headers = vec![
        "column".to_string(),
        "type".to_string(),
        "contract".to_string(),
    ];
    let listing = columns
        .iter()
        .map(|c| {
            let kind = schema
                .column_kind(&c.name)
                .map(|k| k.to_string())
                .unwrap_or_default();
            vec![c.name.clone(), c.declared_type.clone(), kind]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &listing));
    info!(
        "Table '{}' is ready: {} column(s), {} row(s), unique index {}",
        schema.table(),
        columns.len(),
        rows,
        schema.index_name()
    );
    Ok(())
}

fn handle_contract(config: &LoaderConfig, args: &cli::ContractArgs) -> Result<()> {
    match &args.output {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Writing configuration to {path:?}"))?;
            info!("Configuration written to {:?}", path);
        }
        None => print!("{}", table::render_contract(config)),
    }
    Ok(())
}

fn handle_dispatch(config: LoaderConfig, args: &cli::DispatchArgs) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let reader = table_reader(&args.input)?;
    let dispatcher = Dispatcher::new(&pipeline, args.database.database.clone(), reader);
    let stdin = std::io::stdin();
    let handled = dispatcher.serve(stdin.lock(), std::io::stdout().lock())?;
    info!("Dispatcher handled {handled} command(s)");
    Ok(())
}
