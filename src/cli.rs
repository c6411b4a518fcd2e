use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load inventory turnover snapshot reports into a relational store",
    long_about = None
)]
pub struct Cli {
    /// YAML loader configuration (defaults to the built-in turnover contract)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest one or more report files into the snapshot table
    Ingest(IngestArgs),
    /// Ensure the snapshot table exists and report its shape
    Check(DatabaseArgs),
    /// List the column contract or write it as a configuration template
    Contract(ContractArgs),
    /// Answer commands read line by line from stdin
    Dispatch(DispatchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DatabaseArgs {
    /// SQLite database file (accepts a `sqlite://` prefix)
    #[arg(
        short = 'd',
        long = "database",
        env = "DATABASE_URL",
        value_parser = parse_database_path
    )]
    pub database: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Field delimiter (supports ',', 'tab', ';', '|'); inferred from the extension otherwise
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Report files to ingest
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    #[command(flatten)]
    pub database: DatabaseArgs,
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct ContractArgs {
    /// Write the active configuration as YAML instead of printing a table
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
    #[command(flatten)]
    pub input: InputArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_database_path(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim();
    let path = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed);
    if path.is_empty() {
        return Err("Database path cannot be empty".to_string());
    }
    Ok(PathBuf::from(path))
}
