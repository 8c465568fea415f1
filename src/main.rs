mod config;
mod extract;
mod llm;
mod pipeline;
mod sheet;
mod transcript;

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use extract::Extractor;
use llm::LlmClient;
use pipeline::{Pipeline, RunOptions};
use transcript::fetch::{TranscriptApi, TranscriptSource};

/// Turn a meeting transcript into a spreadsheet row.
#[derive(Parser, Debug)]
#[command(name = "transcript-sheet", version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["bot_id", "sample_file"])))]
struct Cli {
    /// Bot ID for transcript retrieval
    #[arg(short, long)]
    bot_id: Option<String>,
    /// Path to a sample transcript JSON file
    #[arg(short = 'f', long)]
    sample_file: Option<PathBuf>,
    /// Path to the spreadsheet (.xlsx or CSV) whose first row names the fields
    #[arg(short, long)]
    spreadsheet: PathBuf,
    /// Directory for output files
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,
    /// Only write the transcript documents; skip extraction and the spreadsheet
    #[arg(long)]
    markdown_only: bool,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::from_env()?;
    let source = TranscriptSource::from_args(cli.bot_id, cli.sample_file)?;

    let api = TranscriptApi::new(config.transcript_api)?;
    let llm = LlmClient::new(config.llm)?;
    info!(model = llm.model(), "LLM client initialized");

    let pipeline = Pipeline::new(api, Extractor::new(llm));
    let opts = RunOptions {
        source,
        spreadsheet: cli.spreadsheet,
        output_dir: cli.output,
        markdown_only: cli.markdown_only,
    };

    info!("Starting transcript processing");
    let summary = pipeline.run(&opts).await?;
    match summary.appended_row {
        Some(row) => info!(
            entries = summary.entries,
            turns = summary.turns,
            raw = summary.extraction.as_ref().is_some_and(|e| e.is_raw()),
            row,
            spreadsheet = %opts.spreadsheet.display(),
            "Transcript processing completed"
        ),
        None => info!(
            entries = summary.entries,
            turns = summary.turns,
            markdown = %summary.markdown_path.display(),
            "Transcript documents written"
        ),
    }

    Ok(())
}
