use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use docbatch::constants::RESTART_EXIT_CODE;
use docbatch::{
    BatchMonitor, BatchSequencer, CompletionReport, EngineOptions, InputSource, JsonlInput,
    LengthAnnotator, LoggingRestartHandler, OutputLock, OutputLog, RunOutcome, SlowdownDrill,
    UnicodeSentenceSplitter, format_hms, run_job,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docbatch")]
#[command(about = "Checkpointed document batch processor", long_about = None)]
struct Cli {
    /// JSON file with engine options; flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an input file into an output log, resuming where a previous run stopped.
    Run {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_sentence_chars: Option<usize>,
        #[arg(long)]
        stats_key: Option<String>,
        #[arg(long)]
        time_budget_hours: Option<u64>,
        /// Count slowdown restarts in this JSON file.
        #[arg(long)]
        completion_report: Option<PathBuf>,
        /// Stall batches once the rate window has been full this many batches.
        #[arg(long)]
        slowdown_drill: Option<usize>,
    },
    /// Print an output log's totals without appending to it. A zero-byte,
    /// stale, or orphaned snapshot beside the log is deleted on the way.
    /// An empty log file is also deleted.
    Status {
        output: PathBuf,
        #[arg(long)]
        stats_key: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docbatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "docbatch failed");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> docbatch::Result<ExitCode> {
    let mut options = match &cli.config {
        Some(path) => EngineOptions::load(path)?,
        None => EngineOptions::default(),
    };

    match cli.command {
        Commands::Run {
            input,
            output,
            batch_size,
            max_sentence_chars,
            stats_key,
            time_budget_hours,
            completion_report,
            slowdown_drill,
        } => {
            if let Some(value) = batch_size {
                options.batch_size = value;
            }
            if let Some(value) = max_sentence_chars {
                options.max_sentence_chars = value;
            }
            if let Some(value) = stats_key {
                options.predicted_statistics_key = value;
            }
            if let Some(value) = time_budget_hours {
                options.time_budget_hours = value;
            }
            if let Some(delay_batches) = slowdown_drill {
                options.slowdown_drill = Some(SlowdownDrill { delay_batches });
            }
            options.validate()?;
            run(&input, &output, completion_report, &options)
        }
        Commands::Status { output, stats_key } => {
            if let Some(value) = stats_key {
                options.predicted_statistics_key = value;
            }
            status(&output, &options)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(
    input_path: &Path,
    output_path: &Path,
    completion_report: Option<PathBuf>,
    options: &EngineOptions,
) -> docbatch::Result<ExitCode> {
    let _lock = OutputLock::acquire(output_path)?;

    let input = JsonlInput::open(input_path, options.max_sentence_chars, &UnicodeSentenceSplitter)?;
    let log = OutputLog::open(output_path, options.predicted_statistics_key.clone())?
        .with_sync_policy(options.sync);
    let monitor = BatchMonitor::new(input.totals(), options)?;
    let monitor = match completion_report {
        Some(path) => monitor.with_restart_handler(CompletionReport::new(path, LoggingRestartHandler)),
        None => monitor,
    };

    let mut sequencer = BatchSequencer::new(input, log, monitor, options.batch_size)?;
    match run_job(&mut sequencer, &mut LengthAnnotator, options)? {
        RunOutcome::Completed(summary) => {
            println!(
                "complete: {} documents written this run, {} in log",
                summary.documents_written, summary.log_totals.documents
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::RestartRequested {
            last_good_batch_index,
            elapsed_secs,
            ..
        } => {
            println!(
                "restart requested after batch {last_good_batch_index} ({} elapsed)",
                format_hms(elapsed_secs as f64)
            );
            Ok(ExitCode::from(u8::try_from(RESTART_EXIT_CODE).unwrap_or(1)))
        }
    }
}

fn status(output_path: &Path, options: &EngineOptions) -> docbatch::Result<()> {
    let log = OutputLog::open(output_path, options.predicted_statistics_key.clone())?;
    let totals = log.totals();
    println!("log:       {}", log.path().display());
    println!("sealed:    {}", log.is_sealed());
    println!("documents: {}", totals.documents);
    println!("sentences: {}", totals.sentences);
    println!("words:     {}", totals.words);
    println!("chars:     {}", totals.chars);
    Ok(())
}
