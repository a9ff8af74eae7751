//! `narrate` — Markdown to narrated audio through an external speech worker.
//!
//! ```text
//! narrate run paper.md --worker python3 -- tts_worker.py --model qwen3-tts
//! narrate run paper.md --worker ./worker --config narrate.json --start-chunk 40
//! narrate summarize output_audio
//! ```

use std::{
    fs::{self, File},
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use env_logger::{Env, Target};
use log::{error, info};

use narrator::{
    stats::{summarize, LOG_FILE_NAME},
    CommandGateway, Narrator, RunConfig, RunOutcome,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Narrate a Markdown document
    Run(RunCommand),

    /// Summarize a previous run from its output directory
    Summarize {
        /// Output directory of the run
        output_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunCommand {
    /// Markdown or plain-text input
    input: PathBuf,

    /// Synthesis worker program (arguments go after `--`)
    #[arg(long)]
    worker: String,

    /// Arguments passed to the worker
    #[arg(last = true)]
    worker_args: Vec<String>,

    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    voice: Option<String>,

    #[arg(long)]
    max_chunk_chars: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Character budget per batch (0 disables)
    #[arg(long)]
    max_batch_chars: Option<usize>,

    #[arg(long)]
    start_chunk: Option<usize>,

    /// Exclusive end index
    #[arg(long)]
    end_chunk: Option<usize>,

    #[arg(long)]
    max_chunks: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    #[arg(long)]
    top_k: Option<u32>,

    #[arg(long)]
    repetition_penalty: Option<f32>,

    #[arg(long)]
    max_new_tokens: Option<u32>,

    /// Greedy decoding
    #[arg(long)]
    no_sample: bool,

    /// Skip assembly unless every chunk has audio
    #[arg(long)]
    no_partial: bool,
}

impl RunCommand {
    fn config(&self) -> Result<RunConfig> {
        let mut c = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if let Some(v) = &self.output_dir {
            c.output_dir = v.clone();
        }
        if let Some(v) = &self.voice {
            c.voice = v.clone();
        }
        if let Some(v) = self.max_chunk_chars {
            c.segment.max_chunk_chars = v;
        }
        if let Some(v) = self.batch_size {
            c.batch.batch_size = v;
        }
        if let Some(v) = self.max_batch_chars {
            c.batch.max_batch_chars = v;
        }
        if let Some(v) = self.start_chunk {
            c.range.start = v;
        }
        if self.end_chunk.is_some() {
            c.range.end = self.end_chunk;
        }
        if self.max_chunks.is_some() {
            c.range.max_chunks = self.max_chunks;
        }
        if self.seed.is_some() {
            c.sampling.seed = self.seed;
        }
        if let Some(v) = self.temperature {
            c.sampling.temperature = v;
        }
        if let Some(v) = self.top_p {
            c.sampling.top_p = v;
        }
        if let Some(v) = self.top_k {
            c.sampling.top_k = v;
        }
        if let Some(v) = self.repetition_penalty {
            c.sampling.repetition_penalty = v;
        }
        if let Some(v) = self.max_new_tokens {
            c.sampling.max_output_tokens = v;
        }
        if self.no_sample {
            c.sampling.sampling_enabled = false;
        }
        if self.no_partial {
            c.assemble_partial = false;
        }

        c.validate()?;
        Ok(c)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Copies every log line to stderr and to `run.log`.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(log_file: Option<File>) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    if let Some(file) = log_file {
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }
    builder.init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn run(cmd: RunCommand) -> Result<ExitCode> {
    let config = cmd.config()?;
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Cannot create output directory: {}", config.output_dir.display())
    })?;
    let log_path = config.output_dir.join(LOG_FILE_NAME);
    let log_file = File::options()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Cannot open {}", log_path.display()))?;
    init_logging(Some(log_file));

    let text = fs::read_to_string(&cmd.input)
        .with_context(|| format!("Cannot read input: {}", cmd.input.display()))?;
    info!("Reading {}", cmd.input.display());

    let gateway = CommandGateway::spawn(&cmd.worker, cmd.worker_args.as_slice())?;
    let mut narrator = Narrator::new(gateway, config);
    let report = narrator.run(&text)?;

    Ok(match report.outcome {
        RunOutcome::Completed { final_path } => {
            info!("Narration written to {}", final_path.display());
            ExitCode::SUCCESS
        }
        RunOutcome::PartiallyCompleted { final_path, missing } => {
            if let Some(path) = final_path {
                info!("Partial narration written to {}", path.display());
            }
            error!("Re-run to generate the {} missing chunks", missing.len());
            ExitCode::from(2)
        }
        RunOutcome::Aborted { completed, error } => {
            error!("Run aborted after {} chunks: {}", completed.len(), error);
            ExitCode::from(3)
        }
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(cmd) => run(cmd),
        Commands::Summarize { output_dir } => {
            init_logging(None);
            let stats = summarize(&output_dir)?;
            println!("Output dir: {}", output_dir.display());
            println!("{}", stats);
            Ok(ExitCode::SUCCESS)
        }
    }
}
