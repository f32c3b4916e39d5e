//! CAPTAIN DAQ decoder CLI application.
//!
//! Decodes Nevis and UBDAQ files, optionally merged with PDS events, to
//! CSV or binary digit dumps.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tpcdaq_core::nevis::scan_words;
use tpcdaq_core::output::{DigitBinaryWriter, DigitCsvWriter};
use tpcdaq_core::{
    Compression, DecoderConfig, Event, EventSource, InputRegistry, OutputFormat, SkimList,
    WordReader,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Decoder for CAPTAIN TPC and PDS acquisition files.
#[derive(Parser, Debug)]
#[command(name = "tpcdaq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug messages (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress output and informational logs
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode an input file into a digit dump
    Decode(DecodeArgs),

    /// Print word statistics for a Nevis file
    Dump {
        /// Input file path (plain or gzip)
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// List the available input formats
    Formats,
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    /// Input file path; for merge, 'tpc_file,pds_file'
    #[arg(value_name = "INPUT")]
    input: String,

    /// Output file path (.csv, .bin)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: Comma-separated values, one row per channel
    /// - .bin: Binary format (efficient, for programmatic access)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Input format and arguments.
    ///
    /// Examples:
    /// - "ubdaq" (default)
    /// - "ubdaq(2800,3800,temp=50)" (sample window, transient digits)
    /// - "nevis"
    #[arg(short = 't', long = "input-type", default_value = "ubdaq")]
    input_type: String,

    /// Keep only the run/event pairs listed in this file
    #[arg(long, value_name = "PATH")]
    skim: Option<PathBuf>,

    /// Stop after this many events have been written
    #[arg(short = 'n', long, value_name = "N")]
    max_events: Option<u64>,

    /// Maximum samples accepted in one Nevis channel
    #[arg(long, value_name = "N")]
    nevis_sample_cap: Option<usize>,

    /// Maximum samples accepted in one UBDAQ channel
    #[arg(long, value_name = "N")]
    card_sample_cap: Option<usize>,
}

enum DigitWriter {
    Csv(DigitCsvWriter<File>),
    Binary(DigitBinaryWriter<File>),
}

impl DigitWriter {
    fn create(path: &Path) -> Result<Self> {
        let format = OutputFormat::from_path(path).context("Unsupported output format")?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {:?}", path))?;
        let mut writer = match format {
            OutputFormat::Csv => Self::Csv(DigitCsvWriter::new(file)),
            OutputFormat::Binary => Self::Binary(DigitBinaryWriter::new(file)),
        };
        match &mut writer {
            Self::Csv(w) => w.write_header()?,
            Self::Binary(w) => w.write_header()?,
        }
        Ok(writer)
    }

    fn write_event(&mut self, event: &Event) -> Result<()> {
        match self {
            Self::Csv(w) => w.write_event(event)?,
            Self::Binary(w) => w.write_event(event)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        match self {
            Self::Csv(w) => {
                w.flush()?;
                Ok(w.rows())
            }
            Self::Binary(w) => {
                w.flush()?;
                Ok(w.records())
            }
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb
    }
}

fn decode(args: &DecodeArgs, quiet: bool) -> Result<()> {
    let mut config = DecoderConfig::default();
    if let Some(cap) = args.nevis_sample_cap {
        config.nevis_sample_cap = cap;
    }
    if let Some(cap) = args.card_sample_cap {
        config.card_sample_cap = cap;
    }

    let skim = match &args.skim {
        Some(path) => Some(
            SkimList::from_file(path)
                .with_context(|| format!("Failed to read skim list {:?}", path))?,
        ),
        None => None,
    };
    if let Some(list) = &skim {
        info!(entries = list.len(), "skimming events");
    }

    let registry = InputRegistry::with_defaults(config);
    let mut source = registry
        .open(&args.input_type, &args.input)
        .with_context(|| format!("Failed to open {} as {}", args.input, args.input_type))?;
    let mut writer = DigitWriter::create(&args.output)?;

    let progress = spinner(quiet);
    progress.set_message(format!("Decoding {}...", args.input));

    let start_time = Instant::now();
    let mut read = 0u64;
    let mut written = 0u64;
    let mut digits = 0u64;
    while let Some(event) = source.next_event().context("Failed to decode input")? {
        read += 1;
        if let Some(list) = &skim {
            if !list.contains(&event.context) {
                debug!(event = %event.context, "skipped by skim list");
                continue;
            }
        }
        writer.write_event(&event).context("Failed to write output")?;
        written += 1;
        digits += event.digit_count() as u64;
        if written % 10 == 0 {
            progress.set_message(format!("Decoded {} events ({} written)", read, written));
        }
        if matches!(args.max_events, Some(max) if written >= max) {
            info!(written, "reached event limit");
            break;
        }
    }
    let rows = writer.finish().context("Failed to flush output")?;

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Decoded {} events in {:.2}s",
        read,
        total_duration.as_secs_f64()
    ));

    if !quiet {
        let events_per_sec = read as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {}", args.input);
        eprintln!("  Format:       {}", args.input_type);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  Events read:  {}", read);
        eprintln!("  Written:      {}", written);
        eprintln!("  Digits:       {}", digits);
        eprintln!("  Rows:         {}", rows);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} events/s", events_per_sec);
    }
    Ok(())
}

fn dump(input: &Path) -> Result<()> {
    let compression = Compression::sniff(input)
        .with_context(|| format!("Failed to open {:?}", input))?;
    let mut reader = WordReader::open(input, compression)
        .with_context(|| format!("Failed to open {:?}", input))?;
    let scan = scan_words(&mut reader);

    println!("File:         {:?}", input);
    println!("Words:        {}", scan.words);
    println!("Events:       {}", scan.barrier_offsets.len());
    println!("Channels:     {}", scan.channels());
    println!("Samples:      {}", scan.samples());
    if scan.truncated {
        println!("Truncated:    yes");
    }
    println!("Flags:");
    for (flag, count) in scan.flag_counts.iter().enumerate() {
        if *count > 0 {
            println!("  {:X}: {}", flag, count);
        }
    }
    if let Some(first) = scan.barrier_offsets.first() {
        println!("First event at word {}", first);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Command::Decode(args) => decode(args, cli.quiet),
        Command::Dump { input } => dump(input),
        Command::Formats => {
            let registry = InputRegistry::with_defaults(DecoderConfig::default());
            for (name, description) in registry.formats() {
                println!("{:<8} {}", name, description);
            }
            Ok(())
        }
    }
}
