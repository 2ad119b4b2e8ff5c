use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use kcdc_anisotropy::config::Config;
use kcdc_anisotropy::pipeline::Pipeline;
use kcdc_anisotropy::utils::io::write_sky_maps;
use kcdc_anisotropy::utils::loader::{KcdcRecord, RecordReader};
use kcdc_anisotropy::utils::{record_spinner, tick_progress};

/// Builds the real and time-scrambled background sky maps from a KCDC export.
#[derive(Parser, Debug)]
struct Cli {
    /// KCDC export (whitespace separated, header line first)
    input: PathBuf,

    /// YAML configuration; KASCADE reference values are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving real/fake sky maps as .npy and .txt
    #[arg(short, long, default_value = "skymaps")]
    output: PathBuf,

    /// Records transformed together on the thread pool
    #[arg(long, default_value_t = 50_000)]
    chunk: usize,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Cli::parse();
    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    log::info!("running with {config:?}");

    let file = File::open(&args.input)
        .with_context(|| format!("couldn't open input {}", args.input.display()))?;
    let reader = RecordReader::new(BufReader::new(file))
        .with_context(|| format!("couldn't read header of {}", args.input.display()))?;

    let mut pipeline = Pipeline::new(config)?;
    let spinner = record_spinner("sky maps");

    // Gather records into chunks so the transform can run in parallel
    let chunk_size = args.chunk.max(1);
    let mut chunk: Vec<KcdcRecord> = Vec::with_capacity(chunk_size);
    let mut lines: u64 = 0;
    let mut malformed: u64 = 0;
    for parsed in reader {
        lines += 1;
        tick_progress(&spinner, lines);
        match parsed {
            Ok(parsed) => chunk.push(parsed.record),
            Err(err) => {
                log::warn!("skipping record: {err}");
                malformed += 1;
            }
        }
        if chunk.len() == chunk_size {
            pipeline.feed_chunk(&chunk);
            chunk.clear();
        }
    }
    pipeline.feed_chunk(&chunk);
    spinner.finish_and_clear();

    if malformed > 0 {
        log::warn!("{malformed} malformed records were skipped");
    }

    let maps = pipeline.finish();
    write_sky_maps(&args.output, &maps)?;

    Ok(())
}
