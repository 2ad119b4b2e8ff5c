//! Appends RA, DEC, LON, LAT, JDAYS and DIST columns to every record of a KCDC
//! export, optionally keeping only records near the configured target.
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use kcdc_anisotropy::config::Config;
use kcdc_anisotropy::pipeline::Annotation;
use kcdc_anisotropy::utils::io::AnnotationWriter;
use kcdc_anisotropy::utils::loader::RecordReader;
use kcdc_anisotropy::utils::{record_spinner, tick_progress};

#[derive(Parser, Debug)]
struct Cli {
    /// KCDC export (whitespace separated, header line first)
    input: PathBuf,

    /// Annotated output file
    output: PathBuf,

    /// YAML configuration (site, target and max_distance are used)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured max_distance; zero or less keeps every record
    #[arg(long)]
    max_distance: Option<f64>,

    /// Write Hammer-Aitoff projected coordinates instead of angles
    #[arg(long)]
    hammer: bool,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Cli::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(max_distance) = args.max_distance {
        config.max_distance = max_distance;
    }

    log::info!(
        "processing input ({}) output ({})",
        args.input.display(),
        args.output.display()
    );
    if config.max_distance > 0.0 {
        log::info!("using max distance ({})", config.max_distance);
    }

    let file = File::open(&args.input)
        .with_context(|| format!("couldn't open input {}", args.input.display()))?;
    let reader = RecordReader::new(BufReader::new(file))
        .with_context(|| format!("couldn't read header of {}", args.input.display()))?;

    let mut writer = AnnotationWriter::create(&args.output)?;
    writer.write_header(reader.header())?;

    let spinner = record_spinner("annotating");
    let mut lines: u64 = 0;
    let mut written: u64 = 0;
    for parsed in reader {
        lines += 1;
        tick_progress(&spinner, lines);

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("skipping record: {err}");
                continue;
            }
        };

        let annotation = Annotation::compute(&parsed.record, &config, args.hammer);
        if annotation.within(config.max_distance) {
            writer.write_row(&parsed.text, &annotation)?;
            written += 1;
        }
    }
    writer.finish()?;
    spinner.finish_and_clear();

    log::info!("complete: {written} of {lines} records written");
    Ok(())
}
