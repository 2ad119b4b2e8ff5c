use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde_derive::Deserialize;
use thiserror::Error;

use crate::constants::*;
use crate::utils::coordinates::{ObservationSite, Target};

/// What happens to the events still buffered when the record stream ends.
#[derive(Debug, Deserialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "snake_case")]
pub enum PartialBatchPolicy {
    /// Scramble the trailing batch like a full one
    Flush,
    /// Discard it, reproducing sky maps made with the original KCDC tooling
    Drop,
}

impl Default for PartialBatchPolicy {
    fn default() -> Self {
        PartialBatchPolicy::Flush
    }
}

/// How raw fake counts are divided by the scramble multiplier on export.
#[derive(Debug, Deserialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// count / K as a float
    Exact,
    /// count / K rounded toward zero
    Truncate,
    /// count / K rounded to the nearest integer, halves up
    RoundHalfUp,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Exact
    }
}

/// Accepted primary energy range, inclusive on both ends (log10 of energy in GeV
/// for KCDC exports).
#[derive(Debug, Deserialize, PartialEq, Copy, Clone)]
#[serde(default)]
pub struct EnergyRange {
    pub min: f64,
    pub max: f64,
}

impl Default for EnergyRange {
    fn default() -> Self {
        EnergyRange {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }
}

impl EnergyRange {
    pub fn new(min: f64, max: f64) -> Self {
        EnergyRange { min, max }
    }

    pub fn contains(&self, energy: f64) -> bool {
        self.min <= energy && energy <= self.max
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bin width must be positive and finite, got {0}")]
    BinWidth(f64),
    #[error("batch capacity must be at least 1")]
    BatchCapacity,
    #[error("scramble multiplier must be at least 1")]
    ScrambleMultiplier,
    #[error("parallel chunk size must be at least 1")]
    ParallelChunk,
    #[error("energy range [{min}, {max}] is empty")]
    EnergyRange { min: f64, max: f64 },
    #[error("site latitude {0} outside [-90, 90]")]
    Latitude(f64),
}

/// Everything a run can be tuned with. Omitted fields take the KASCADE reference values.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub site: ObservationSite,
    pub bin_width: f64,
    pub batch_capacity: usize,
    pub scramble_multiplier: usize,
    pub seed: u64,
    pub energy: EnergyRange,
    pub partial_batch: PartialBatchPolicy,
    pub normalization: Normalization,
    /// Scramble full batches on the rayon pool in chunks of this many events
    pub parallel_chunk: Option<usize>,
    /// Annotation filter center
    pub target: Target,
    /// Annotation filter radius in degrees; zero or less keeps every record
    pub max_distance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            site: ObservationSite::kascade(),
            bin_width: DEFAULT_BIN_WIDTH,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            scramble_multiplier: DEFAULT_SCRAMBLE_MULTIPLIER,
            seed: DEFAULT_SEED,
            energy: EnergyRange::default(),
            partial_batch: PartialBatchPolicy::default(),
            normalization: Normalization::default(),
            parallel_chunk: None,
            target: Target::default(),
            max_distance: 0.0,
        }
    }
}

impl Config {
    /// Reads a YAML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("couldn't open config file {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bin_width.is_finite() && self.bin_width > 0.0) {
            return Err(ConfigError::BinWidth(self.bin_width));
        }
        if self.batch_capacity == 0 {
            return Err(ConfigError::BatchCapacity);
        }
        if self.scramble_multiplier == 0 {
            return Err(ConfigError::ScrambleMultiplier);
        }
        if self.parallel_chunk == Some(0) {
            return Err(ConfigError::ParallelChunk);
        }
        if !(self.energy.min <= self.energy.max) {
            return Err(ConfigError::EnergyRange {
                min: self.energy.min,
                max: self.energy.max,
            });
        }
        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return Err(ConfigError::Latitude(self.site.latitude));
        }
        Ok(())
    }
}

#[test]
fn test_default_is_reference_configuration() {
    let config = Config::default();
    assert_eq!(config.site, ObservationSite::new(49.0994, 8.4378));
    assert_eq!(config.bin_width, 0.5);
    assert_eq!(config.batch_capacity, 100_000);
    assert_eq!(config.scramble_multiplier, 20);
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let yaml = "
batch_capacity: 5000
energy:
  min: 15.0
  max: 16.5
partial_batch: drop
normalization: round_half_up
";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.batch_capacity, 5000);
    assert_eq!(config.energy, EnergyRange::new(15.0, 16.5));
    assert_eq!(config.partial_batch, PartialBatchPolicy::Drop);
    assert_eq!(config.normalization, Normalization::RoundHalfUp);
    assert_eq!(config.scramble_multiplier, DEFAULT_SCRAMBLE_MULTIPLIER);
    assert_eq!(config.site, ObservationSite::kascade());
    assert_eq!(config.parallel_chunk, None);
}

#[test]
fn test_unknown_field_is_rejected() {
    assert!(serde_yaml::from_str::<Config>("bin_widht: 1.0").is_err());
}

#[test]
fn test_validate_rejects_bad_tunables() {
    let invalid = [
        (Config { bin_width: 0.0, ..Config::default() }, ConfigError::BinWidth(0.0)),
        (Config { batch_capacity: 0, ..Config::default() }, ConfigError::BatchCapacity),
        (Config { scramble_multiplier: 0, ..Config::default() }, ConfigError::ScrambleMultiplier),
        (Config { parallel_chunk: Some(0), ..Config::default() }, ConfigError::ParallelChunk),
        (
            Config { energy: EnergyRange::new(17.0, 16.0), ..Config::default() },
            ConfigError::EnergyRange { min: 17.0, max: 16.0 },
        ),
        (
            Config { site: ObservationSite::new(91.0, 0.0), ..Config::default() },
            ConfigError::Latitude(91.0),
        ),
    ];
    for (config, expected) in invalid {
        assert_eq!(config.validate(), Err(expected));
    }
}

#[test]
fn test_config_from_path() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "seed: 42\nsite:\n  latitude: 10.0\n  longitude: -20.0").unwrap();
    let config = Config::from_path(file.path()).unwrap();
    assert_eq!(config.seed, 42);
    assert_eq!(config.site, ObservationSite::new(10.0, -20.0));

    let mut bad = tempfile::NamedTempFile::new().unwrap();
    writeln!(bad, "scramble_multiplier: 0").unwrap();
    assert!(Config::from_path(bad.path()).is_err());
}

#[test]
fn test_energy_range_is_inclusive() {
    let range = EnergyRange::new(15.0, 16.0);
    assert!(range.contains(15.0));
    assert!(range.contains(16.0));
    assert!(!range.contains(14.999));
    assert!(!range.contains(16.001));
    assert!(!range.contains(f64::NAN));
}
