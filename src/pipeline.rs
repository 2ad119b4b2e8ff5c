use ndarray::Array2;
use num_format::{Locale, ToFormattedString};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use crate::background::{BackgroundEstimator, BackgroundStats, Event};
use crate::config::{Config, ConfigError};
use crate::histogram::{AnomalyTally, SkyHistogram};
use crate::utils::coordinates::*;
use crate::utils::loader::KcdcRecord;
use crate::{Count, JulianDay};

/// Counters over the records fed to a [`Pipeline`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub records: Count,
    pub accepted: Count,
    pub below_energy: Count,
    /// Includes records whose energy is not a number
    pub above_energy: Count,
    /// Accepted events that could not be placed on the real sky map
    pub real_anomalies: AnomalyTally,
}

/// The state of one run: real sky map, background estimator and counters.
///
/// Lifecycle is `new` -> `feed`* -> `finish`.
pub struct Pipeline<R: Rng = StdRng> {
    config: Config,
    real: SkyHistogram,
    background: BackgroundEstimator<R>,
    stats: RunStats,
}

impl Pipeline<StdRng> {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let background = BackgroundEstimator::new(&config)?;
        Ok(Pipeline::assemble(config, background))
    }
}

impl<R: Rng> Pipeline<R> {
    /// Constructs a pipeline whose background sampling draws from `rng`.
    pub fn with_rng(config: Config, rng: R) -> Result<Self, ConfigError> {
        let background = BackgroundEstimator::with_rng(&config, rng)?;
        Ok(Pipeline::assemble(config, background))
    }

    fn assemble(config: Config, background: BackgroundEstimator<R>) -> Self {
        Pipeline {
            real: SkyHistogram::new(config.bin_width),
            config,
            background,
            stats: RunStats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn real(&self) -> &SkyHistogram {
        &self.real
    }

    pub fn background(&self) -> &BackgroundEstimator<R> {
        &self.background
    }

    /// Applies the energy cut, counting the rejection. Returns whether the record is kept.
    fn passes_energy_cut(&mut self, record: &KcdcRecord) -> bool {
        self.stats.records += 1;
        let range = &self.config.energy;
        if range.contains(record.energy) {
            true
        } else {
            if record.energy < range.min {
                self.stats.below_energy += 1;
            } else {
                self.stats.above_energy += 1;
            }
            false
        }
    }

    /// Feeds one record. Returns the derived event if the record passed the energy cut.
    pub fn feed(&mut self, record: &KcdcRecord) -> Option<Event> {
        if !self.passes_energy_cut(record) {
            return None;
        }
        let event = Event::observe(
            record.energy,
            record.direction(),
            record.epoch(),
            &self.config.site,
        );
        self.accept(event);
        Some(event)
    }

    /// Feeds a slice of records, transforming the accepted ones on the rayon pool.
    ///
    /// Events enter the sky maps in record order, so the outcome equals feeding
    /// the records one by one.
    pub fn feed_chunk(&mut self, records: &[KcdcRecord]) {
        let accepted: Vec<KcdcRecord> = records
            .iter()
            .filter(|record| self.passes_energy_cut(record))
            .copied()
            .collect();

        let site = self.config.site;
        let events: Vec<Event> = accepted
            .par_iter()
            .map(|record| Event::observe(record.energy, record.direction(), record.epoch(), &site))
            .collect();

        for event in events {
            self.accept(event);
        }
    }

    /// Counts an already transformed event in the real map and hands it to the
    /// background estimator. Events off the grid are tallied and go no further.
    fn accept(&mut self, event: Event) {
        self.stats.accepted += 1;
        match self.real.increment(&event.position) {
            Ok(()) => self.background.push(event),
            Err(anomaly) => {
                log::debug!("event at {:?} dropped: {anomaly}", event.epoch);
                self.stats.real_anomalies.record(&anomaly);
            }
        }
    }

    /// Ends the stream and exports both sky maps.
    pub fn finish(mut self) -> SkyMaps {
        self.background.finish();

        let summary = RunSummary {
            run: self.stats,
            background: *self.background.stats(),
            fake_anomalies: *self.background.anomalies(),
            multiplier: self.background.multiplier(),
        };
        summary.log();

        SkyMaps {
            real: self.real.export(),
            fake: self.background.export(self.config.normalization),
            summary,
        }
    }
}

/// Everything worth reporting at the end of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run: RunStats,
    pub background: BackgroundStats,
    pub fake_anomalies: AnomalyTally,
    pub multiplier: usize,
}

impl RunSummary {
    pub fn log(&self) {
        let fmt = |count: Count| count.to_formatted_string(&Locale::en);
        log::info!(
            "{} records read, {} accepted, {} below and {} above the energy range",
            fmt(self.run.records),
            fmt(self.run.accepted),
            fmt(self.run.below_energy),
            fmt(self.run.above_energy),
        );
        log::info!(
            "{} full batches scrambled into {} synthetic events (K = {})",
            fmt(self.background.full_batches),
            fmt(self.background.synthetic_events),
            self.multiplier,
        );
        if self.background.flushed_events > 0 {
            log::info!(
                "trailing partial batch of {} events was scrambled",
                fmt(self.background.flushed_events)
            );
        }
        if self.background.dropped_events > 0 {
            log::warn!(
                "{} events of the trailing partial batch are missing from the background map",
                fmt(self.background.dropped_events)
            );
        }
        if self.run.real_anomalies.total() > 0 {
            log::warn!(
                "{} accepted events could not be placed on the sky map: {:?}",
                fmt(self.run.real_anomalies.total()),
                self.run.real_anomalies
            );
        }
        if self.fake_anomalies.total() > 0 {
            log::warn!(
                "{} synthetic events could not be placed on the sky map: {:?}",
                fmt(self.fake_anomalies.total()),
                self.fake_anomalies
            );
        }
    }
}

/// The exported products of a run, both north row first.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyMaps {
    /// Observed event counts
    pub real: Array2<Count>,
    /// Expected background, synthetic counts divided by the multiplier
    pub fake: Array2<f64>,
    pub summary: RunSummary,
}

/// The columns appended to each record when annotating a KCDC export.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Annotation {
    /// Right ascension in (-180, 180], or the projected x when Hammer-Aitoff is on
    pub ra: f64,
    pub dec: f64,
    /// Galactic longitude in (-180, 180], or the projected x when Hammer-Aitoff is on
    pub lon: f64,
    pub lat: f64,
    pub julian_day: JulianDay,
    /// Offset from the configured target
    pub distance: f64,
}

impl Annotation {
    pub fn compute(record: &KcdcRecord, config: &Config, hammer: bool) -> Self {
        let epoch = record.epoch();
        let equatorial = horizontal_to_equatorial(&record.direction(), &epoch, &config.site);
        let galactic = equatorial_to_galactic(&equatorial);

        let (mut ra, mut dec) = (equatorial.signed_ra(), equatorial.dec);
        let (mut lon, mut lat) = (galactic.signed_lon(), galactic.lat);
        let distance = target_offset(ra, dec, &config.target);

        if hammer {
            (ra, dec) = hammer_aitoff(ra, dec);
            (lon, lat) = hammer_aitoff(lon, lat);
        }

        Annotation {
            ra,
            dec,
            lon,
            lat,
            julian_day: epoch.julian_day(),
            distance,
        }
    }

    /// Whether the record survives the `max_distance` filter (disabled when not positive).
    pub fn within(&self, max_distance: f64) -> bool {
        max_distance <= 0.0 || self.distance <= max_distance
    }
}

#[cfg(test)]
use crate::config::{EnergyRange, Normalization, PartialBatchPolicy};
#[cfg(test)]
use crate::utils::loader::{ParsedLine, RecordReader, EXAMPLE_EXPORT};
#[cfg(test)]
use approx::assert_abs_diff_eq;

#[cfg(test)]
fn record(energy: f64, zenith: f64, azimuth: f64, time: u64) -> KcdcRecord {
    KcdcRecord {
        energy,
        zenith,
        azimuth,
        date: 19980702,
        time,
        nanos: 0,
    }
}

#[test]
fn test_example_record_lands_in_its_bin() {
    let mut pipeline = Pipeline::new(Config::default()).unwrap();
    let lines: Vec<ParsedLine> = RecordReader::new(EXAMPLE_EXPORT.as_bytes())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let event = pipeline.feed(&lines[0].record).unwrap();

    assert_abs_diff_eq!(event.position.signed_ra(), -103.4510, epsilon = 1e-3);
    assert_abs_diff_eq!(event.position.dec, 83.9679, epsilon = 1e-3);

    // dec 83.97 + 90 -> bin 347, ra 256.55 -> bin 513
    assert_eq!(pipeline.real().get(347, 513), Some(1));
    assert_eq!(pipeline.real().total(), 1);

    let maps = pipeline.finish();
    assert_eq!(maps.real[[359 - 347, 513]], 1);
    assert_eq!(maps.summary.run.accepted, 1);
}

#[test]
fn test_energy_cut() {
    let config = Config {
        energy: EnergyRange::new(15.0, 16.0),
        batch_capacity: 2,
        scramble_multiplier: 3,
        ..Config::default()
    };
    let mut pipeline = Pipeline::new(config).unwrap();
    assert!(pipeline.feed(&record(14.99, 20.0, 30.0, 100000)).is_none());
    assert!(pipeline.feed(&record(16.01, 20.0, 30.0, 100000)).is_none());
    assert!(pipeline.feed(&record(f64::NAN, 20.0, 30.0, 100000)).is_none());
    assert!(pipeline.feed(&record(15.5, 20.0, 30.0, 100000)).is_some());

    assert_eq!(pipeline.real().total(), 1);
    assert_eq!(pipeline.background().pending(), 1);

    let maps = pipeline.finish();
    assert_eq!(
        maps.summary.run,
        RunStats {
            records: 4,
            accepted: 1,
            below_energy: 1,
            above_energy: 2,
            real_anomalies: AnomalyTally::default(),
        }
    );
    assert_eq!(maps.real.sum(), 1);
    assert_abs_diff_eq!(maps.fake.sum(), 1.0);
}

#[test]
fn test_degenerate_direction_is_an_anomaly() {
    let mut pipeline = Pipeline::new(Config::default()).unwrap();
    pipeline.feed(&record(15.0, f64::NAN, 30.0, 100000));
    assert_eq!(pipeline.real().total(), 0);
    assert_eq!(pipeline.background().pending(), 0);
    assert_eq!(pipeline.stats().real_anomalies.non_finite, 1);
}

#[test]
fn test_feed_chunk_matches_feed() {
    let config = Config {
        energy: EnergyRange::new(15.0, 17.0),
        batch_capacity: 25,
        scramble_multiplier: 4,
        seed: 99,
        ..Config::default()
    };
    let records: Vec<KcdcRecord> = (0..120u64)
        .map(|i| record(14.5 + (i % 7) as f64 * 0.4, (i % 40) as f64, (i * 53 % 360) as f64, i * 211))
        .collect();

    let mut one_by_one = Pipeline::new(config.clone()).unwrap();
    for record in records.iter() {
        one_by_one.feed(record);
    }
    let mut chunked = Pipeline::new(config).unwrap();
    for chunk in records.chunks(17) {
        chunked.feed_chunk(chunk);
    }

    assert_eq!(one_by_one.finish(), chunked.finish());
}

#[test]
fn test_partial_batch_policy_reaches_export() {
    let run = |partial_batch: PartialBatchPolicy| {
        let config = Config {
            batch_capacity: 4,
            scramble_multiplier: 2,
            partial_batch,
            normalization: Normalization::Truncate,
            ..Config::default()
        };
        let mut pipeline = Pipeline::new(config).unwrap();
        for i in 0..6 {
            pipeline.feed(&record(15.0, 10.0, i as f64 * 60.0, 100000 + i));
        }
        pipeline.finish()
    };

    let flushed = run(PartialBatchPolicy::Flush);
    assert_eq!(flushed.summary.background.flushed_events, 2);
    assert_eq!(flushed.summary.background.synthetic_events, 12);

    let dropped = run(PartialBatchPolicy::Drop);
    assert_eq!(dropped.summary.background.dropped_events, 2);
    assert_eq!(dropped.summary.background.synthetic_events, 8);
    assert_eq!(dropped.real.sum(), 6);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = Config {
        batch_capacity: 0,
        ..Config::default()
    };
    assert!(matches!(Pipeline::new(config), Err(ConfigError::BatchCapacity)));
}

#[test]
fn test_annotation() {
    let config = Config::default();
    let example = record(15.0428, 44.2007, 7.4743, 145647);
    let annotation = Annotation::compute(&example, &config, false);
    assert_abs_diff_eq!(annotation.ra, -103.4510, epsilon = 1e-3);
    assert_abs_diff_eq!(annotation.dec, 83.9679, epsilon = 1e-3);
    assert_abs_diff_eq!(annotation.lon, 116.7085, epsilon = 1e-3);
    assert_abs_diff_eq!(annotation.lat, 29.6641, epsilon = 1e-3);
    assert_abs_diff_eq!(annotation.julian_day, 2450997.1227662, epsilon = 1e-6);
    assert_abs_diff_eq!(
        annotation.distance,
        target_offset(annotation.ra, annotation.dec, &config.target)
    );
    assert!(annotation.within(0.0));
    assert!(!annotation.within(1.0));

    let projected = Annotation::compute(&example, &config, true);
    let (x, y) = hammer_aitoff(annotation.ra, annotation.dec);
    assert_abs_diff_eq!(projected.ra, x);
    assert_abs_diff_eq!(projected.dec, y);
    assert_abs_diff_eq!(projected.distance, annotation.distance);
}
