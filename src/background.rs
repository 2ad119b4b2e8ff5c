//! Time-scrambled background estimation.
//!
//! Accepted events are collected into batches. Once a batch is full, every event
//! in it is re-observed `K` times: the event keeps its own arrival direction in
//! the detector frame but takes the arrival time of an event drawn uniformly, with
//! replacement, from the same batch. The resulting positions fill the "fake" sky
//! map, which after dividing by `K` is the expected background for the real one.
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{Config, ConfigError, Normalization, PartialBatchPolicy};
use crate::histogram::{AnomalyTally, SkyHistogram};
use crate::utils::coordinates::*;
use crate::utils::time::Epoch;
use crate::Count;

/// An accepted air shower with its derived sky position.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Event {
    pub energy: f64,
    pub direction: HorizontalDirection,
    pub epoch: Epoch,
    pub position: EquatorialPosition,
}

impl Event {
    /// Builds an event, deriving its equatorial position as seen from `site`.
    pub fn observe(
        energy: f64,
        direction: HorizontalDirection,
        epoch: Epoch,
        site: &ObservationSite,
    ) -> Self {
        let position = horizontal_to_equatorial(&direction, &epoch, site);
        Event {
            energy,
            direction,
            epoch,
            position,
        }
    }
}

/// Bookkeeping of what happened to the buffered events.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BackgroundStats {
    /// Batches scrambled because they reached capacity
    pub full_batches: Count,
    /// Events of a trailing partial batch that were scrambled anyway
    pub flushed_events: Count,
    /// Events of a trailing partial batch that were discarded
    pub dropped_events: Count,
    /// Synthetic events generated, including those that hit an anomaly
    pub synthetic_events: Count,
}

pub struct BackgroundEstimator<R: Rng = StdRng> {
    site: ObservationSite,
    capacity: usize,
    multiplier: usize,
    partial_batch: PartialBatchPolicy,
    parallel_chunk: Option<usize>,
    batch: Vec<Event>,
    rng: R,
    fake: SkyHistogram,
    anomalies: AnomalyTally,
    stats: BackgroundStats,
}

impl BackgroundEstimator<StdRng> {
    /// Constructs an estimator whose sampling is seeded from `config.seed`.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        BackgroundEstimator::with_rng(config, StdRng::seed_from_u64(config.seed))
    }
}

impl<R: Rng> BackgroundEstimator<R> {
    /// Constructs an estimator drawing epoch donors from `rng`.
    pub fn with_rng(config: &Config, rng: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(BackgroundEstimator {
            site: config.site,
            capacity: config.batch_capacity,
            multiplier: config.scramble_multiplier,
            partial_batch: config.partial_batch,
            parallel_chunk: config.parallel_chunk,
            batch: Vec::with_capacity(config.batch_capacity),
            rng,
            fake: SkyHistogram::new(config.bin_width),
            anomalies: AnomalyTally::default(),
            stats: BackgroundStats::default(),
        })
    }

    /// Adds an event to the current batch, scrambling the batch once it is full.
    pub fn push(&mut self, event: Event) {
        self.batch.push(event);
        if self.batch.len() >= self.capacity {
            self.scramble_batch();
            self.stats.full_batches += 1;
        }
    }

    /// Ends the stream, applying the partial batch policy to whatever is still buffered.
    pub fn finish(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let pending = self.batch.len() as Count;
        match self.partial_batch {
            PartialBatchPolicy::Flush => {
                log::debug!("scrambling trailing partial batch of {pending} events");
                self.scramble_batch();
                self.stats.flushed_events += pending;
            }
            PartialBatchPolicy::Drop => {
                log::warn!(
                    "dropping trailing partial batch of {pending} events from the background estimate"
                );
                self.batch.clear();
                self.stats.dropped_events += pending;
            }
        }
    }

    /// Number of events waiting for their batch to fill.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn multiplier(&self) -> usize {
        self.multiplier
    }

    /// Raw synthetic event counts, before division by the multiplier.
    pub fn fake(&self) -> &SkyHistogram {
        &self.fake
    }

    pub fn anomalies(&self) -> &AnomalyTally {
        &self.anomalies
    }

    pub fn stats(&self) -> &BackgroundStats {
        &self.stats
    }

    /// Expected background per bin in sky-map orientation (north row first).
    pub fn export(&self, normalization: Normalization) -> Array2<f64> {
        let multiplier = self.multiplier as Count;
        self.fake
            .export()
            .mapv(|count| normalize(count, multiplier, normalization))
    }

    fn scramble_batch(&mut self) {
        let generated = match self.parallel_chunk {
            None => scramble(
                &self.batch,
                &self.batch,
                self.multiplier,
                &self.site,
                &mut self.rng,
                &mut self.fake,
                &mut self.anomalies,
            ),
            Some(chunk_size) => self.scramble_parallel(chunk_size),
        };
        log::debug!(
            "scrambled batch of {} events into {generated} synthetic events",
            self.batch.len()
        );
        self.stats.synthetic_events += generated;
        self.batch.clear();
    }

    /// Splits the batch into chunks, each scrambled with its own generator
    /// seeded from `self.rng` in chunk order, then merges the partial maps.
    fn scramble_parallel(&mut self, chunk_size: usize) -> Count {
        let chunks = (self.batch.len() + chunk_size - 1) / chunk_size;
        let seeds: Vec<u64> = (0..chunks).map(|_| self.rng.gen()).collect();

        let donors: &[Event] = &self.batch;
        let multiplier = self.multiplier;
        let site = self.site;
        let bin_width = self.fake.bin_width();

        let partials: Vec<(SkyHistogram, AnomalyTally, Count)> = donors
            .par_chunks(chunk_size)
            .zip(seeds.par_iter())
            .map(|(sources, &seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut partial = SkyHistogram::new(bin_width);
                let mut anomalies = AnomalyTally::default();
                let generated = scramble(
                    sources,
                    donors,
                    multiplier,
                    &site,
                    &mut rng,
                    &mut partial,
                    &mut anomalies,
                );
                (partial, anomalies, generated)
            })
            .collect();

        let mut generated = 0;
        for (partial, anomalies, count) in partials.iter() {
            self.fake.merge(partial);
            self.anomalies.merge(anomalies);
            generated += count;
        }
        generated
    }
}

/// Re-observes every event in `sources` `multiplier` times with epochs taken
/// from random `donors`, filling `fake`. Returns the number of synthetic events.
fn scramble<R: Rng>(
    sources: &[Event],
    donors: &[Event],
    multiplier: usize,
    site: &ObservationSite,
    rng: &mut R,
    fake: &mut SkyHistogram,
    anomalies: &mut AnomalyTally,
) -> Count {
    let mut generated = 0;
    for event in sources {
        for _ in 0..multiplier {
            let donor = &donors[rng.gen_range(0..donors.len())];
            let position = horizontal_to_equatorial(&event.direction, &donor.epoch, site);
            if let Err(anomaly) = fake.increment(&position) {
                log::debug!("synthetic event dropped: {anomaly}");
                anomalies.record(&anomaly);
            }
            generated += 1;
        }
    }
    generated
}

/// Divides a raw synthetic count by the multiplier.
pub fn normalize(count: Count, multiplier: Count, normalization: Normalization) -> f64 {
    match normalization {
        Normalization::Exact => count as f64 / multiplier as f64,
        Normalization::Truncate => (count / multiplier) as f64,
        Normalization::RoundHalfUp => ((count + multiplier / 2) / multiplier) as f64,
    }
}

#[cfg(test)]
use rand::rngs::mock::StepRng;

#[cfg(test)]
fn small_config(capacity: usize, multiplier: usize) -> Config {
    Config {
        batch_capacity: capacity,
        scramble_multiplier: multiplier,
        ..Config::default()
    }
}

#[cfg(test)]
fn event_at(zenith: f64, azimuth: f64, epoch: Epoch) -> Event {
    Event::observe(15.0, HorizontalDirection::new(zenith, azimuth), epoch, &ObservationSite::kascade())
}

#[test]
fn test_identical_events_fill_one_bin() {
    let capacity = 50;
    let multiplier = 20;
    let mut estimator = BackgroundEstimator::new(&small_config(capacity, multiplier)).unwrap();
    let event = event_at(30.0, 120.0, Epoch::new(19980702, 145647));
    for _ in 0..capacity {
        estimator.push(event);
    }

    assert_eq!(estimator.pending(), 0);
    assert_eq!(estimator.stats().full_batches, 1);
    assert_eq!(estimator.fake().total(), (capacity * multiplier) as Count);

    let (dec_bin, ra_bin) = estimator.fake().locate(&event.position).unwrap();
    assert_eq!(estimator.fake().get(dec_bin, ra_bin), Some((capacity * multiplier) as Count));

    let exported = estimator.export(Normalization::Exact);
    let (dec_bins, _) = estimator.fake().dim();
    assert_eq!(exported[[dec_bins - 1 - dec_bin, ra_bin]], capacity as f64);
    assert_eq!(exported.sum(), capacity as f64);
}

#[test]
fn test_identical_events_fill_one_bin_in_parallel() {
    let capacity = 50;
    let multiplier = 20;
    let config = Config {
        parallel_chunk: Some(7),
        ..small_config(capacity, multiplier)
    };
    let mut estimator = BackgroundEstimator::new(&config).unwrap();
    let event = event_at(30.0, 120.0, Epoch::new(19980702, 145647));
    for _ in 0..capacity {
        estimator.push(event);
    }

    let (dec_bin, ra_bin) = estimator.fake().locate(&event.position).unwrap();
    assert_eq!(estimator.fake().get(dec_bin, ra_bin), Some(1000));
    assert_eq!(estimator.fake().total(), 1000);
    assert_eq!(estimator.stats().synthetic_events, 1000);
    assert_eq!(estimator.anomalies().total(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let zero_chunk = Config {
        parallel_chunk: Some(0),
        ..small_config(2, 3)
    };
    assert_eq!(
        BackgroundEstimator::new(&zero_chunk).err(),
        Some(ConfigError::ParallelChunk)
    );
    assert_eq!(
        BackgroundEstimator::new(&small_config(2, 0)).err(),
        Some(ConfigError::ScrambleMultiplier)
    );
    assert_eq!(
        BackgroundEstimator::with_rng(&small_config(0, 3), StepRng::new(0, 0)).err(),
        Some(ConfigError::BatchCapacity)
    );
}

#[test]
fn test_scrambled_events_keep_direction_and_take_donor_epoch() {
    // A generator stuck at zero always picks the first event of the batch as donor
    let config = small_config(3, 4);
    let mut estimator = BackgroundEstimator::with_rng(&config, StepRng::new(0, 0)).unwrap();
    let donor_epoch = Epoch::new(19990315, 30000);
    let events = [
        event_at(10.0, 40.0, donor_epoch),
        event_at(25.0, 200.0, Epoch::new(19990316, 120000)),
        event_at(40.0, 310.0, Epoch::new(19990401, 235959)),
    ];
    for event in events.iter() {
        estimator.push(*event);
    }

    let mut expected = SkyHistogram::new(config.bin_width);
    for event in events.iter() {
        let position = horizontal_to_equatorial(&event.direction, &donor_epoch, &config.site);
        for _ in 0..4 {
            expected.increment(&position).unwrap();
        }
    }
    assert_eq!(estimator.fake(), &expected);
    assert_eq!(estimator.stats().synthetic_events, 12);
}

#[test]
fn test_partial_batch_flush() {
    let config = small_config(10, 5);
    let mut estimator = BackgroundEstimator::new(&config).unwrap();
    for i in 0..13 {
        estimator.push(event_at(20.0, i as f64 * 20.0, Epoch::new(20000101, i * 100)));
    }
    assert_eq!(estimator.pending(), 3);
    assert_eq!(estimator.fake().total(), 50);

    estimator.finish();
    assert_eq!(estimator.pending(), 0);
    assert_eq!(estimator.fake().total(), 65);
    assert_eq!(
        *estimator.stats(),
        BackgroundStats {
            full_batches: 1,
            flushed_events: 3,
            dropped_events: 0,
            synthetic_events: 65,
        }
    );
}

#[test]
fn test_partial_batch_drop_is_reported() {
    let config = Config {
        partial_batch: PartialBatchPolicy::Drop,
        ..small_config(10, 5)
    };
    let mut estimator = BackgroundEstimator::new(&config).unwrap();
    for i in 0..13 {
        estimator.push(event_at(20.0, i as f64 * 20.0, Epoch::new(20000101, i * 100)));
    }
    estimator.finish();
    assert_eq!(estimator.pending(), 0);
    assert_eq!(estimator.fake().total(), 50);
    assert_eq!(estimator.stats().dropped_events, 3);
    assert_eq!(estimator.stats().flushed_events, 0);
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let run = |seed: u64, parallel_chunk: Option<usize>| {
        let config = Config {
            seed,
            parallel_chunk,
            ..small_config(40, 7)
        };
        let mut estimator = BackgroundEstimator::new(&config).unwrap();
        for i in 0..100u64 {
            let epoch = Epoch::new(19980101 + (i % 28), (i * 3719) % 240000);
            estimator.push(event_at((i % 45) as f64, (i * 37 % 360) as f64, epoch));
        }
        estimator.finish();
        estimator.fake().clone()
    };

    assert_eq!(run(3, None), run(3, None));
    assert_eq!(run(3, Some(16)), run(3, Some(16)));
    assert_eq!(run(3, None).total(), 700);
    assert_eq!(run(3, Some(16)).total(), 700);
}

#[test]
fn test_normalize_policies() {
    assert_eq!(normalize(39, 20, Normalization::Exact), 1.95);
    assert_eq!(normalize(39, 20, Normalization::Truncate), 1.0);
    assert_eq!(normalize(39, 20, Normalization::RoundHalfUp), 2.0);
    assert_eq!(normalize(30, 20, Normalization::RoundHalfUp), 2.0);
    assert_eq!(normalize(29, 20, Normalization::RoundHalfUp), 1.0);
    assert_eq!(normalize(1, 3, Normalization::RoundHalfUp), 0.0);
    assert_eq!(normalize(2, 3, Normalization::RoundHalfUp), 1.0);
    assert_eq!(normalize(0, 20, Normalization::Exact), 0.0);
}
