use ndarray::{s, Array2, Zip};
use thiserror::Error;

use crate::utils::coordinates::EquatorialPosition;
use crate::{Count, Degrees};

/// Reasons an equatorial position cannot be placed on the sky grid.
#[derive(Debug, Error, Copy, Clone, PartialEq)]
pub enum GeometricAnomaly {
    #[error("non-finite position (ra = {ra}, dec = {dec})")]
    NonFinite { ra: Degrees, dec: Degrees },
    #[error("declination {0} outside [-90, 90)")]
    DeclinationOutOfRange(Degrees),
    #[error("right ascension {0} outside [0, 360)")]
    RightAscensionOutOfRange(Degrees),
    #[error("bin ({dec_bin}, {ra_bin}) outside the {dec_bins}x{ra_bins} grid")]
    BinOutOfGrid {
        dec_bin: usize,
        ra_bin: usize,
        dec_bins: usize,
        ra_bins: usize,
    },
}

/// Running count of anomalies, by kind.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AnomalyTally {
    pub non_finite: Count,
    pub declination: Count,
    pub right_ascension: Count,
    pub out_of_grid: Count,
}

impl AnomalyTally {
    pub fn record(&mut self, anomaly: &GeometricAnomaly) {
        match anomaly {
            GeometricAnomaly::NonFinite { .. } => self.non_finite += 1,
            GeometricAnomaly::DeclinationOutOfRange(_) => self.declination += 1,
            GeometricAnomaly::RightAscensionOutOfRange(_) => self.right_ascension += 1,
            GeometricAnomaly::BinOutOfGrid { .. } => self.out_of_grid += 1,
        }
    }

    pub fn total(&self) -> Count {
        self.non_finite + self.declination + self.right_ascension + self.out_of_grid
    }

    pub fn merge(&mut self, other: &AnomalyTally) {
        self.non_finite += other.non_finite;
        self.declination += other.declination;
        self.right_ascension += other.right_ascension;
        self.out_of_grid += other.out_of_grid;
    }
}

/// Two dimensional count of events over (declination, right ascension).
///
/// Row `i` holds declinations in `[i, i + 1) * bin_width - 90`, column `j`
/// right ascensions in `[j, j + 1) * bin_width`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyHistogram {
    bin_width: Degrees,
    counts: Array2<Count>,
}

impl SkyHistogram {
    /// Constructs an empty histogram covering the whole sky at `bin_width` degrees.
    ///
    /// `bin_width` must be positive; the grid is rounded up to cover the full sky.
    pub fn new(bin_width: Degrees) -> Self {
        let dec_bins = (180.0 / bin_width).ceil() as usize;
        let ra_bins = (360.0 / bin_width).ceil() as usize;
        SkyHistogram {
            bin_width,
            counts: Array2::zeros((dec_bins, ra_bins)),
        }
    }

    pub fn bin_width(&self) -> Degrees {
        self.bin_width
    }

    /// (declination bins, right ascension bins)
    pub fn dim(&self) -> (usize, usize) {
        self.counts.dim()
    }

    /// Finds the (declination, right ascension) bin of a position without touching the counts.
    pub fn locate(&self, position: &EquatorialPosition) -> Result<(usize, usize), GeometricAnomaly> {
        let EquatorialPosition { ra, dec } = *position;
        if !position.is_finite() {
            return Err(GeometricAnomaly::NonFinite { ra, dec });
        }

        // Shift declination into [0, 180)
        let shifted_dec = dec + 90.0;
        if !(0.0..180.0).contains(&shifted_dec) {
            return Err(GeometricAnomaly::DeclinationOutOfRange(dec));
        }
        if !(0.0..360.0).contains(&ra) {
            return Err(GeometricAnomaly::RightAscensionOutOfRange(ra));
        }

        let dec_bin = (shifted_dec / self.bin_width).floor() as usize;
        let ra_bin = (ra / self.bin_width).floor() as usize;

        let (dec_bins, ra_bins) = self.dim();
        if dec_bin >= dec_bins || ra_bin >= ra_bins {
            return Err(GeometricAnomaly::BinOutOfGrid {
                dec_bin,
                ra_bin,
                dec_bins,
                ra_bins,
            });
        }

        Ok((dec_bin, ra_bin))
    }

    /// Adds one count at `position`. Positions that do not fall on the grid are
    /// returned as an anomaly and leave the histogram untouched.
    pub fn increment(&mut self, position: &EquatorialPosition) -> Result<(), GeometricAnomaly> {
        let bin = self.locate(position)?;
        self.counts[bin] += 1;
        Ok(())
    }

    /// Count in a (declination, right ascension) bin, as stored (south row first).
    pub fn get(&self, dec_bin: usize, ra_bin: usize) -> Option<Count> {
        self.counts.get((dec_bin, ra_bin)).copied()
    }

    pub fn total(&self) -> Count {
        self.counts.sum()
    }

    /// Raw counts with row 0 at the southernmost declination.
    pub fn counts(&self) -> &Array2<Count> {
        &self.counts
    }

    /// Adds every bin of `other` into `self`. Both must share a bin width.
    pub fn merge(&mut self, other: &SkyHistogram) {
        debug_assert_eq!(self.dim(), other.dim(), "merging histograms of different shapes");
        Zip::from(&mut self.counts)
            .and(&other.counts)
            .for_each(|total, &partial| *total += partial);
    }

    /// Counts in sky-map orientation: the first row is the highest declination bin,
    /// columns run in ascending right ascension.
    pub fn export(&self) -> Array2<Count> {
        self.counts.slice(s![..;-1, ..]).to_owned()
    }

    /// [`SkyHistogram::export`] as nested rows.
    pub fn export_rows(&self) -> Vec<Vec<Count>> {
        self.export()
            .outer_iter()
            .map(|row| row.to_vec())
            .collect()
    }
}

#[cfg(test)]
use crate::constants::DEFAULT_BIN_WIDTH;

#[test]
fn test_reference_grid_shape() {
    let histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    assert_eq!(histogram.dim(), (360, 720));
    assert_eq!(histogram.total(), 0);
}

#[test]
fn test_increment_is_additive() {
    let mut histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    let position = EquatorialPosition::new(123.3, 45.1);
    for _ in 0..7 {
        histogram.increment(&position).unwrap();
    }
    // dec 45.1 + 90 = 135.1 -> bin 270, ra 123.3 -> bin 246
    assert_eq!(histogram.get(270, 246), Some(7));
    assert_eq!(histogram.total(), 7);
}

#[test]
fn test_nearby_positions_share_a_bin() {
    let mut histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    histogram.increment(&EquatorialPosition::new(10.01, -20.49)).unwrap();
    histogram.increment(&EquatorialPosition::new(10.49, -20.01)).unwrap();
    assert_eq!(
        histogram.locate(&EquatorialPosition::new(10.01, -20.49)),
        histogram.locate(&EquatorialPosition::new(10.49, -20.01))
    );
    let (dec_bin, ra_bin) = histogram.locate(&EquatorialPosition::new(10.2, -20.2)).unwrap();
    assert_eq!(histogram.get(dec_bin, ra_bin), Some(2));
}

#[test]
fn test_grid_edges() {
    let histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    assert_eq!(histogram.locate(&EquatorialPosition::new(0.0, -90.0)), Ok((0, 0)));
    assert_eq!(
        histogram.locate(&EquatorialPosition::new(359.99, 89.99)),
        Ok((359, 719))
    );
}

#[test]
fn test_anomalies_do_not_touch_counts() {
    let mut histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    let mut tally = AnomalyTally::default();
    let bad = [
        EquatorialPosition::new(f64::NAN, 10.0),
        EquatorialPosition::new(10.0, f64::INFINITY),
        EquatorialPosition::new(10.0, 90.0),
        EquatorialPosition::new(10.0, -90.5),
        EquatorialPosition::new(360.0, 10.0),
        EquatorialPosition::new(-0.1, 10.0),
    ];
    for position in bad.iter() {
        let anomaly = histogram.increment(position).unwrap_err();
        tally.record(&anomaly);
    }
    assert_eq!(histogram.total(), 0);
    assert_eq!(
        tally,
        AnomalyTally {
            non_finite: 2,
            declination: 2,
            right_ascension: 2,
            out_of_grid: 0,
        }
    );
    assert_eq!(tally.total(), 6);
}

#[test]
fn test_uneven_bin_width_guards_grid() {
    // 0.7 does not divide the sky; the last partial bin still exists
    let mut histogram = SkyHistogram::new(0.7);
    assert_eq!(histogram.dim(), (258, 515));
    histogram.increment(&EquatorialPosition::new(359.9, 89.95)).unwrap();
    assert_eq!(histogram.get(257, 514), Some(1));
}

#[test]
fn test_export_is_north_up() {
    let mut histogram = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    histogram.increment(&EquatorialPosition::new(0.2, 89.8)).unwrap();
    histogram.increment(&EquatorialPosition::new(359.8, -89.8)).unwrap();

    let exported = histogram.export();
    assert_eq!(exported[[0, 0]], 1);
    assert_eq!(exported[[359, 719]], 1);

    let rows = histogram.export_rows();
    assert_eq!(rows.len(), 360);
    assert_eq!(rows[0].len(), 720);
    assert_eq!(rows[0][0], 1);
    assert_eq!(rows[359][719], 1);
}

#[test]
fn test_merge() {
    let mut a = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    let mut b = SkyHistogram::new(DEFAULT_BIN_WIDTH);
    let position = EquatorialPosition::new(200.0, 0.0);
    a.increment(&position).unwrap();
    b.increment(&position).unwrap();
    b.increment(&EquatorialPosition::new(20.0, 0.0)).unwrap();
    a.merge(&b);
    assert_eq!(a.total(), 3);
    let (dec_bin, ra_bin) = a.locate(&position).unwrap();
    assert_eq!(a.get(dec_bin, ra_bin), Some(2));
}
