use crate::constants::*;
use crate::JulianDay;

/// A calendar date and UTC time of day as they appear in KCDC records.
///
/// No calendar validation is performed: the fields are only decomposed
/// arithmetically, so a nonsensical date simply yields a nonsensical Julian day.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch {
    /// Date encoded as `YYYYMMDD`
    pub date: u64,
    /// Time of day encoded as `HHMMSS`
    pub time: u64,
    /// Sub-second part of the time of day, in nanoseconds
    pub nanos: u64,
}

impl Epoch {
    pub fn new(date: u64, time: u64) -> Self {
        Epoch {
            date,
            time,
            nanos: 0,
        }
    }

    pub fn with_nanos(date: u64, time: u64, nanos: u64) -> Self {
        Epoch { date, time, nanos }
    }

    /// Julian day of this epoch. See [`julian_day`].
    pub fn julian_day(&self) -> JulianDay {
        julian_day(self.date, self.time, self.nanos)
    }

    /// Greenwich sidereal time of this epoch, in radians (not reduced to one turn).
    pub fn greenwich_sidereal_angle(&self) -> f64 {
        sidereal_seconds_to_radians(greenwich_sidereal_time(self.julian_day()))
    }
}

/// Computes the Julian day for a date (`YYYYMMDD`), a time of day (`HHMMSS`) and
/// a sub-second part in nanoseconds, following Meeus' Gregorian calendar algorithm.
pub fn julian_day(date: u64, time: u64, nanos: u64) -> JulianDay {

    // Decompose YYYYMMDD
    let mut years = (date / 10_000) as f64;
    let mut months = ((date % 10_000) / 100) as f64;
    let mut days = (date % 100) as f64;

    // January and February count as months 13 and 14 of the previous year
    if months <= 2.0 {
        months += 12.0;
        years -= 1.0;
    }

    // Decompose HHMMSS
    let hours = (time / 10_000) as f64;
    let minutes = ((time % 10_000) / 100) as f64;
    let seconds = (time % 100) as f64 + nanos as f64 * 1e-9;

    days += (hours + (minutes + seconds / 60.0) / 60.0) / 24.0;

    // Gregorian correction
    let century = (years / 100.0).floor();
    let b = 2.0 - century + (century / 4.0).floor();

    (365.25 * (years + 4716.0).floor()).floor() + (306.0 * (months + 1.0) / 10.0).floor() + b + days
        - 1524.5
}

/// Greenwich sidereal time, in seconds, for the given Julian day.
///
/// The mean sidereal time at 0h UT is evaluated from the day part and the
/// fraction of the day is then advanced at the sidereal rate. The result is
/// not reduced to a single day.
pub fn greenwich_sidereal_time(julian_day: JulianDay) -> f64 {

    // Split into the day (starting at 0h UT) and the fraction of it elapsed
    let shifted = julian_day + 0.5;
    let day_part = shifted.floor();
    let day_fraction = shifted - day_part;

    let julian_centuries = (day_part - J2000_DAY_PART) / JULIAN_DAYS_PER_CENTURY;

    // Horner evaluation, highest order first
    let mean_gst0 = GST_COEFFICIENTS
        .iter()
        .rev()
        .fold(0.0, |acc, &coeff| acc * julian_centuries + coeff);

    mean_gst0 + day_fraction * SIDEREAL_RATE * SECONDS_PER_DAY
}

/// Converts sidereal seconds (86400 per turn) into radians.
pub fn sidereal_seconds_to_radians(seconds: f64) -> f64 {
    seconds * std::f64::consts::PI / 43200.0
}

#[cfg(test)]
use approx::assert_abs_diff_eq;

#[test]
fn test_julian_day_j2000() {
    // 2000-01-01 12:00:00 UT is the J2000.0 epoch
    assert_abs_diff_eq!(julian_day(20000101, 120000, 0), 2451545.0, epsilon = 1e-9);
}

#[test]
fn test_julian_day_meeus_examples() {
    // Meeus, Astronomical Algorithms, example 7.a (1957 October 4.81)
    assert_abs_diff_eq!(julian_day(19571004, 192624, 0), 2436116.31, epsilon = 1e-6);
    assert_abs_diff_eq!(julian_day(19570904, 0, 0), 2436085.5, epsilon = 1e-9);
    assert_abs_diff_eq!(julian_day(15821015, 0, 0), 2299160.5, epsilon = 1e-9);
}

#[test]
fn test_julian_day_leap_day_boundary() {
    let feb_29 = julian_day(20000229, 0, 0);
    let mar_01 = julian_day(20000301, 0, 0);
    assert_abs_diff_eq!(mar_01 - feb_29, 1.0, epsilon = 1e-9);

    let dec_31 = julian_day(19991231, 0, 0);
    let jan_01 = julian_day(20000101, 0, 0);
    assert_abs_diff_eq!(jan_01 - dec_31, 1.0, epsilon = 1e-9);
}

#[test]
fn test_julian_day_time_of_day_components() {
    let midnight = julian_day(19980702, 0, 0);
    assert_abs_diff_eq!(julian_day(19980702, 10000, 0) - midnight, 1.0 / 24.0, epsilon = 1e-9);
    assert_abs_diff_eq!(julian_day(19980702, 100, 0) - midnight, 1.0 / 1440.0, epsilon = 1e-9);
    assert_abs_diff_eq!(julian_day(19980702, 1, 0) - midnight, 1.0 / 86400.0, epsilon = 1e-9);
    assert_abs_diff_eq!(
        julian_day(19980702, 0, 500_000_000) - midnight,
        0.5 / 86400.0,
        epsilon = 1e-9
    );
}

#[test]
fn test_julian_day_is_monotonic() {
    let epochs = [
        Epoch::new(19961231, 235959),
        Epoch::new(19970101, 0),
        Epoch::new(19970228, 120000),
        Epoch::new(19970301, 1),
        Epoch::with_nanos(19970301, 1, 500_000_000),
        Epoch::new(19980702, 145647),
        Epoch::new(19980702, 145648),
        Epoch::new(20040229, 0),
        Epoch::new(20041231, 235959),
    ];
    for pair in epochs.windows(2) {
        assert!(
            pair[0].julian_day() < pair[1].julian_day(),
            "{:?} should precede {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_julian_day_garbage_is_total() {
    // Nothing is validated, but the result must still be a number
    assert!(julian_day(0, 0, 0).is_finite());
    assert!(julian_day(99999999, 999999, 999_999_999).is_finite());
}

#[test]
fn test_gst_at_2000_midnight() {
    // GMST at 2000-01-01 0h UT is 6h39m52.27s
    let gst = greenwich_sidereal_time(julian_day(20000101, 0, 0));
    assert_abs_diff_eq!(gst, 6.0 * 3600.0 + 39.0 * 60.0 + 52.27, epsilon = 1e-1);
}

#[test]
fn test_gst_meeus_example() {
    // Meeus example 12.a: 1987-04-10 0h UT, mean sidereal time 13h10m46.3668s
    let gst = greenwich_sidereal_time(julian_day(19870410, 0, 0));
    let expected = 13.0 * 3600.0 + 10.0 * 60.0 + 46.3668;
    assert_abs_diff_eq!(gst.rem_euclid(SECONDS_PER_DAY), expected, epsilon = 1e-2);
}

#[test]
fn test_gst_advances_at_sidereal_rate() {
    let start = greenwich_sidereal_time(julian_day(19980702, 0, 0));
    let later = greenwich_sidereal_time(julian_day(19980702, 60000, 0));
    assert_abs_diff_eq!(later - start, 6.0 * 3600.0 * SIDEREAL_RATE, epsilon = 1e-4);
}

#[test]
fn test_sidereal_seconds_to_radians() {
    assert_abs_diff_eq!(
        sidereal_seconds_to_radians(43200.0),
        std::f64::consts::PI,
        epsilon = 1e-12
    );
    assert_abs_diff_eq!(
        Epoch::new(20000101, 0).greenwich_sidereal_angle(),
        greenwich_sidereal_time(julian_day(20000101, 0, 0)) * std::f64::consts::PI / 43200.0,
        epsilon = 1e-9
    );
}
