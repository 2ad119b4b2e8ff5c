/// Geodetic latitude of the KASCADE array (Karlsruhe), in degrees.
pub const KASCADE_LATITUDE: f64 = 49.0994;
/// Longitude of the KASCADE array, in degrees.
pub const KASCADE_LONGITUDE: f64 = 8.4378;

pub const DEG2RAD: f64 = std::f64::consts::PI / 180.0;
pub const RAD2DEG: f64 = 180.0 / std::f64::consts::PI;

/// Right ascension of the north galactic pole, in degrees.
pub const GAL_N_POLE_RA: f64 = 192.859508;
/// Declination of the north galactic pole, in degrees.
pub const GAL_N_POLE_DEC: f64 = 27.128336;
/// Galactic longitude of the ascending node of the galactic plane, in degrees.
pub const GAL_LON0: f64 = 122.932;

/// Mean sidereal time at 0h UT polynomial in Julian centuries, lowest order first (seconds).
pub const GST_COEFFICIENTS: [f64; 4] = [24110.54841, 8640184.812866, 0.093104, 0.0000062];

/// Ratio of the sidereal to the solar day rate.
pub const SIDEREAL_RATE: f64 = 1.00273790935;

pub const SECONDS_PER_DAY: f64 = 86400.0;
pub const JULIAN_DAYS_PER_CENTURY: f64 = 36525.0;

/// Day part of `JD + 0.5` at 0h UT on 2000-01-01 plus one half day, so that
/// `(day_part - J2000_DAY_PART) / 36525` is the centuries since J2000.0.
pub const J2000_DAY_PART: f64 = 2451545.5;

/// Histogram resolution in degrees.
pub const DEFAULT_BIN_WIDTH: f64 = 0.5;

/// Number of accepted events scrambled together.
pub const DEFAULT_BATCH_CAPACITY: usize = 100_000;

/// Synthetic background events generated per real event.
pub const DEFAULT_SCRAMBLE_MULTIPLIER: usize = 20;

pub const DEFAULT_SEED: u64 = 1;

/// Reference target used by the annotation distance filter (signed RA, Dec).
pub const DEFAULT_TARGET_RA: f64 = -52.0;
pub const DEFAULT_TARGET_DEC: f64 = 40.95;

/// Progress is reported every this many records.
pub const PROGRESS_INTERVAL: u64 = 50_000;
