use serde_derive::Deserialize;

use crate::constants::*;
use crate::utils::time::Epoch;
use crate::{Degrees, Radians};

/// Reduces any angle into [0, 360), rounding toward negative infinity for negative input.
pub fn normalize_degrees(angle: Degrees) -> Degrees {
    let reduced = angle - 360.0 * (angle / 360.0).floor();

    // Tiny negative inputs can round up to exactly 360
    if reduced >= 360.0 {
        reduced - 360.0
    } else {
        reduced
    }
}

/// Maps an angle in [0, 360) to the signed range (-180, 180].
///
/// Exactly 180 stays 180. Only used to present right ascension and galactic
/// longitude, never inside the transform chain.
pub fn to_180_range(angle: Degrees) -> Degrees {
    if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}

/// The fixed location of the detector on Earth.
#[derive(Debug, Deserialize, PartialEq, Copy, Clone)]
#[serde(default)]
pub struct ObservationSite {
    /// Geodetic latitude in degrees
    pub latitude: Degrees,
    /// Longitude in degrees, entering the right ascension with a negative sign
    pub longitude: Degrees,
}

impl Default for ObservationSite {
    fn default() -> Self {
        ObservationSite::kascade()
    }
}

impl ObservationSite {
    pub fn new(latitude: Degrees, longitude: Degrees) -> Self {
        ObservationSite {
            latitude,
            longitude,
        }
    }

    /// The KASCADE array at Karlsruhe.
    pub fn kascade() -> Self {
        ObservationSite::new(KASCADE_LATITUDE, KASCADE_LONGITUDE)
    }
}

/// Direction of an air shower in the detector frame.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct HorizontalDirection {
    /// Angle from overhead, in degrees
    pub zenith: Degrees,
    /// Detector azimuth, in degrees. This is a half turn away from the
    /// convention used in the transform (0 = south, 90 = west).
    pub azimuth: Degrees,
}

impl HorizontalDirection {
    pub fn new(zenith: Degrees, azimuth: Degrees) -> Self {
        HorizontalDirection { zenith, azimuth }
    }

    /// Angle above the horizon, in degrees.
    pub fn altitude(&self) -> Degrees {
        90.0 - self.zenith
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct EquatorialPosition {
    /// Right ascension in [0, 360)
    pub ra: Degrees,
    /// Declination in [-90, 90]
    pub dec: Degrees,
}

impl EquatorialPosition {
    pub fn new(ra: Degrees, dec: Degrees) -> Self {
        EquatorialPosition { ra, dec }
    }

    /// Right ascension in (-180, 180].
    pub fn signed_ra(&self) -> Degrees {
        to_180_range(self.ra)
    }

    pub fn is_finite(&self) -> bool {
        self.ra.is_finite() && self.dec.is_finite()
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct GalacticPosition {
    /// Galactic longitude in [0, 360)
    pub lon: Degrees,
    /// Galactic latitude in [-90, 90]
    pub lat: Degrees,
}

impl GalacticPosition {
    /// Galactic longitude in (-180, 180].
    pub fn signed_lon(&self) -> Degrees {
        to_180_range(self.lon)
    }
}

/// Sines and cosines of the galactic pole, shared by every conversion.
struct GalacticFrame {
    pole_ra: Radians,
    sin_pole_dec: f64,
    cos_pole_dec: f64,
    lon0: Radians,
}

lazy_static! {
    static ref GALACTIC_FRAME: GalacticFrame = GalacticFrame {
        pole_ra: GAL_N_POLE_RA * DEG2RAD,
        sin_pole_dec: (GAL_N_POLE_DEC * DEG2RAD).sin(),
        cos_pole_dec: (GAL_N_POLE_DEC * DEG2RAD).cos(),
        lon0: GAL_LON0 * DEG2RAD,
    };
}

/// Converts a detector direction observed at `site` and `epoch` into equatorial coordinates.
///
/// The hour angle is found from the altitude/azimuth pair (azimuth measured from
/// south toward west), then subtracted from the Greenwich sidereal time together
/// with the site longitude.
pub fn horizontal_to_equatorial(
    direction: &HorizontalDirection,
    epoch: &Epoch,
    site: &ObservationSite,
) -> EquatorialPosition {

    // Work in radians
    let height: Radians = direction.altitude() * DEG2RAD;
    let azimuth: Radians = normalize_degrees(direction.azimuth + 180.0) * DEG2RAD;
    let latitude: Radians = site.latitude * DEG2RAD;
    let longitude: Radians = site.longitude * DEG2RAD;

    let hour_angle = azimuth
        .sin()
        .atan2(azimuth.cos() * latitude.sin() + height.tan() * latitude.cos());

    let gst: Radians = epoch.greenwich_sidereal_angle();

    let ra = normalize_degrees((gst - hour_angle - longitude) * RAD2DEG);
    let dec = (latitude.sin() * height.sin() - latitude.cos() * height.cos() * azimuth.cos()).asin()
        * RAD2DEG;

    EquatorialPosition { ra, dec }
}

/// Rotates equatorial coordinates into the galactic frame.
pub fn equatorial_to_galactic(position: &EquatorialPosition) -> GalacticPosition {
    let frame: &GalacticFrame = &GALACTIC_FRAME;

    let dec: Radians = position.dec * DEG2RAD;
    let delta_ra: Radians = frame.pole_ra - position.ra * DEG2RAD;

    let x = delta_ra
        .sin()
        .atan2(delta_ra.cos() * frame.sin_pole_dec - dec.tan() * frame.cos_pole_dec);
    let lat = (dec.sin() * frame.sin_pole_dec + dec.cos() * frame.cos_pole_dec * delta_ra.cos())
        .asin();
    let lon = (std::f64::consts::PI + frame.lon0 - x).rem_euclid(2.0 * std::f64::consts::PI);

    GalacticPosition {
        lon: lon * RAD2DEG,
        lat: lat * RAD2DEG,
    }
}

/// Hammer-Aitoff equal-area projection of a (longitude, latitude) pair given in degrees.
///
/// Returns plane coordinates scaled so that x spans [-180, 180] and y spans [-90, 90].
pub fn hammer_aitoff(lon: Degrees, lat: Degrees) -> (f64, f64) {
    let lon = lon * DEG2RAD;
    let lat = lat * DEG2RAD;
    let z = (1.0 + lat.cos() * (lon / 2.0).cos()).sqrt();
    (
        180.0 * lat.cos() * (lon / 2.0).sin() / z,
        90.0 * lat.sin() / z,
    )
}

/// A sky location events are selected around.
#[derive(Debug, Deserialize, PartialEq, Copy, Clone)]
#[serde(default)]
pub struct Target {
    /// Signed right ascension, in (-180, 180]
    pub ra: Degrees,
    pub dec: Degrees,
}

impl Default for Target {
    fn default() -> Self {
        Target {
            ra: DEFAULT_TARGET_RA,
            dec: DEFAULT_TARGET_DEC,
        }
    }
}

/// Offset of a position from `target`, with the right ascension difference
/// divided by cos(target declination).
///
/// `ra` must be in the signed range, the same as `target.ra`.
pub fn target_offset(ra: Degrees, dec: Degrees, target: &Target) -> Degrees {
    let cos_dec = (target.dec * DEG2RAD).cos();
    ((dec - target.dec).powi(2) + (ra - target.ra).powi(2) / cos_dec.powi(2)).sqrt()
}

#[cfg(test)]
use approx::assert_abs_diff_eq;

#[test]
fn test_normalize_degrees_range() {
    for &angle in &[-1e6, -720.5, -360.0, -0.25, -1e-15, 0.0, 12.5, 359.999, 360.0, 1080.75, 1e6] {
        let normalized = normalize_degrees(angle);
        assert!(
            (0.0..360.0).contains(&normalized),
            "{angle} normalized to {normalized}"
        );
    }
    assert_abs_diff_eq!(normalize_degrees(-90.0), 270.0);
    assert_abs_diff_eq!(normalize_degrees(-450.0), 270.0);
    assert_abs_diff_eq!(normalize_degrees(725.0), 5.0);
}

#[test]
fn test_normalize_degrees_periodic_and_idempotent() {
    for &angle in &[-123.4, 0.0, 17.0, 359.5] {
        let once = normalize_degrees(angle);
        assert_abs_diff_eq!(normalize_degrees(once), once);
        for k in -3..=3 {
            assert_abs_diff_eq!(
                normalize_degrees(angle + 360.0 * k as f64),
                once,
                epsilon = 1e-9
            );
        }
    }
}

#[test]
fn test_to_180_range() {
    assert_eq!(to_180_range(0.0), 0.0);
    assert_eq!(to_180_range(179.999), 179.999);
    assert_eq!(to_180_range(180.0), 180.0);
    assert_eq!(to_180_range(180.5), -179.5);
    assert_eq!(to_180_range(270.0), -90.0);
    for i in 0..720 {
        let signed = to_180_range(i as f64 * 0.5);
        assert!(-180.0 < signed && signed <= 180.0, "{signed}");
    }
}

#[test]
fn test_overhead_declination_equals_latitude() {
    let site = ObservationSite::kascade();
    let epoch = Epoch::new(19980702, 145647);
    for &azimuth in &[0.0, 7.4743, 90.0, 181.0, 300.0] {
        let position = horizontal_to_equatorial(&HorizontalDirection::new(0.0, azimuth), &epoch, &site);
        assert_abs_diff_eq!(position.dec, KASCADE_LATITUDE, epsilon = 1e-9);
    }
}

#[test]
fn test_overhead_right_ascension_follows_sidereal_time() {
    // Straight up the hour angle is zero, so RA = GST - longitude
    let site = ObservationSite::kascade();
    let epoch = Epoch::new(20000101, 0);
    let position = horizontal_to_equatorial(&HorizontalDirection::new(0.0, 0.0), &epoch, &site);
    let expected = normalize_degrees(epoch.greenwich_sidereal_angle() * RAD2DEG - KASCADE_LONGITUDE);
    assert_abs_diff_eq!(position.ra, expected, epsilon = 1e-9);
}

#[test]
fn test_kcdc_example_record() {
    // First event of the KCDC example export
    let site = ObservationSite::kascade();
    let epoch = Epoch::new(19980702, 145647);
    let position =
        horizontal_to_equatorial(&HorizontalDirection::new(44.2007, 7.4743), &epoch, &site);

    assert_abs_diff_eq!(epoch.julian_day(), 2450997.1227662, epsilon = 1e-6);
    assert_abs_diff_eq!(position.ra, 256.5490, epsilon = 1e-3);
    assert_abs_diff_eq!(position.signed_ra(), -103.4510, epsilon = 1e-3);
    assert_abs_diff_eq!(position.dec, 83.9679, epsilon = 1e-3);

    let galactic = equatorial_to_galactic(&position);
    assert_abs_diff_eq!(galactic.lon, 116.7085, epsilon = 1e-3);
    assert_abs_diff_eq!(galactic.lat, 29.6641, epsilon = 1e-3);
}

#[test]
fn test_galactic_pole_and_center() {
    let pole = equatorial_to_galactic(&EquatorialPosition::new(GAL_N_POLE_RA, GAL_N_POLE_DEC));
    assert_abs_diff_eq!(pole.lat, 90.0, epsilon = 1e-3);

    // Sgr A*
    let center = equatorial_to_galactic(&EquatorialPosition::new(266.405, -28.936));
    assert_abs_diff_eq!(center.lat, 0.0, epsilon = 1e-2);
    assert_abs_diff_eq!(center.signed_lon(), 0.0, epsilon = 1e-2);
}

#[test]
fn test_galactic_longitude_in_range() {
    for i in 0..36 {
        for &dec in &[-80.0, -30.0, 0.0, 45.0, 85.0] {
            let galactic = equatorial_to_galactic(&EquatorialPosition::new(i as f64 * 10.0, dec));
            assert!((0.0..360.0).contains(&galactic.lon));
            assert!((-90.0..=90.0).contains(&galactic.lat));
        }
    }
}

#[test]
fn test_hammer_aitoff() {
    let (x, y) = hammer_aitoff(0.0, 0.0);
    assert_abs_diff_eq!(x, 0.0);
    assert_abs_diff_eq!(y, 0.0);

    let (x, y) = hammer_aitoff(180.0, 0.0);
    assert_abs_diff_eq!(x, 180.0, epsilon = 1e-9);
    assert_abs_diff_eq!(y, 0.0);

    let (x, y) = hammer_aitoff(0.0, 90.0);
    assert_abs_diff_eq!(x, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(y, 90.0, epsilon = 1e-9);
}

#[test]
fn test_target_offset() {
    let target = Target::default();
    assert_abs_diff_eq!(target_offset(-52.0, 40.95, &target), 0.0);
    assert_abs_diff_eq!(target_offset(-52.0, 43.95, &target), 3.0, epsilon = 1e-12);

    let cos_dec = (40.95 * DEG2RAD).cos();
    assert_abs_diff_eq!(target_offset(-51.0, 40.95, &target), 1.0 / cos_dec, epsilon = 1e-12);
}
