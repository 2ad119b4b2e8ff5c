use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array2;
use ndarray_npy::{write_npy, WritableElement};

use crate::pipeline::{Annotation, SkyMaps};

pub const REAL_MAP_STEM: &str = "real";
pub const FAKE_MAP_STEM: &str = "fake";

/// Writes a matrix as whitespace separated text, one row per line.
pub fn write_matrix_text<T: Display>(path: impl AsRef<Path>, matrix: &Array2<T>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("couldn't create {}", path.display()))?;

    for row in matrix.outer_iter() {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a matrix in numpy `.npy` format.
pub fn write_matrix_npy<T: WritableElement>(path: impl AsRef<Path>, matrix: &Array2<T>) -> Result<()> {
    let path = path.as_ref();
    write_npy(path, matrix).with_context(|| format!("couldn't write {}", path.display()))?;
    Ok(())
}

/// Writes both sky maps into `directory` as `real.npy`, `fake.npy`, `real.txt` and `fake.txt`.
pub fn write_sky_maps(directory: impl AsRef<Path>, maps: &SkyMaps) -> Result<()> {
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)
        .with_context(|| format!("couldn't create output directory {}", directory.display()))?;

    let file = |stem: &str, extension: &str| directory.join(format!("{stem}.{extension}"));

    write_matrix_npy(file(REAL_MAP_STEM, "npy"), &maps.real)?;
    write_matrix_npy(file(FAKE_MAP_STEM, "npy"), &maps.fake)?;
    write_matrix_text(file(REAL_MAP_STEM, "txt"), &maps.real)?;
    write_matrix_text(file(FAKE_MAP_STEM, "txt"), &maps.fake)?;

    log::info!("sky maps written to {}", directory.display());
    Ok(())
}

/// Writes a KCDC export back out with the derived sky position columns appended.
pub struct AnnotationWriter<W: Write> {
    out: W,
}

impl AnnotationWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("couldn't create {}", path.display()))?;
        Ok(AnnotationWriter::new(BufWriter::new(file)))
    }
}

impl<W: Write> AnnotationWriter<W> {
    pub fn new(out: W) -> Self {
        AnnotationWriter { out }
    }

    /// Writes the input header followed by the names of the appended columns.
    pub fn write_header(&mut self, header: &str) -> Result<()> {
        writeln!(
            self.out,
            "{}{:>12}{:>12}{:>12}{:>12}{:>20}{:>12}",
            header.trim_end(),
            "RA",
            "DEC",
            "LON",
            "LAT",
            "JDAYS",
            "DIST"
        )?;
        Ok(())
    }

    pub fn write_row(&mut self, line: &str, annotation: &Annotation) -> Result<()> {
        writeln!(
            self.out,
            "{}{:>12.4}{:>12.4}{:>12.4}{:>12.4}{:>20.6}{:>12.4}",
            line.trim_end(),
            annotation.ra,
            annotation.dec,
            annotation.lon,
            annotation.lat,
            annotation.julian_day,
            annotation.distance
        )?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
use ndarray::array;

#[test]
fn test_write_matrix_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matrix.txt");
    write_matrix_text(&path, &array![[1u64, 0, 3], [0, 20, 0]]).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 0 3\n0 20 0\n");

    write_matrix_text(&path, &array![[0.5f64, 2.0]]).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "0.5 2\n");
}

#[test]
fn test_write_sky_maps() {
    use crate::config::Config;
    use crate::pipeline::Pipeline;
    use crate::utils::loader::KcdcRecord;
    use ndarray_npy::read_npy;

    let mut pipeline = Pipeline::new(Config {
        batch_capacity: 1,
        scramble_multiplier: 2,
        ..Config::default()
    })
    .unwrap();
    pipeline.feed(&KcdcRecord {
        energy: 15.0,
        zenith: 20.0,
        azimuth: 100.0,
        date: 20000101,
        time: 0,
        nanos: 0,
    });
    let maps = pipeline.finish();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("maps");
    write_sky_maps(&out, &maps).unwrap();

    let real: Array2<u64> = read_npy(out.join("real.npy")).unwrap();
    let fake: Array2<f64> = read_npy(out.join("fake.npy")).unwrap();
    assert_eq!(real, maps.real);
    assert_eq!(fake, maps.fake);
    assert_eq!(real.dim(), (360, 720));
    assert_eq!(fake.sum(), 1.0);

    let text = std::fs::read_to_string(out.join("real.txt")).unwrap();
    assert_eq!(text.lines().count(), 360);
    assert_eq!(text.lines().next().unwrap().split(' ').count(), 720);
}

#[test]
fn test_annotation_writer_layout() {
    let mut writer = AnnotationWriter::new(Vec::new());
    writer.write_header("   E   ZE").unwrap();
    writer
        .write_row(
            "  15.0  44.2",
            &Annotation {
                ra: -103.45102,
                dec: 83.96791,
                lon: 116.70852,
                lat: 29.66407,
                julian_day: 2450997.1227662,
                distance: 1.5,
            },
        )
        .unwrap();
    let output = String::from_utf8(writer.finish().unwrap()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines[0],
        "   E   ZE          RA         DEC         LON         LAT               JDAYS        DIST"
    );
    assert_eq!(
        lines[1],
        "  15.0  44.2   -103.4510     83.9679    116.7085     29.6641      2450997.122766      1.5000"
    );
}
