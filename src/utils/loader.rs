use std::io::BufRead;
use std::str::FromStr;

use thiserror::Error;

use crate::utils::coordinates::HorizontalDirection;
use crate::utils::time::Epoch;

/// Header names of the columns the pipeline needs in a KCDC export.
pub const ENERGY_COLUMN: &str = "E";
pub const ZENITH_COLUMN: &str = "ZE";
pub const AZIMUTH_COLUMN: &str = "AZ";
pub const DATE_COLUMN: &str = "YMD";
pub const TIME_COLUMN: &str = "HMS";
/// Optional nanosecond column; KCDC exports usually leave it out.
pub const NANOS_COLUMN: &str = "MMN";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("input is empty, expected a header line")]
    MissingHeader,
    #[error("header has no {0} column")]
    MissingColumn(&'static str),
    #[error("line {line}: no value in column {column}")]
    MissingField { line: usize, column: &'static str },
    #[error("line {line}: {value:?} is not a valid {column}")]
    InvalidField {
        line: usize,
        column: &'static str,
        value: String,
    },
}

/// The fields of one KCDC event the pipeline consumes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KcdcRecord {
    /// log10 of the reconstructed primary energy
    pub energy: f64,
    pub zenith: f64,
    /// Detector azimuth
    pub azimuth: f64,
    /// `YYYYMMDD`
    pub date: u64,
    /// `HHMMSS`
    pub time: u64,
    pub nanos: u64,
}

impl KcdcRecord {
    pub fn direction(&self) -> HorizontalDirection {
        HorizontalDirection::new(self.zenith, self.azimuth)
    }

    pub fn epoch(&self) -> Epoch {
        Epoch::with_nanos(self.date, self.time, self.nanos)
    }
}

/// Where each needed field sits in a whitespace separated line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    energy: usize,
    zenith: usize,
    azimuth: usize,
    date: usize,
    time: usize,
    nanos: Option<usize>,
}

impl ColumnLayout {
    /// Locates the required columns by name in a header line.
    pub fn from_header(header: &str) -> Result<Self, RecordError> {
        let names: Vec<&str> = header.split_whitespace().collect();
        let find = |column: &'static str| {
            names
                .iter()
                .position(|&name| name == column)
                .ok_or(RecordError::MissingColumn(column))
        };

        Ok(ColumnLayout {
            energy: find(ENERGY_COLUMN)?,
            zenith: find(ZENITH_COLUMN)?,
            azimuth: find(AZIMUTH_COLUMN)?,
            date: find(DATE_COLUMN)?,
            time: find(TIME_COLUMN)?,
            nanos: find(NANOS_COLUMN).ok(),
        })
    }

    /// Parses one data line. `line_number` is only used for error messages.
    pub fn parse(&self, line: &str, line_number: usize) -> Result<KcdcRecord, RecordError> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        Ok(KcdcRecord {
            energy: field(&fields, self.energy, ENERGY_COLUMN, line_number)?,
            zenith: field(&fields, self.zenith, ZENITH_COLUMN, line_number)?,
            azimuth: field(&fields, self.azimuth, AZIMUTH_COLUMN, line_number)?,
            date: field(&fields, self.date, DATE_COLUMN, line_number)?,
            time: field(&fields, self.time, TIME_COLUMN, line_number)?,
            nanos: match self.nanos {
                Some(index) => field(&fields, index, NANOS_COLUMN, line_number)?,
                None => 0,
            },
        })
    }
}

fn field<T: FromStr>(
    fields: &[&str],
    index: usize,
    column: &'static str,
    line: usize,
) -> Result<T, RecordError> {
    let value = fields
        .get(index)
        .ok_or(RecordError::MissingField { line, column })?;
    value.parse().map_err(|_| RecordError::InvalidField {
        line,
        column,
        value: value.to_string(),
    })
}

/// A data line kept together with what was parsed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// 1-based, counting the header
    pub number: usize,
    pub text: String,
    pub record: KcdcRecord,
}

/// Iterates over the data lines of a KCDC export, one result per non-blank line.
pub struct RecordReader<B: BufRead> {
    lines: std::io::Lines<B>,
    layout: ColumnLayout,
    header: String,
    line_number: usize,
}

impl<B: BufRead> RecordReader<B> {
    /// Reads the header line and prepares the column layout.
    pub fn new(reader: B) -> Result<Self, RecordError> {
        let mut lines = reader.lines();
        let header = lines.next().ok_or(RecordError::MissingHeader)??;
        let layout = ColumnLayout::from_header(&header)?;
        Ok(RecordReader {
            lines,
            layout,
            header,
            line_number: 1,
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }
}

impl<B: BufRead> Iterator for RecordReader<B> {
    type Item = Result<ParsedLine, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_number += 1;

            // Skip blank lines (e.g. a trailing newline)
            if text.trim().is_empty() {
                continue;
            }

            return Some(
                self.layout
                    .parse(&text, self.line_number)
                    .map(|record| ParsedLine {
                        number: self.line_number,
                        text,
                        record,
                    }),
            );
        }
    }
}

#[cfg(test)]
pub(crate) const EXAMPLE_EXPORT: &str = "\
         E          YC          XC          ZE          AZ          NE         NMU     ESUMHAD        NHAD           T           P          GT          MT         YMD         HMS           R          EV         AGE
   15.0428     43.7400     79.5148     44.2007      7.4743      3.9608      3.8254     -1.0000          -1     20.2800   1001.3107   899391407   756894400    19980702      145647        1000       10007      1.1117
   14.8000     10.0000    -20.0000     12.5000    200.0000      3.1000      2.9000     -1.0000          -1     20.2800   1001.3107   899391408   756894400    19980702      145648        1000       10008      1.3000
";

#[test]
fn test_layout_from_kcdc_header() {
    let header = EXAMPLE_EXPORT.lines().next().unwrap();
    let layout = ColumnLayout::from_header(header).unwrap();
    assert_eq!(
        layout,
        ColumnLayout {
            energy: 0,
            zenith: 3,
            azimuth: 4,
            date: 13,
            time: 14,
            nanos: None,
        }
    );
}

#[test]
fn test_missing_column() {
    let err = ColumnLayout::from_header("E ZE YMD HMS").unwrap_err();
    assert!(matches!(err, RecordError::MissingColumn("AZ")));
}

#[test]
fn test_reader_parses_example_export() {
    let reader = RecordReader::new(EXAMPLE_EXPORT.as_bytes()).unwrap();
    assert!(reader.header().trim_start().starts_with("E "));

    let lines: Vec<ParsedLine> = reader.collect::<Result<_, _>>().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].number, 2);
    assert_eq!(
        lines[0].record,
        KcdcRecord {
            energy: 15.0428,
            zenith: 44.2007,
            azimuth: 7.4743,
            date: 19980702,
            time: 145647,
            nanos: 0,
        }
    );
    assert_eq!(lines[1].record.epoch(), Epoch::new(19980702, 145648));
    assert_eq!(lines[1].record.direction(), HorizontalDirection::new(12.5, 200.0));
}

#[test]
fn test_optional_nanosecond_column() {
    let input = "E ZE AZ YMD HMS MMN\n15.5 10.0 20.0 20010203 040506 250000000\n";
    let record = RecordReader::new(input.as_bytes())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .record;
    assert_eq!(record.epoch(), Epoch::with_nanos(20010203, 40506, 250_000_000));
}

#[test]
fn test_malformed_lines_are_reported_per_record() {
    let input = "E ZE AZ YMD HMS\n15.5 10.0 20.0 20010203 040506\n15.5 ten 20.0 20010203 040506\n\n15.5 10.0\n16.0 10.0 20.0 20010203 040507\n";
    let results: Vec<_> = RecordReader::new(input.as_bytes()).unwrap().collect();
    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert!(matches!(
        &results[1],
        Err(RecordError::InvalidField { line: 3, column: "ZE", value }) if value == "ten"
    ));
    assert!(matches!(
        &results[2],
        Err(RecordError::MissingField { line: 5, column: "AZ" })
    ));
    assert_eq!(results[3].as_ref().unwrap().number, 6);
}

#[test]
fn test_empty_input() {
    assert!(matches!(
        RecordReader::new("".as_bytes()),
        Err(RecordError::MissingHeader)
    ));
}
