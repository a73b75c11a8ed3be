//! Traffic counter table loader.
//!
//! Each input line holds one minute of counters: six whitespace-separated
//! numbers in the column order of [`Feature::ALL`]. There is no header.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::anomaly::{mean, sample_stdev};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Named column of the traffic table. The discriminant is the column index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Ack = 0,
    Syn = 1,
    Arp = 2,
    Icmp = 3,
    Traffic = 4,
    Port = 5,
}

impl Feature {
    pub const COUNT: usize = 6;

    /// All columns in file order.
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Ack,
        Feature::Syn,
        Feature::Arp,
        Feature::Icmp,
        Feature::Traffic,
        Feature::Port,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Ack => "ack",
            Feature::Syn => "syn",
            Feature::Arp => "arp",
            Feature::Icmp => "icmp",
            Feature::Traffic => "traffic",
            Feature::Port => "port",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One minute of traffic counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    values: [f64; Feature::COUNT],
}

impl Record {
    pub fn new(values: [f64; Feature::COUNT]) -> Self {
        Self { values }
    }

    #[inline]
    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    #[inline]
    pub fn values(&self) -> &[f64; Feature::COUNT] {
        &self.values
    }

    /// Format the record back into the flat file layout.
    pub fn to_line(&self) -> String {
        self.values
            .iter()
            .map(|&v| format_value(v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AsRef<[f64]> for Record {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}

/// Per-column statistics over a loaded table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSummary {
    pub feature: Feature,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
}

/// The loaded table, immutable after loading.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    source: Option<PathBuf>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { source: None, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Path the table was read from, if it came from a file.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn column(&self, feature: Feature) -> Vec<f64> {
        self.records.iter().map(|r| r.get(feature)).collect()
    }

    pub fn summary(&self) -> Vec<ColumnSummary> {
        Feature::ALL
            .iter()
            .map(|&feature| {
                let col = self.column(feature);
                let m = mean(&col);
                ColumnSummary {
                    feature,
                    min: col.iter().copied().fold(f64::INFINITY, f64::min),
                    max: col.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    mean: m,
                    stdev: sample_stdev(&col, m),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read and parse the table at `path`.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::NotFound { path: path.to_path_buf() },
        _ => Error::Read { path: path.to_path_buf(), source: e },
    })?;
    let text = String::from_utf8(bytes).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        Error::Parse {
            line: valid.iter().filter(|&&b| b == b'\n').count() + 1,
            reason: "invalid UTF-8".into(),
        }
    })?;
    let mut dataset = parse_dataset(&text)?;
    dataset.source = Some(path.to_path_buf());
    log::debug!("loaded {} rows from {}", dataset.len(), path.display());
    Ok(dataset)
}

/// Parse table text. Blank lines are skipped; every other line must hold
/// exactly six numbers.
pub fn parse_dataset(text: &str) -> Result<Dataset> {
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_line(line, i + 1)?);
    }
    Ok(Dataset::from_records(records))
}

fn parse_line(line: &str, line_no: usize) -> Result<Record> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != Feature::COUNT {
        return Err(Error::Parse {
            line: line_no,
            reason: format!("expected {} fields, found {}", Feature::COUNT, tokens.len()),
        });
    }
    let mut values = [0.0; Feature::COUNT];
    for (slot, (&token, feature)) in values.iter_mut().zip(tokens.iter().zip(Feature::ALL)) {
        *slot = token.parse::<f64>().map_err(|_| Error::Parse {
            line: line_no,
            reason: format!("{feature}: {token:?} is not a number"),
        })?;
    }
    Ok(Record::new(values))
}

/// Integers print without a fractional part, as the counters are written.
pub fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn two_rows() {
        let ds = parse_dataset("1 0 0 1 5 80\n0 0 0 0 999 22\n").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records()[0].get(Feature::Port), 80.0);
        assert_eq!(ds.records()[1].get(Feature::Traffic), 999.0);
    }

    #[test]
    fn blank_lines_skipped() {
        let ds = parse_dataset("\n1 2 3 4 5 6\n   \n7 8 9 10 11 12").unwrap();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn extra_whitespace_tolerated() {
        let ds = parse_dataset("  1\t2  3 4 5   6  \r\n").unwrap();
        assert_eq!(ds.records()[0].values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn empty_text_is_empty_dataset() {
        assert!(parse_dataset("").unwrap().is_empty());
    }

    #[test]
    fn five_tokens_rejected() {
        match parse_dataset("1 2 3 4 5 6\n1 2 3 4 5\n") {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_rejected() {
        let err = parse_dataset("1 2 x 4 5 6\n").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
        assert!(err.to_string().contains("arp"));
    }

    #[test]
    fn column_order_matches_schema() {
        let ds = parse_dataset("10 20 30 40 50 60\n").unwrap();
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(ds.records()[0].get(*f), (i as f64 + 1.0) * 10.0);
            assert_eq!(f.index(), i);
        }
    }

    #[test]
    fn to_line_matches_input_format() {
        let ds = parse_dataset("3 1 0 2 15320 7\n").unwrap();
        assert_eq!(ds.records()[0].to_line(), "3 1 0 2 15320 7");
        let r = Record::new([0.5, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(r.to_line(), "0.5 0 0 0 0 1");
    }

    #[test]
    fn summary_per_column() {
        let ds = parse_dataset("1 0 0 0 10 1\n3 0 0 0 30 1\n").unwrap();
        let s = ds.summary();
        assert_eq!(s.len(), Feature::COUNT);
        assert_eq!(s[0].feature, Feature::Ack);
        assert_eq!(s[0].min, 1.0);
        assert_eq!(s[0].max, 3.0);
        assert_eq!(s[4].mean, 20.0);
        assert_eq!(s[5].stdev, 0.0);
    }

    #[test]
    fn load_counts_non_empty_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "1 0 0 1 5 80\n\n0 0 0 0 999 22\n2 2 0 0 40 3\n").unwrap();
        let ds = load_dataset(f.path()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.source(), Some(f.path()));
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        assert!(matches!(load_dataset(&path), Err(Error::NotFound { .. })));
    }

    #[test]
    fn load_directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Read { .. }), "{err:?}");
        assert_eq!(err.stage(), "load");
    }

    #[test]
    fn load_invalid_utf8_reports_line() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"1 0 0 1 5 80\n0 0 \xff 0 999 22\n").unwrap();
        match load_dataset(f.path()) {
            Err(e @ Error::Parse { line: 2, .. }) => assert_eq!(e.stage(), "load"),
            other => panic!("expected parse error on line 2, got {other:?}"),
        }
    }
}
