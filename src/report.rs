//! Text and JSON reports over a loaded table and its detection results.
//!
//! All writers are read-only over their inputs and write to any
//! `io::Write`, so the binary passes a locked stdout and tests pass a
//! `Vec<u8>`.

use std::io::{self, Write};

use serde_json::{json, Map, Value};

use crate::anomaly::{Detection, Label};
use crate::dataset::{format_value, Dataset, Feature, Record};
use crate::forest::ForestConfig;

const INDEX_WIDTH: usize = 6;
const COLUMN_WIDTH: usize = 9;

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

fn write_header(out: &mut impl Write, extra: &[&str]) -> io::Result<()> {
    write!(out, "  {:>INDEX_WIDTH$}", "index")?;
    for f in Feature::ALL {
        write!(out, " {:>COLUMN_WIDTH$}", f.name())?;
    }
    for e in extra {
        write!(out, " {e:>COLUMN_WIDTH$}")?;
    }
    writeln!(out)
}

fn write_record(out: &mut impl Write, index: usize, record: &Record) -> io::Result<()> {
    write!(out, "  {index:>INDEX_WIDTH$}")?;
    for &v in record.values() {
        write!(out, " {:>COLUMN_WIDTH$}", format_value(v))?;
    }
    Ok(())
}

/// Dump every row of the table.
pub fn print_table(out: &mut impl Write, dataset: &Dataset) -> io::Result<()> {
    match dataset.source() {
        Some(path) => writeln!(out, "=== Traffic table: {} ===", path.display())?,
        None => writeln!(out, "=== Traffic table ===")?,
    }
    write_header(out, &[])?;
    for (i, r) in dataset.iter().enumerate() {
        write_record(out, i, r)?;
        writeln!(out)?;
    }
    writeln!(out, "  [{} rows x {} columns]", dataset.len(), Feature::COUNT)
}

/// Per-column min / max / mean / stdev.
pub fn print_summary(out: &mut impl Write, dataset: &Dataset) -> io::Result<()> {
    writeln!(out, "\n--- Column Summary ---")?;
    if dataset.is_empty() {
        return writeln!(out, "  (no rows)");
    }
    writeln!(out, "  {:8} {:>12} {:>12} {:>12} {:>12}", "column", "min", "max", "mean", "stdev")?;
    for c in dataset.summary() {
        writeln!(
            out,
            "  {:8} {:>12} {:>12} {:>12.3} {:>12.3}",
            c.feature.name(),
            format_value(c.min),
            format_value(c.max),
            c.mean,
            c.stdev
        )?;
    }
    Ok(())
}

/// Rows labelled anomalous, followed by the count line.
pub fn print_anomalies(out: &mut impl Write, dataset: &Dataset, detection: &Detection) -> io::Result<()> {
    let indices = detection.anomaly_indices();
    writeln!(out, "\n--- Anomalous Rows ---")?;
    if !indices.is_empty() {
        write_header(out, &["anomaly", "score"])?;
        for &i in &indices {
            write_record(out, i, &dataset.records()[i])?;
            writeln!(
                out,
                " {:>COLUMN_WIDTH$} {:>COLUMN_WIDTH$.4}",
                Label::Anomalous.as_sign(),
                detection.scores[i]
            )?;
        }
    }
    writeln!(out, "anomalies: {}", indices.len())
}

/// Fit and score summary printed ahead of the anomalous rows.
pub fn print_detection_summary(
    out: &mut impl Write,
    detection: &Detection,
    config: &ForestConfig,
    offset: f64,
) -> io::Result<()> {
    let stats = detection.score_stats();
    writeln!(out, "\n=== Isolation Forest ===")?;
    writeln!(out, "  rows:            {:>10}", detection.len())?;
    writeln!(out, "  trees:           {:>10}", config.n_trees)?;
    writeln!(out, "  contamination:   {:>10}", config.contamination.to_string())?;
    writeln!(out, "  max features:    {:>10}", config.max_features)?;
    writeln!(out, "  seed:            {:>10}", config.seed)?;
    writeln!(out, "  offset:          {offset:>10.4}")?;
    writeln!(out, "  threshold:       {:>10.4}", detection.threshold)?;
    writeln!(out, "  score min/max:   {:>10.4} / {:.4}", stats.min, stats.max)?;
    writeln!(out, "  score mean:      {:>10.4}  (median {:.4}, stdev {:.4})", stats.mean, stats.median, stats.stdev)?;
    writeln!(
        out,
        "  anomalies:       {:>10}  ({:.2}%)",
        detection.anomaly_count(),
        detection.anomaly_rate() * 100.0
    )
}

/// The anomaly report as JSON.
pub fn anomalies_json(dataset: &Dataset, detection: &Detection, config: &ForestConfig, offset: f64) -> Value {
    let anomalies: Vec<Value> = detection
        .anomaly_indices()
        .into_iter()
        .map(|i| {
            let mut row = Map::new();
            row.insert("index".into(), json!(i));
            for f in Feature::ALL {
                row.insert(f.name().into(), json!(dataset.records()[i].get(f)));
            }
            row.insert("anomaly".into(), json!(detection.labels[i].as_sign()));
            row.insert("score".into(), json!(round6(detection.scores[i])));
            Value::Object(row)
        })
        .collect();
    json!({
        "source": dataset.source().map(|p| p.display().to_string()),
        "total_records": dataset.len(),
        "anomaly_count": anomalies.len(),
        "anomaly_rate": round6(detection.anomaly_rate()),
        "threshold": round6(detection.threshold),
        "offset": round6(offset),
        "model": {
            "n_trees": config.n_trees,
            "contamination": config.contamination.to_string(),
            "max_features": config.max_features,
            "max_samples": config.max_samples.to_string(),
            "seed": config.seed,
        },
        "anomalies": anomalies,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::parse_dataset;

    fn sample() -> (Dataset, Detection) {
        let ds = parse_dataset("1 0 0 1 5 80\n0 0 0 0 999 22\n2 1 0 0 7 81\n").unwrap();
        let det = Detection {
            labels: vec![Label::Normal, Label::Anomalous, Label::Normal],
            scores: vec![0.12, -0.03, 0.08],
            threshold: 0.0,
        };
        (ds, det)
    }

    fn render<F: FnOnce(&mut Vec<u8>) -> io::Result<()>>(f: F) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn table_lists_every_row() {
        let (ds, _) = sample();
        let text = render(|out| print_table(out, &ds));
        assert!(text.contains("ack"));
        assert!(text.contains("port"));
        assert!(text.contains("999"));
        assert!(text.contains("[3 rows x 6 columns]"));
        // title, header, three rows, footer
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn anomalies_only_flagged_rows() {
        let (ds, det) = sample();
        let text = render(|out| print_anomalies(out, &ds, &det));
        let rows: Vec<&str> = text.lines().filter(|l| l.contains("-0.0300")).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("999"));
        assert!(!text.contains(" 80 "));
        assert!(text.trim_end().ends_with("anomalies: 1"));
    }

    #[test]
    fn no_anomalies_prints_zero_count() {
        let (ds, mut det) = sample();
        det.labels = vec![Label::Normal; 3];
        let text = render(|out| print_anomalies(out, &ds, &det));
        assert!(!text.contains("index"));
        assert!(text.trim_end().ends_with("anomalies: 0"));
    }

    #[test]
    fn summary_has_all_columns() {
        let (ds, _) = sample();
        let text = render(|out| print_summary(out, &ds));
        for f in Feature::ALL {
            assert!(text.contains(f.name()), "missing {f}");
        }
        let empty = Dataset::default();
        assert!(render(|out| print_summary(out, &empty)).contains("(no rows)"));
    }

    #[test]
    fn detection_summary_lists_counts() {
        let (_, det) = sample();
        let text = render(|out| print_detection_summary(out, &det, &ForestConfig::default(), -0.42));
        assert!(text.contains("trees:"));
        assert!(text.contains("500"));
        assert!(text.contains("-0.4200"));
        assert!(text.contains("33.33%"));
    }

    #[test]
    fn json_report() {
        let (ds, det) = sample();
        let v = anomalies_json(&ds, &det, &ForestConfig::default(), -0.5);
        assert_eq!(v["total_records"], 3);
        assert_eq!(v["anomaly_count"], 1);
        assert_eq!(v["model"]["seed"], 123);
        assert_eq!(v["model"]["contamination"], "0.002");
        let a = &v["anomalies"][0];
        assert_eq!(a["index"], 1);
        assert_eq!(a["traffic"], 999.0);
        assert_eq!(a["anomaly"], -1);
        assert_eq!(a["score"], -0.03);
    }
}
