//! Flattened tabular view of a history: one line per (snapshot, row).

use chrono::SecondsFormat;
use serde::Serialize;
use std::io::{self, Write};

use super::History;

pub const CAPTURED_AT_COLUMN: &str = "capturedAt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Header comes from the selectors recorded in the history, not from the
/// live source. Missing fields render as empty cells.
pub fn flatten(history: &History) -> ExportTable {
    let columns = &history.selectors.column_selectors;

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(CAPTURED_AT_COLUMN.to_string());
    header.extend(columns.iter().cloned());

    let rows = history
        .snapshots
        .iter()
        .flat_map(|snapshot| {
            let stamp = snapshot
                .captured_at
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            snapshot.rows.iter().map(move |row| {
                let mut line = Vec::with_capacity(columns.len() + 1);
                line.push(stamp.clone());
                line.extend(
                    columns
                        .iter()
                        .map(|col| row.get(col).cloned().unwrap_or_default()),
                );
                line
            })
        })
        .collect();

    ExportTable { header, rows }
}

impl ExportTable {
    /// Header line followed by every row.
    pub fn lines(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.header.as_slice()).chain(self.rows.iter().map(Vec::as_slice))
    }

    pub fn write_csv<W: Write>(&self, w: W) -> csv::Result<()> {
        let mut writer = csv::Writer::from_writer(w);
        for line in self.lines() {
            writer.write_record(line)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv(&self) -> csv::Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Row, Snapshot};
    use crate::selector::SelectorSet;
    use crate::source::SourceId;
    use chrono::{TimeZone, Utc};

    fn history(columns: &[&str]) -> History {
        History::new(
            SourceId::from("s1"),
            SelectorSet::new("tr", columns.iter().map(|c| c.to_string()).collect()).unwrap(),
        )
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_history_is_header_only() {
        let table = flatten(&history(&["a", "b"]));
        assert_eq!(table.header, vec!["capturedAt", "a", "b"]);
        assert!(table.rows.is_empty());
        assert_eq!(table.to_csv().unwrap(), "capturedAt,a,b\n");
    }

    #[test]
    fn test_one_line_per_snapshot_row() {
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 2, 8, 30, 15).unwrap();

        let mut h = history(&["a"]);
        h.push(Snapshot::new(t1, vec![row(&[("a", "1")])]));
        h.push(Snapshot::new(t2, vec![row(&[("a", "2")]), row(&[("a", "3")])]));

        let table = flatten(&h);
        assert_eq!(table.header, vec!["capturedAt", "a"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["2024-03-01T12:00:00Z".to_string(), "1".to_string()],
                vec!["2024-03-02T08:30:15Z".to_string(), "2".to_string()],
                vec!["2024-03-02T08:30:15Z".to_string(), "3".to_string()],
            ]
        );
    }

    #[test]
    fn test_header_uses_recorded_selectors_and_blanks_missing_fields() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut h = history(&["name", "price"]);
        h.push(Snapshot::new(t, vec![row(&[("name", "Pear"), ("stock", "9")])]));

        let table = flatten(&h);
        assert_eq!(table.header, vec!["capturedAt", "name", "price"]);
        assert_eq!(table.rows[0], vec!["2024-01-01T00:00:00Z", "Pear", ""]);
    }

    #[test]
    fn test_csv_quotes_special_cells() {
        let table = ExportTable {
            header: vec!["capturedAt".into(), "a".into()],
            rows: vec![
                vec!["t".into(), "plain".into()],
                vec!["t".into(), "1,5".into()],
                vec!["t".into(), "say \"hi\"".into()],
                vec!["t".into(), "two\nlines".into()],
            ],
        };
        assert_eq!(
            table.to_csv().unwrap(),
            "capturedAt,a\nt,plain\nt,\"1,5\"\nt,\"say \"\"hi\"\"\"\nt,\"two\nlines\"\n"
        );
    }
}
