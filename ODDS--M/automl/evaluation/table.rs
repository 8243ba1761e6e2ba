use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;

const HEADER: &str = ",data,Prec,Recall,F1,ROC,time,model";

/// One evaluated dataset in the batch summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRow {
    /// Dataset identifier.
    pub dataset: String,
    /// Precision.
    pub precision: f64,
    /// Recall.
    pub recall: f64,
    /// F1.
    pub f1: f64,
    /// Polarity-corrected ROC-AUC.
    pub roc_auc: f64,
    /// Seconds spent on retrain plus predict.
    pub elapsed_secs: f64,
    /// Model descriptor.
    pub model: String,
}

/// Cross-dataset summary. Rows only ever get appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    rows: Vec<ResultsRow>,
}

impl ResultsTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push(&mut self, row: ResultsRow) {
        self.rows.push(row);
    }

    /// Rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[ResultsRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True before any dataset was evaluated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for `dataset`, if evaluated.
    #[must_use]
    pub fn find(&self, dataset: &str) -> Option<&ResultsRow> {
        self.rows.iter().find(|row| row.dataset == dataset)
    }

    /// CSV text with a leading row index column.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (idx, row) in self.rows.iter().enumerate() {
            let fields = [
                idx.to_string(),
                quote(&row.dataset),
                row.precision.to_string(),
                row.recall.to_string(),
                row.f1.to_string(),
                row.roc_auc.to_string(),
                row.elapsed_secs.to_string(),
                quote(&row.model),
            ];
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    /// Writes the CSV, creating parent directories.
    pub fn write_csv(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_csv())?;
        Ok(())
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(dataset: &str) -> ResultsRow {
        ResultsRow {
            dataset: dataset.into(),
            precision: 0.5,
            recall: 1.0,
            f1: 0.75,
            roc_auc: 0.9,
            elapsed_secs: 0.25,
            model: "LOF(contamination=0.05, n_neighbors=10, metric='euclidean')".into(),
        }
    }

    #[test]
    fn csv_quotes_descriptors_with_commas() {
        let mut table = ResultsTable::new();
        table.push(row("a.csv"));
        let csv = table.to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(HEADER));
        assert_eq!(
            lines.next(),
            Some("0,a.csv,0.5,1,0.75,0.9,0.25,\"LOF(contamination=0.05, n_neighbors=10, metric='euclidean')\"")
        );
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("a,\"b\""), "\"a,\"\"b\"\"\"");
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/summary.csv");
        let mut table = ResultsTable::new();
        table.push(row("a"));
        table.push(row("b"));
        table.write_csv(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(table.find("b").map(|r| r.f1), Some(0.75));
    }
}
