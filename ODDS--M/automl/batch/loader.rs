use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use ndarray::Array2;

use crate::{
    dataset::{Dataset, GroundTruth},
    errors::{EngineError, EngineResult},
};

/// Column holding ground-truth labels.
pub const LABEL_COLUMN: &str = "label";

/// Non-feature columns dropped before search.
const DROPPED_COLUMNS: [&str; 4] = ["timestamp", "", "Unnamed: 0", "index"];

/// Data-access collaborator: lists dataset ids and fetches tables and labels.
pub trait DatasetSource {
    /// Dataset ids in processing order.
    fn list(&self) -> EngineResult<Vec<String>>;

    /// Feature table of `id`.
    fn fetch(&self, id: &str) -> EngineResult<Dataset>;

    /// Labels of `id`, when the source has them.
    fn labels(&self, id: &str) -> EngineResult<Option<GroundTruth>>;

    /// Features and labels together; sources that parse once should override this.
    fn load(&self, id: &str) -> EngineResult<(Dataset, Option<GroundTruth>)> {
        Ok((self.fetch(id)?, self.labels(id)?))
    }
}

/// A directory of CSV files, one dataset per file, id = file stem.
///
/// Files are processed in file-name order. The header row names the columns; `label`
/// becomes ground truth and timestamp/index columns are dropped.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    /// Source over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory scanned.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.csv"))
    }
}

impl DatasetSource for CsvDirectorySource {
    fn list(&self) -> EngineResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> EngineResult<Dataset> {
        Ok(read_csv(&self.path_of(id))?.0)
    }

    fn labels(&self, id: &str) -> EngineResult<Option<GroundTruth>> {
        Ok(read_csv(&self.path_of(id))?.1)
    }

    fn load(&self, id: &str) -> EngineResult<(Dataset, Option<GroundTruth>)> {
        read_csv(&self.path_of(id))
    }
}

/// Parses one labelled CSV file. Unreadable files count as load failures of that dataset.
pub fn read_csv(path: &Path) -> EngineResult<(Dataset, Option<GroundTruth>)> {
    let load_error = |reason: String| EngineError::DataLoad {
        path: path.to_path_buf(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
    parse_csv(&raw).map_err(load_error)
}

/// Splits one CSV record into trimmed cells. Quoted cells may hold commas and `""`
/// escapes.
pub fn split_record(line: &str) -> Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if cell.trim().is_empty() => {
                cell.clear();
                quoted = true;
            }
            ',' if !quoted => cells.push(finish_cell(&mut cell)),
            _ => cell.push(ch),
        }
    }
    if quoted {
        return Err(format!("unterminated quote in record '{line}'"));
    }
    cells.push(finish_cell(&mut cell));
    Ok(cells)
}

fn finish_cell(cell: &mut String) -> String {
    let done = cell.trim().to_string();
    cell.clear();
    done
}

fn parse_label(cell: &str) -> Option<u8> {
    match cell.parse::<f64>().ok()? {
        v if v == 0.0 => Some(0),
        v if v == 1.0 => Some(1),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Result<(Dataset, Option<GroundTruth>), String> {
    let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty());
    let header = split_record(lines.next().ok_or_else(|| "file is empty".to_string())?)?;
    let label_at = header.iter().position(|name| name == LABEL_COLUMN);
    let features: Vec<(usize, &str)> = header
        .iter()
        .enumerate()
        .filter(|(idx, name)| Some(*idx) != label_at && !DROPPED_COLUMNS.contains(&name.as_str()))
        .map(|(idx, name)| (idx, name.as_str()))
        .collect();
    if features.is_empty() {
        return Err("no feature columns after dropping label and index columns".into());
    }

    let mut values = Vec::new();
    let mut labels = Vec::new();
    let mut rows = 0;
    for (row_idx, line) in lines.enumerate() {
        let cells = split_record(line).map_err(|err| format!("row {}: {err}", row_idx + 1))?;
        if cells.len() != header.len() {
            return Err(format!(
                "row {} has {} columns but the header has {}",
                row_idx + 1,
                cells.len(),
                header.len()
            ));
        }
        for &(col, name) in &features {
            let value = cells[col].parse::<f64>().map_err(|_| {
                format!(
                    "row {} column `{name}` is not numeric: '{}'",
                    row_idx + 1,
                    cells[col]
                )
            })?;
            values.push(value);
        }
        if let Some(col) = label_at {
            let label = parse_label(&cells[col]).ok_or_else(|| {
                format!("row {} label '{}' is not 0 or 1", row_idx + 1, cells[col])
            })?;
            labels.push(label);
        }
        rows += 1;
    }

    let matrix = Array2::from_shape_vec((rows, features.len()), values).map_err(|err| err.to_string())?;
    let columns = features.iter().map(|(_, name)| (*name).to_string()).collect();
    let dataset = Dataset::new(matrix, columns).map_err(|err| err.to_string())?;
    let truth = match label_at {
        Some(_) => Some(GroundTruth::new(labels).map_err(|err| err.to_string())?),
        None => None,
    };
    Ok((dataset, truth))
}

/// In-memory source, mostly for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: IndexMap<String, (Dataset, Option<GroundTruth>)>,
}

impl MemorySource {
    /// Empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dataset; insertion order is processing order.
    #[must_use]
    pub fn with(mut self, id: &str, data: Dataset, labels: Option<GroundTruth>) -> Self {
        self.entries.insert(id.to_string(), (data, labels));
        self
    }

    fn entry(&self, id: &str) -> EngineResult<&(Dataset, Option<GroundTruth>)> {
        self.entries
            .get(id)
            .ok_or_else(|| EngineError::Configuration(format!("unknown dataset `{id}`")))
    }
}

impl DatasetSource for MemorySource {
    fn list(&self) -> EngineResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn fetch(&self, id: &str) -> EngineResult<Dataset> {
        Ok(self.entry(id)?.0.clone())
    }

    fn labels(&self, id: &str) -> EngineResult<Option<GroundTruth>> {
        Ok(self.entry(id)?.1.clone())
    }
}
