use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub const TREE_COLUMNS: &[&str] = &[
    "length",
    "radius",
    "centroidX",
    "centroidY",
    "centroidZ",
    "directionX",
    "directionY",
    "directionZ",
];
pub const AREA_COLUMNS: &[&str] = &["area", "mean", "centroidX", "centroidY", "centroidZ"];
pub const VOLUME_COLUMNS: &[&str] = &["volume", "mean", "centroidX", "centroidY", "centroidZ"];

/// Geometry path a measurement table maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Tree,
    AreaMeasurements,
    VolumeMeasurements,
    Unknown,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Tree => "tree",
            TableKind::AreaMeasurements => "areaMeasurements",
            TableKind::VolumeMeasurements => "volumeMeasurements",
            TableKind::Unknown => "unknown",
        }
    }
}

/// Classifies by required-column subsets, checked in the fixed order tree,
/// area, volume. The first match wins.
pub fn classify_columns(columns: &BTreeSet<String>) -> TableKind {
    let has_all = |required: &[&str]| required.iter().all(|name| columns.contains(*name));
    if has_all(TREE_COLUMNS) {
        TableKind::Tree
    } else if has_all(AREA_COLUMNS) {
        TableKind::AreaMeasurements
    } else if has_all(VOLUME_COLUMNS) {
        TableKind::VolumeMeasurements
    } else {
        TableKind::Unknown
    }
}

/// Header row plus string cells, as read from a delimited text file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MeasurementTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read measurement table {}", path.display()))?;
        Self::from_csv(&text)
            .with_context(|| format!("Could not parse measurement table {}", path.display()))
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());
        let Some(header) = lines.next() else {
            bail!("table has no header row");
        };
        let columns = split_csv_line(header.trim_start_matches('\u{feff}'))?;
        let rows = lines.map(split_csv_line).collect::<Result<Vec<_>>>()?;
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_set(&self) -> BTreeSet<String> {
        self.columns.iter().cloned().collect()
    }

    pub fn kind(&self) -> TableKind {
        classify_columns(&self.column_set())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn text(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    /// Finite numeric value of a cell; `NaN` and infinities count as missing.
    pub fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.text(row, column)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }
}

/// Splits one comma separated line, honouring double-quoted cells with
/// `""` escapes. Cells are trimmed.
fn split_csv_line(line: &str) -> Result<Vec<String>> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                other => cell.push(other),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            other => cell.push(other),
        }
    }

    if in_quotes {
        bail!("unterminated quoted cell in line: {line}");
    }
    cells.push(cell.trim().to_string());
    Ok(cells)
}
