use crate::error::Result;
use crate::utils::parse_number;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::io::{Read, Write};
use std::path::Path;

/// A cell value. `None` is the explicit missing marker.
pub type Cell = Option<String>;

/// Row-oriented table with named columns.
///
/// Every tabular artifact of the pipeline (raw tree table, normalized table,
/// canonical table) is carried as a `Table`. Blank cells are read as missing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from string literals; empty strings become missing cells.
    pub fn from_rows(columns: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|v| cell_from_str(v)).collect());
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    /// Iterates one column's cells, or `None` if the column does not exist.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = Option<&str>> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| r[idx].as_deref()))
    }

    /// Numeric view of a column. Missing and unparsable cells are `None`.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|cells| cells.map(|c| c.and_then(parse_number)).collect())
    }

    /// Cells of a column that are present but not numeric.
    pub fn non_numeric_count(&self, name: &str) -> usize {
        self.column(name)
            .map(|cells| {
                cells
                    .filter(|c| matches!(c, Some(v) if parse_number(v).is_none()))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Applies `f` to every present cell of a column.
    pub fn map_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&str) -> Cell,
    {
        if let Some(idx) = self.column_index(name) {
            for row in &mut self.rows {
                if let Some(value) = row[idx].take() {
                    row[idx] = f(&value);
                }
            }
        }
    }

    /// Applies `f` to every present cell in the table.
    pub fn map_cells<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> Cell,
    {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if let Some(value) = cell.take() {
                    *cell = f(&value);
                }
            }
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let mut table = Self::new(headers.iter().map(|h| h.to_string()).collect());

        for record in reader.records() {
            let record: StringRecord = record?;
            table.push_row(record.iter().map(cell_from_str).collect());
        }

        Ok(table)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_path(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(file)
    }
}

fn cell_from_str(raw: &str) -> Cell {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
