//! Tabular sources.
//!
//! - [`MemoryTable`]: rows already in memory
//! - [`CsvSource`]: a delimited text file, re-read from the top on every pass

mod csv_file;

pub use csv_file::{CsvOptions, CsvSource};

use crate::core::traits::{ChunkIter, TabularSource};
use crate::core::value::{Chunk, SourceColumn, Value};
use crate::error::{LoadError, Result};

/// In-memory table with optional declared column kinds.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<SourceColumn>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    /// Every row must have exactly one value per column, and rows need at
    /// least one column to live in.
    pub fn new(columns: Vec<SourceColumn>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if columns.is_empty() && !rows.is_empty() {
            return Err(LoadError::Source(format!(
                "{} rows given for a table without columns",
                rows.len()
            )));
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(LoadError::Source(format!(
                "row {} has {} values but the table has {} columns",
                idx,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Table whose column kinds are inferred from the values.
    pub fn untyped<S: Into<String>>(names: Vec<S>, rows: Vec<Vec<Value>>) -> Result<Self> {
        Self::new(names.into_iter().map(SourceColumn::untyped).collect(), rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TabularSource for MemoryTable {
    fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    fn read_prefix(&mut self, max_rows: usize) -> Result<Chunk> {
        Ok(Chunk::new(
            self.columns.clone(),
            self.rows.iter().take(max_rows).cloned().collect(),
        ))
    }

    fn chunks(&mut self, chunk_size: usize) -> Result<ChunkIter<'_>> {
        check_chunk_size(chunk_size)?;
        let columns = self.columns.clone();
        Ok(Box::new(
            self.rows
                .chunks(chunk_size)
                .map(move |rows| Ok(Chunk::new(columns.clone(), rows.to_vec()))),
        ))
    }
}

pub(crate) fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(LoadError::Config("chunk size must be at least 1".into()));
    }
    Ok(())
}
