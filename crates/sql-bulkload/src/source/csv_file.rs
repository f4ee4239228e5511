//! CSV files as tabular sources.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};

use super::check_chunk_size;
use crate::core::traits::{ChunkIter, TabularSource};
use crate::core::value::{Chunk, SourceColumn, Value, ValueKind};
use crate::error::{LoadError, Result};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// How to read a CSV file.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field separator (default `,`).
    pub delimiter: u8,
    /// Decimal separator for floats (default `.`).
    pub decimal: char,
    /// Columns parsed as date/time values.
    pub parse_dates: Vec<String>,
    /// Explicit chrono format for `parse_dates` columns; common ISO forms are
    /// tried when unset.
    pub date_format: Option<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            decimal: '.',
            parse_dates: Vec::new(),
            date_format: None,
        }
    }
}

/// A CSV file with a header row.
///
/// Empty fields are NULL. Each chunk types its columns uniformly: integers if
/// every value is an integer, floats if every value is numeric, booleans if
/// every value is `true`/`false`, otherwise the raw text.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    options: CsvOptions,
    columns: Vec<SourceColumn>,
}

impl CsvSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, CsvOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: CsvOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let headers = reader(&path, &options)?.headers()?.clone();

        if let Some(missing) = options
            .parse_dates
            .iter()
            .find(|name| !headers.iter().any(|h| h == name.as_str()))
        {
            return Err(LoadError::Config(format!(
                "parse_dates column '{}' is not in {}",
                missing,
                path.display()
            )));
        }

        let columns = headers
            .iter()
            .map(|name| {
                let is_date = options.parse_dates.iter().any(|d| d == name);
                SourceColumn::new(name, is_date.then_some(ValueKind::DateTime))
            })
            .collect();

        Ok(Self {
            path,
            options,
            columns,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TabularSource for CsvSource {
    fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    fn read_prefix(&mut self, max_rows: usize) -> Result<Chunk> {
        if max_rows == 0 {
            return Ok(Chunk::new(self.columns.clone(), Vec::new()));
        }
        let first = self.chunks(max_rows)?.next().transpose()?;
        Ok(first.unwrap_or_else(|| Chunk::new(self.columns.clone(), Vec::new())))
    }

    fn chunks(&mut self, chunk_size: usize) -> Result<ChunkIter<'_>> {
        check_chunk_size(chunk_size)?;
        Ok(Box::new(CsvChunks {
            records: reader(&self.path, &self.options)?.into_records(),
            columns: &self.columns,
            options: &self.options,
            chunk_size,
            done: false,
        }))
    }
}

fn reader(path: &Path, options: &CsvOptions) -> Result<csv::Reader<File>> {
    Ok(ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .from_path(path)?)
}

struct CsvChunks<'a> {
    records: StringRecordsIntoIter<File>,
    columns: &'a [SourceColumn],
    options: &'a CsvOptions,
    chunk_size: usize,
    done: bool,
}

impl Iterator for CsvChunks<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.chunk_size.min(10_000));
        while batch.len() < self.chunk_size {
            match self.records.next() {
                Some(Ok(record)) => batch.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            return None;
        }
        Some(typed_chunk(self.columns, &batch, self.options))
    }
}

/// Type each column of a batch of records and assemble the chunk.
fn typed_chunk(columns: &[SourceColumn], records: &[StringRecord], options: &CsvOptions) -> Result<Chunk> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(columns.len()); records.len()];

    for (idx, column) in columns.iter().enumerate() {
        let raw: Vec<Option<&str>> = records
            .iter()
            .map(|r| r.get(idx).filter(|s| !s.is_empty()))
            .collect();

        let values = if column.kind == Some(ValueKind::DateTime) {
            raw.iter()
                .map(|cell| match cell {
                    Some(text) => parse_datetime(text, options.date_format.as_deref())
                        .map(Value::DateTime)
                        .ok_or_else(|| {
                            LoadError::Source(format!(
                                "column '{}': cannot parse '{}' as a date",
                                column.name, text
                            ))
                        }),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            uniform_values(&raw, options.decimal)
        };

        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    Ok(Chunk::new(columns.to_vec(), rows))
}

/// Values of one column, typed the same way for every non-null cell.
fn uniform_values(raw: &[Option<&str>], decimal: char) -> Vec<Value> {
    let cells = || raw.iter().flatten();

    if cells().all(|s| s.trim().parse::<i64>().is_ok()) {
        return convert(raw, |s| s.trim().parse().ok().map(Value::Int));
    }
    if cells().all(|s| parse_float(s, decimal).is_some()) {
        return convert(raw, |s| parse_float(s, decimal).map(Value::Float));
    }
    if cells().all(|s| parse_bool(s).is_some()) {
        return convert(raw, |s| parse_bool(s).map(Value::Bool));
    }
    convert(raw, |s| Some(Value::from(s)))
}

fn convert(raw: &[Option<&str>], f: impl Fn(&str) -> Option<Value>) -> Vec<Value> {
    raw.iter()
        .map(|cell| cell.and_then(&f).unwrap_or(Value::Null))
        .collect()
}

fn parse_float(text: &str, decimal: char) -> Option<f64> {
    let text = text.trim();
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if decimal == '.' {
        text.parse().ok()
    } else {
        text.replace(decimal, ".").parse().ok()
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_datetime(text: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Some(format) = format {
        return NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        });
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Typing
    // =========================================================================

    #[test]
    fn test_columns_are_typed_uniformly() {
        let file = csv_file("id,price,flag,name\n1,2.5,true,a\n2,3,false,\n");
        let mut source = CsvSource::open(file.path()).unwrap();
        let chunk = source.read_all().unwrap();

        assert_eq!(chunk.column_names(), vec!["id", "price", "flag", "name"]);
        assert_eq!(
            chunk.rows[0],
            vec![Value::Int(1), Value::Float(2.5), Value::Bool(true), Value::from("a")]
        );
        assert_eq!(
            chunk.rows[1],
            vec![Value::Int(2), Value::Float(3.0), Value::Bool(false), Value::Null]
        );
    }

    #[test]
    fn test_mixed_column_stays_text() {
        let file = csv_file("code\n10\nA7\n");
        let chunk = CsvSource::open(file.path()).unwrap().read_all().unwrap();
        assert_eq!(chunk.rows[0][0], Value::from("10"));
        assert_eq!(chunk.rows[1][0], Value::from("A7"));
    }

    #[test]
    fn test_semicolon_delimiter_and_decimal_comma() {
        let file = csv_file("amount;label\n1,5;x\n2,25;y\n");
        let options = CsvOptions {
            delimiter: b';',
            decimal: ',',
            ..Default::default()
        };
        let chunk = CsvSource::with_options(file.path(), options)
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(chunk.rows[0][0], Value::Float(1.5));
        assert_eq!(chunk.rows[1][0], Value::Float(2.25));
    }

    #[test]
    fn test_parse_dates() {
        let file = csv_file("hired,name\n2024-01-15,ann\n2023-06-01 08:30:00,bob\n");
        let options = CsvOptions {
            parse_dates: vec!["hired".into()],
            ..Default::default()
        };
        let mut source = CsvSource::with_options(file.path(), options).unwrap();
        assert_eq!(source.columns()[0].kind, Some(ValueKind::DateTime));

        let chunk = source.read_all().unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(chunk.rows[0][0], Value::DateTime(expected));
        assert!(matches!(chunk.rows[1][0], Value::DateTime(_)));
    }

    #[test]
    fn test_unparseable_date_is_source_error() {
        let file = csv_file("hired\nyesterday\n");
        let options = CsvOptions {
            parse_dates: vec!["hired".into()],
            ..Default::default()
        };
        let err = CsvSource::with_options(file.path(), options)
            .unwrap()
            .read_all()
            .unwrap_err();
        assert!(matches!(err, LoadError::Source(_)));
    }

    #[test]
    fn test_unknown_parse_dates_column() {
        let file = csv_file("a\n1\n");
        let options = CsvOptions {
            parse_dates: vec!["b".into()],
            ..Default::default()
        };
        assert!(CsvSource::with_options(file.path(), options).is_err());
    }

    // =========================================================================
    // Reading
    // =========================================================================

    #[test]
    fn test_prefix_then_chunks_restart_from_top() {
        let file = csv_file("n\n1\n2\n3\n4\n5\n");
        let mut source = CsvSource::open(file.path()).unwrap();
        assert_eq!(source.read_prefix(2).unwrap().len(), 2);

        let chunks: Vec<Chunk> = source.chunks(2).unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].rows[0][0], Value::Int(1));
        assert_eq!(chunks[2].rows[0][0], Value::Int(5));
    }

    #[test]
    fn test_header_only_file() {
        let file = csv_file("a,b\n");
        let mut source = CsvSource::open(file.path()).unwrap();
        assert!(source.read_prefix(10).unwrap().is_empty());
        assert_eq!(source.chunks(10).unwrap().count(), 0);
    }

    #[test]
    fn test_ragged_record_is_csv_error() {
        let file = csv_file("a,b\n1,2\n3\n");
        let err = CsvSource::open(file.path()).unwrap().read_all().unwrap_err();
        assert!(matches!(err, LoadError::Csv(_)));
    }

    #[test]
    fn test_missing_file_is_csv_error() {
        assert!(matches!(
            CsvSource::open("/nonexistent/data.csv"),
            Err(LoadError::Csv(_))
        ));
    }
}
