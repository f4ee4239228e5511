//! Type inference from a bounded sample of tabular data.
//!
//! Columns with a declared element kind keep it; untyped columns are
//! classified by scanning their non-null values. Text columns are sized from
//! the longest stringified value in the sample, never from the full dataset,
//! measured in the unit the target dialect declares lengths in.

use crate::core::schema::{ColumnType, SqlKind, TextLength, TextUnit};
use crate::core::value::{Chunk, Value, ValueKind};

/// Longest bounded text column; anything longer becomes unbounded text.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 4000;

/// Rows read from the start of a source for inference.
pub const DEFAULT_SAMPLE_ROWS: usize = 5000;

/// Infer a column type for every column of `sample`, in order.
pub fn infer_types(sample: &Chunk, max_text_length: usize, unit: TextUnit) -> Vec<ColumnType> {
    sample
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let kind = match column.kind {
                Some(ValueKind::Integer) => SqlKind::Integer,
                Some(ValueKind::Float) => SqlKind::Float,
                Some(ValueKind::Boolean) => SqlKind::Boolean,
                Some(ValueKind::DateTime) => SqlKind::DateTime,
                Some(ValueKind::Text) => text_kind(sample.column_values(idx), max_text_length, unit),
                None => scan_kind(sample.column_values(idx), max_text_length, unit),
            };
            ColumnType::new(column.name.clone(), kind)
        })
        .collect()
}

/// Classify an untyped column from its values.
fn scan_kind<'a, I>(values: I, max_text_length: usize, unit: TextUnit) -> SqlKind
where
    I: Iterator<Item = &'a Value> + Clone,
{
    let mut seen_int = false;
    let mut seen_float = false;
    let mut seen_bool = false;
    let mut seen_datetime = false;
    let mut seen_text = false;

    for value in values.clone() {
        match value {
            Value::Null => {}
            Value::Int(_) => seen_int = true,
            Value::Float(_) => seen_float = true,
            Value::Bool(_) => seen_bool = true,
            Value::DateTime(_) => seen_datetime = true,
            Value::Text(_) => seen_text = true,
        }
    }

    let numeric = seen_int || seen_float;
    let other = seen_bool || seen_datetime || seen_text;
    match (numeric, other) {
        (true, false) if seen_float => SqlKind::Float,
        (true, false) => SqlKind::Integer,
        (false, true) if seen_bool && !seen_datetime && !seen_text => SqlKind::Boolean,
        (false, true) if seen_datetime && !seen_bool && !seen_text => SqlKind::DateTime,
        _ => text_kind(values, max_text_length, unit),
    }
}

/// Text column sized from the longest value, counted in `unit`.
fn text_kind<'a>(
    values: impl Iterator<Item = &'a Value>,
    max_text_length: usize,
    unit: TextUnit,
) -> SqlKind {
    let observed = values
        .filter(|v| !v.is_null())
        .map(|v| unit.measure(&v.to_string()))
        .max()
        .unwrap_or(0);

    if observed > max_text_length {
        SqlKind::Text(TextLength::Unbounded)
    } else {
        SqlKind::text(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SourceColumn;
    use chrono::NaiveDate;

    fn single_column(values: Vec<Value>) -> Chunk {
        Chunk::new(
            vec![SourceColumn::untyped("c")],
            values.into_iter().map(|v| vec![v]).collect(),
        )
    }

    fn infer_one(values: Vec<Value>) -> SqlKind {
        infer_types(&single_column(values), DEFAULT_MAX_TEXT_LENGTH, TextUnit::Chars)[0].kind
    }

    #[test]
    fn test_all_integers() {
        assert_eq!(
            infer_one(vec![Value::Int(1), Value::Null, Value::Int(-7)]),
            SqlKind::Integer
        );
    }

    #[test]
    fn test_one_float_reclassifies_integers() {
        let mut values: Vec<Value> = (0..100).map(Value::Int).collect();
        assert_eq!(infer_one(values.clone()), SqlKind::Integer);
        values.insert(50, Value::Float(2.5));
        assert_eq!(infer_one(values), SqlKind::Float);
    }

    #[test]
    fn test_booleans_and_datetimes() {
        assert_eq!(
            infer_one(vec![Value::Bool(true), Value::Bool(false)]),
            SqlKind::Boolean
        );
        let dt = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(infer_one(vec![Value::DateTime(dt)]), SqlKind::DateTime);
    }

    #[test]
    fn test_mixed_values_become_text() {
        assert_eq!(
            infer_one(vec![Value::Int(12345), Value::from("ab")]),
            SqlKind::Text(TextLength::Bounded(5))
        );
        assert_eq!(
            infer_one(vec![Value::Bool(true), Value::Int(1)]),
            SqlKind::Text(TextLength::Bounded(4))
        );
    }

    #[test]
    fn test_text_length_counts_characters() {
        assert_eq!(
            infer_one(vec![Value::from("ação"), Value::from("a")]),
            SqlKind::Text(TextLength::Bounded(4))
        );
    }

    #[test]
    fn test_utf16_length_counts_surrogate_pairs() {
        let chunk = single_column(vec![Value::from("😀😀"), Value::from("abc")]);
        assert_eq!(
            infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Utf16)[0].kind,
            SqlKind::Text(TextLength::Bounded(4))
        );
        assert_eq!(
            infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Chars)[0].kind,
            SqlKind::Text(TextLength::Bounded(3))
        );
    }

    #[test]
    fn test_utf16_length_crosses_ceiling() {
        let near_limit = format!("{}😀", "x".repeat(DEFAULT_MAX_TEXT_LENGTH - 1));
        let chunk = single_column(vec![Value::Text(near_limit)]);
        assert_eq!(
            infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Chars)[0].kind,
            SqlKind::Text(TextLength::Bounded(4000))
        );
        assert_eq!(
            infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Utf16)[0].kind,
            SqlKind::Text(TextLength::Unbounded)
        );
    }

    #[test]
    fn test_long_text_becomes_unbounded() {
        let long = "x".repeat(5000);
        assert_eq!(
            infer_one(vec![Value::Text(long)]),
            SqlKind::Text(TextLength::Unbounded)
        );
        let exact = "x".repeat(DEFAULT_MAX_TEXT_LENGTH);
        assert_eq!(
            infer_one(vec![Value::Text(exact)]),
            SqlKind::Text(TextLength::Bounded(4000))
        );
    }

    #[test]
    fn test_custom_max_text_length() {
        let chunk = single_column(vec![Value::from("abcdef")]);
        assert_eq!(
            infer_types(&chunk, 5, TextUnit::Chars)[0].kind,
            SqlKind::Text(TextLength::Unbounded)
        );
    }

    #[test]
    fn test_empty_sample_yields_text_of_one() {
        let chunk = Chunk::new(
            vec![SourceColumn::untyped("a"), SourceColumn::untyped("b")],
            Vec::new(),
        );
        let types = infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Chars);
        assert_eq!(types.len(), 2);
        assert!(types
            .iter()
            .all(|t| t.kind == SqlKind::Text(TextLength::Bounded(1))));
        assert_eq!(infer_one(vec![Value::Null, Value::Null]), SqlKind::text(1));
    }

    #[test]
    fn test_declared_kind_wins() {
        let chunk = Chunk::new(
            vec![
                SourceColumn::new("qty", Some(ValueKind::Integer)),
                SourceColumn::new("note", Some(ValueKind::Text)),
            ],
            vec![vec![Value::Null, Value::from("hello")]],
        );
        let types = infer_types(&chunk, DEFAULT_MAX_TEXT_LENGTH, TextUnit::Chars);
        assert_eq!(types[0], ColumnType::new("qty", SqlKind::Integer));
        assert_eq!(types[1].kind, SqlKind::Text(TextLength::Bounded(5)));
    }
}
