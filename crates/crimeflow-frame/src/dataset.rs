use std::borrow::Cow;
use std::collections::HashSet;

use polars::prelude::*;

use crimeflow_types::{PipelineError, Result};

use crate::value::Value;

pub(crate) fn frame_error(err: PolarsError) -> PipelineError {
    PipelineError::Other(format!("dataframe operation failed: {err}"))
}

/// An ordered sequence of uniformly-shaped rows, backed by a polars [`DataFrame`].
///
/// Columns are either `String` (everything read from CSV) or `Int64` (flags and keys introduced
/// by transforms). Every operation in this crate takes `&self` and returns a new `Dataset`;
/// nothing is mutated in place.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
}

/// Reject a header that names a column twice.
pub(crate) fn check_unique<'a>(columns: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for c in columns {
        if !seen.insert(c) {
            return Err(PipelineError::ColumnConflict {
                column: c.to_string(),
            });
        }
    }
    Ok(())
}

/// Build one column from cell values. A column holding integers and nulls only is `Int64`;
/// anything else is stored as text.
pub(crate) fn build_column<'a, I>(name: &str, values: I) -> Column
where
    I: Iterator<Item = &'a Value> + Clone,
{
    let has_int = values.clone().any(|v| matches!(v, Value::Int(_)));
    let has_text = values.clone().any(|v| matches!(v, Value::Text(_)));
    if has_int && !has_text {
        let ints: Vec<Option<i64>> = values.map(Value::as_i64).collect();
        Series::new(name.into(), ints).into_column()
    } else {
        let texts: Vec<Option<String>> = values.map(|v| v.as_str().map(Cow::into_owned)).collect();
        Series::new(name.into(), texts).into_column()
    }
}

fn series_values(series: &Series) -> Result<Vec<Value>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()
            .map_err(frame_error)?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::text))
            .collect()),
        dtype if dtype.is_integer() => {
            let ints = series.cast(&DataType::Int64).map_err(frame_error)?;
            Ok(ints
                .i64()
                .map_err(frame_error)?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Int))
                .collect())
        }
        _ => {
            let texts = series.cast(&DataType::String).map_err(frame_error)?;
            series_values(&texts)
        }
    }
}

impl Dataset {
    /// An empty dataset with the given header.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::from_rows(columns, Vec::new())
    }

    /// Build a dataset from a header and rows, checking every row's width.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        check_unique(names.iter().map(String::as_str))?;
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != names.len()) {
            return Err(PipelineError::Other(format!(
                "row {i} has {} values but the dataset has {} columns",
                row.len(),
                names.len()
            )));
        }
        let columns = names
            .iter()
            .enumerate()
            .map(|(i, name)| build_column(name, rows.iter().map(move |r| &r[i])))
            .collect();
        let frame = DataFrame::new(columns).map_err(frame_error)?;
        Ok(Self { frame })
    }

    pub(crate) fn from_frame(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub(crate) fn lazy(&self) -> LazyFrame {
        self.frame.clone().lazy()
    }

    pub(crate) fn collect(plan: LazyFrame) -> Result<Dataset> {
        plan.collect().map(Self::from_frame).map_err(frame_error)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect()
    }

    /// Materialize every row, in order.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let columns: Vec<Vec<Value>> = self
            .frame
            .get_columns()
            .iter()
            .map(|c| series_values(c.as_materialized_series()).unwrap_or_default())
            .collect();
        (0..self.len())
            .map(|i| {
                columns
                    .iter()
                    .map(|c| c.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows()
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.frame.get_column_index(column).is_some()
    }

    /// Position of `column`, or `MissingColumn`.
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.frame
            .get_column_index(column)
            .ok_or_else(|| PipelineError::missing_column(column))
    }

    /// All values of one column, in row order.
    pub fn column(&self, column: &str) -> Result<Vec<Value>> {
        let c = self
            .frame
            .column(column)
            .map_err(|_| PipelineError::missing_column(column))?;
        series_values(c.as_materialized_series())
    }

    /// Same header, only the rows whose `column` value satisfies `keep`.
    pub fn filter_by<F>(&self, column: &str, mut keep: F) -> Result<Dataset>
    where
        F: FnMut(&Value) -> bool,
    {
        let values = self.column(column)?;
        let mask = values.iter().map(|v| keep(v));
        self.retain(mask)
    }

    /// Replace the values of an existing column, keeping its position.
    pub(crate) fn replace_column(&self, column: &str, values: &[Value]) -> Result<Dataset> {
        self.swap_column(build_column(column, values.iter()))
    }

    /// Like [`Dataset::replace_column`], but always stores `Int64`, even when every value is null.
    pub(crate) fn flag_column(&self, column: &str, values: &[Value]) -> Result<Dataset> {
        let flags: Vec<Option<i64>> = values.iter().map(Value::as_i64).collect();
        self.swap_column(Series::new(column.into(), flags).into_column())
    }

    fn swap_column(&self, column: Column) -> Result<Dataset> {
        self.column_index(column.name())?;
        let mut frame = self.frame.clone();
        frame.with_column(column).map_err(frame_error)?;
        Ok(Self::from_frame(frame))
    }

    pub(crate) fn retain(&self, mask: impl Iterator<Item = bool>) -> Result<Dataset> {
        let mask: BooleanChunked = mask.collect();
        self.frame
            .filter(&mask)
            .map(Self::from_frame)
            .map_err(frame_error)
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.columns() == other.columns() && self.rows() == other.rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_header_is_rejected() {
        let err = Dataset::new(["a", "b", "a"]).unwrap_err();
        assert!(matches!(err, PipelineError::ColumnConflict { column } if column == "a"));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::from_rows(["a", "b"], vec![vec![Value::Int(1)]]).unwrap_err();
        assert!(err.to_string().contains("1 values"));
    }

    #[test]
    fn integer_columns_stay_integral() {
        let ds = Dataset::from_rows(
            ["D", "SHOOTING"],
            vec![
                vec![Value::text("2020-01-01"), Value::Int(1)],
                vec![Value::Null, Value::Null],
            ],
        )
        .unwrap();
        assert_eq!(ds.frame().column("SHOOTING").unwrap().dtype(), &DataType::Int64);
        assert_eq!(ds.frame().column("D").unwrap().dtype(), &DataType::String);
        assert_eq!(
            ds.rows(),
            vec![
                vec![Value::text("2020-01-01"), Value::Int(1)],
                vec![Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn column_index_reports_missing_column() {
        let ds = Dataset::new(["a"]).unwrap();
        let err = ds.column_index("b").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column } if column == "b"));
        assert!(matches!(ds.column("b"), Err(PipelineError::MissingColumn { .. })));
    }

    #[test]
    fn filter_by_value() {
        let ds = Dataset::from_rows(
            ["time", "n"],
            vec![
                vec![Value::text("2020-01-01"), Value::Int(1)],
                vec![Value::text("2021-01-01"), Value::Int(2)],
            ],
        )
        .unwrap();
        let out = ds
            .filter_by("time", |v| v.as_str().is_some_and(|s| s.starts_with("2021")))
            .unwrap();
        assert_eq!(out.column("n").unwrap(), vec![Value::Int(2)]);
        assert_eq!(out.columns(), ds.columns());
    }
}
