//! Column and row shaping operations.

use polars::prelude::*;

use crimeflow_types::{PipelineError, Result};

use crate::dataset::{check_unique, frame_error, Dataset};
use crate::value::Value;

fn select_all(columns: &[String]) -> Vec<Expr> {
    columns.iter().map(|c| col(c.as_str())).collect()
}

/// True where `column` is numerically equal to `sentinel`; false for nulls and non-numeric text.
fn is_sentinel(column: &str, sentinel: f64) -> Expr {
    col(column)
        .cast(DataType::Float64)
        .eq(lit(sentinel))
        .fill_null(lit(false))
}

fn literal(value: &Value) -> Option<Expr> {
    match value {
        Value::Null => None,
        Value::Int(i) => Some(lit(*i)),
        Value::Text(s) => Some(lit(s.clone())),
    }
}

impl Dataset {
    /// Keep exactly `columns`, in that order.
    pub fn project(&self, columns: &[&str]) -> Result<Dataset> {
        for c in columns {
            self.column_index(c)?;
        }
        check_unique(columns.iter().copied())?;
        let exprs: Vec<Expr> = columns.iter().map(|c| col(*c)).collect();
        Dataset::collect(self.lazy().select(exprs))
    }

    /// Rename columns by `(source, target)` pairs. Every source must exist, and a target may not
    /// land on a column that is kept under its current name.
    pub fn rename(&self, mapping: &[(&str, &str)]) -> Result<Dataset> {
        for (source, _) in mapping {
            self.column_index(source)?;
        }
        let renamed: Vec<String> = self
            .columns()
            .into_iter()
            .map(|c| {
                mapping
                    .iter()
                    .find(|(source, _)| *source == c)
                    .map_or(c, |(_, target)| target.to_string())
            })
            .collect();
        check_unique(renamed.iter().map(String::as_str))?;
        let plan = self.lazy().rename(
            mapping.iter().map(|(source, _)| *source),
            mapping.iter().map(|(_, target)| *target),
            true,
        );
        Dataset::collect(plan)
    }

    /// Drop rows where any of `columns` is null or numerically equal to `sentinel`.
    pub fn drop_null_or_sentinel(&self, columns: &[&str], sentinel: f64) -> Result<Dataset> {
        for c in columns {
            self.column_index(c)?;
        }
        let keep = columns
            .iter()
            .map(|c| col(*c).is_not_null().and(is_sentinel(c, sentinel).not()))
            .reduce(|left, right| left.and(right));
        match keep {
            Some(predicate) => Dataset::collect(self.lazy().filter(predicate)),
            None => Ok(self.clone()),
        }
    }

    /// Like [`Dataset::drop_null_or_sentinel`] but only checks the sentinel, and silently skips
    /// columns that are not present.
    pub fn drop_sentinel_where_present(&self, columns: &[&str], sentinel: f64) -> Result<Dataset> {
        let keep = columns
            .iter()
            .filter(|c| self.has_column(c))
            .map(|c| is_sentinel(c, sentinel).not())
            .reduce(|left, right| left.and(right));
        match keep {
            Some(predicate) => Dataset::collect(self.lazy().filter(predicate)),
            None => Ok(self.clone()),
        }
    }

    /// Drop rows whose `column` is null or whitespace only.
    pub fn drop_blank(&self, column: &str) -> Result<Dataset> {
        let mask: Vec<bool> = self.column(column)?.iter().map(|v| !v.is_blank()).collect();
        self.retain(mask.into_iter())
    }

    /// Keep the first row for each distinct combination of `columns`. Nulls compare equal to each
    /// other.
    pub fn dedup_on(&self, columns: &[&str]) -> Result<Dataset> {
        for c in columns {
            self.column_index(c)?;
        }
        let subset: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.frame()
            .unique_stable(Some(subset.as_slice()), UniqueKeepStrategy::First, None)
            .map(Dataset::from_frame)
            .map_err(frame_error)
    }

    /// Project to `columns` and keep the first row per value of the leading column.
    pub fn distinct_by_leading(&self, columns: &[&str]) -> Result<Dataset> {
        let lead = columns
            .first()
            .ok_or_else(|| PipelineError::Other("distinct projection needs a column".into()))?;
        self.project(columns)?.dedup_on(&[*lead])
    }

    /// Set `key_column` to the number of rows sharing this row's `group_column` value. Nulls form
    /// one group. An existing `key_column` is overwritten in place; otherwise it is appended.
    pub fn with_frequency_key(&self, group_column: &str, key_column: &str) -> Result<Dataset> {
        self.column_index(group_column)?;
        let frequency = len()
            .over([col(group_column)])
            .cast(DataType::Int64)
            .alias(key_column);
        Dataset::collect(self.lazy().with_column(frequency))
    }

    /// Keep rows whose `column` equals `value` by canonical text (`Int(1)` equals `"1"`).
    pub fn filter_eq(&self, column: &str, value: &Value) -> Result<Dataset> {
        self.column_index(column)?;
        let predicate = match value.as_str() {
            Some(wanted) => col(column)
                .cast(DataType::String)
                .eq(lit(wanted.into_owned()))
                .fill_null(lit(false)),
            None => lit(false),
        };
        Dataset::collect(self.lazy().filter(predicate))
    }

    /// Remove `columns`; every one must exist.
    pub fn drop_columns(&self, columns: &[&str]) -> Result<Dataset> {
        for c in columns {
            self.column_index(c)?;
        }
        let keep: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| !columns.contains(&c.as_str()))
            .collect();
        Dataset::collect(self.lazy().select(select_all(&keep)))
    }

    /// Replace nulls in each of `columns` with `fill`.
    pub fn fill_null(&self, columns: &[&str], fill: &Value) -> Result<Dataset> {
        for c in columns {
            self.column_index(c)?;
        }
        let Some(fill) = literal(fill) else {
            return Ok(self.clone());
        };
        let exprs: Vec<Expr> = columns
            .iter()
            .map(|c| col(*c).fill_null(fill.clone()).alias(*c))
            .collect();
        Dataset::collect(self.lazy().with_columns(exprs))
    }

    /// Append `column` holding `1..=len` in row order. The column must not exist yet.
    pub fn with_row_number(&self, column: &str) -> Result<Dataset> {
        if self.has_column(column) {
            return Err(PipelineError::ColumnConflict {
                column: column.to_string(),
            });
        }
        let mut exprs = select_all(&self.columns());
        exprs.push(col(column).cast(DataType::Int64));
        let plan = self.lazy().with_row_index(column, Some(1)).select(exprs);
        Dataset::collect(plan)
    }
}
