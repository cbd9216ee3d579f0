//! Boolean flag normalization.
//!
//! Source systems spell their flags differently (`Y`, `t`, `FATAL`, ...). A [`FlagMapping`] turns
//! those tokens into `0`/`1` integers. Tokens are trimmed and uppercased before lookup.

use std::collections::HashMap;

use crimeflow_types::Result;

use crate::dataset::Dataset;
use crate::value::Value;

/// What happens to a token the mapping does not list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedPolicy {
    /// Unmatched tokens and nulls become the default value.
    Default(i64),
    /// Unmatched tokens become null; nulls stay null.
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagMapping {
    tokens: HashMap<String, i64>,
    unmatched: UnmatchedPolicy,
}

impl FlagMapping {
    /// A two-valued mapping: listed tokens map to their value, everything else (null included)
    /// maps to `default`.
    pub fn closed<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>, default: i64) -> Self {
        Self::build(pairs, UnmatchedPolicy::Default(default))
    }

    /// A mapping that only knows its listed tokens; anything else becomes null.
    pub fn partial<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self::build(pairs, UnmatchedPolicy::Null)
    }

    fn build<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>, unmatched: UnmatchedPolicy) -> Self {
        let tokens = pairs
            .into_iter()
            .map(|(token, value)| (token.trim().to_uppercase(), value))
            .collect();
        Self { tokens, unmatched }
    }

    pub fn unmatched(&self) -> UnmatchedPolicy {
        self.unmatched
    }

    pub fn apply(&self, value: &Value) -> Value {
        let mapped = value
            .as_str()
            .and_then(|s| self.tokens.get(&s.trim().to_uppercase()).copied());
        match (mapped, self.unmatched) {
            (Some(v), _) => Value::Int(v),
            (None, UnmatchedPolicy::Default(d)) => Value::Int(d),
            (None, UnmatchedPolicy::Null) => Value::Null,
        }
    }
}

impl Dataset {
    /// Replace every value of `column` with its mapped flag.
    pub fn normalize_flag(&self, column: &str, mapping: &FlagMapping) -> Result<Dataset> {
        let values = self.column(column)?;
        let mapped: Vec<Value> = values.iter().map(|v| mapping.apply(v)).collect();
        let unmatched = values
            .iter()
            .zip(&mapped)
            .filter(|(raw, flag)| flag.is_null() && !raw.is_null())
            .count();
        if unmatched > 0 {
            tracing::debug!(column, unmatched, "Flag tokens without a mapping set to null");
        }
        self.flag_column(column, &mapped)
    }
}
