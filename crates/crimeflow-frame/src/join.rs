use std::collections::HashSet;

use polars::prelude::*;

use crimeflow_types::Result;

use crate::dataset::{check_unique, Dataset};

const LEFT_ORDER: &str = "__left_row";
const RIGHT_ORDER: &str = "__right_row";

impl Dataset {
    /// Inner join on the column `on`, which must exist on both sides.
    ///
    /// Rows come out in left order; a left row matching several right rows produces one output row
    /// per match, in right order. Null keys never match. The output header is the left columns
    /// followed by the right columns other than `on`; a non-key name present on both sides is
    /// suffixed `_x` on the left and `_y` on the right.
    pub fn inner_join(&self, right: &Dataset, on: &str) -> Result<Dataset> {
        self.column_index(on)?;
        right.column_index(on)?;

        let left_columns = self.columns();
        let right_columns = right.columns();
        let right_names: HashSet<&str> = right_columns.iter().map(String::as_str).collect();
        let clashing: Vec<&str> = left_columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != on && right_names.contains(c))
            .collect();
        let suffixed = |c: &str, suffix: &str| {
            if clashing.contains(&c) {
                format!("{c}{suffix}")
            } else {
                c.to_string()
            }
        };

        let mut header: Vec<String> = left_columns.iter().map(|c| suffixed(c, "_x")).collect();
        header.extend(
            right_columns
                .iter()
                .filter(|c| c.as_str() != on)
                .map(|c| suffixed(c, "_y")),
        );
        check_unique(header.iter().map(String::as_str))?;

        let left_suffixed: Vec<String> = clashing.iter().map(|c| format!("{c}_x")).collect();
        let left = self
            .lazy()
            .rename(clashing.iter().copied(), left_suffixed.iter(), true)
            .with_column(col(on).cast(DataType::String))
            .with_row_index(LEFT_ORDER, None);
        let right_plan = right
            .lazy()
            .with_column(col(on).cast(DataType::String))
            .with_row_index(RIGHT_ORDER, None);

        let plan = left
            .join(
                right_plan,
                [col(on)],
                [col(on)],
                JoinArgs::new(JoinType::Inner).with_suffix(Some("_y".into())),
            )
            .sort_by_exprs(
                [col(LEFT_ORDER), col(RIGHT_ORDER)],
                SortMultipleOptions::default(),
            )
            .select(header.iter().map(|c| col(c.as_str())).collect::<Vec<_>>());
        let joined = Dataset::collect(plan)?;

        tracing::debug!(
            on,
            left = self.len(),
            right = right.len(),
            joined = joined.len(),
            "Inner join complete"
        );
        Ok(joined)
    }
}
