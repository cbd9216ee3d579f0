//! In-memory tabular datasets and the data-shaping operations the crimeflow transforms compose.
//!
//! A [`Dataset`] wraps a polars `DataFrame`; rows cross the crate boundary as [`Value`]s. Every
//! operation borrows its input and returns a new dataset, so a transform chain reads as a sequence
//! of `?`-propagated steps.

pub mod dataset;
pub mod dates;
pub mod flags;
pub mod io;
mod join;
mod ops;
pub mod value;

pub use dataset::Dataset;
pub use dates::parse_date;
pub use flags::{FlagMapping, UnmatchedPolicy};
pub use io::{read_csv, read_csv_file, read_csv_headerless, to_csv_bytes, write_csv_file, Encoding};
pub use value::Value;
