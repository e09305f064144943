// crates/store/src/lib.rs
//! Typed, indexed repository of `Change` records plus the query
//! subsystem that runs over it.
//!
//! The store is single-writer by construction: mutations take `&mut
//! self`, reads take `&self` and see a consistent snapshot for the
//! duration of the call. Secondary indices are ordered maps so scans are
//! deterministic.

mod index;
pub mod query;
mod stats;
mod store;

pub use index::Indices;
pub use query::{
    export, from_json, group_by, timeline, to_csv, to_json, to_markdown, CsvColumn, CsvOptions,
    ExportFormat, GroupByField, GroupStat, GroupedStats, QueryBuilder, QueryCache, SortDir,
    SortField, TextFields, TextQuery, TimeUnit, TimelineBucket, TimelinePoint,
};
pub use stats::StatsOverview;
pub use store::ChangeStore;
