//! Product listing aggregator: scrape several shop search pages, normalize
//! the results into one schema, dedup them and keep snapshots in SQLite.

pub mod config;
pub mod db;
pub mod dedup;
pub mod pipeline;
pub mod price;
pub mod record;
pub mod runner;
pub mod sources;

pub use pipeline::{Aggregation, Aggregator, FetchRequest};
pub use record::{normalize, CanonicalRecord, RawItem, ResultSet};
