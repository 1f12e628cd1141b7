//! An in-memory ranking index.
//!
//! A [`RankTable`] keeps entities ordered by score (highest first, ties going
//! to whoever reached the score earlier, then to the lower id) and answers
//! "what rank is this id" and "who holds rank k" in expected logarithmic
//! time. A [`Registry`] holds one table per category, and [`snapshot`]
//! persists tables and registries.
//!
//! ```
//! use rankdb::RankTable;
//!
//! let table = RankTable::new();
//! table.upsert(7, 1200, 1);
//! table.upsert(9, 1500, 2);
//! table.increment(7, 400, 3);
//!
//! assert_eq!(table.query_by_id(7).map(|e| e.rank), Some(1));
//! assert_eq!(table.query_by_rank(2).map(|e| e.id), Some(9));
//! ```

pub mod config;
pub mod encoding;
mod entry;
mod fs;
pub mod registry;
pub mod skiplist;
pub mod snapshot;
pub mod table;

pub use config::Config;
pub use entry::{Category, CategoryRecord, Entry, EntryId, OrderKey, Rank, Score, Timestamp};
pub use registry::{Registry, Replacement};
pub use snapshot::SnapshotError;
pub use table::RankTable;
