pub mod cache;
pub mod config;
pub mod core;
pub mod cursor;
pub mod error;
pub mod index;
pub mod source;
pub mod stats;
pub mod storage;

pub use cache::{CachedResultSet, ResultSetCache, ResultSetProvider};
pub use config::CacheConfig;
pub use core::{Envelope, NullProgress, ProgressMonitor, RowIdentity, TableReference};
pub use cursor::RowCursor;
pub use error::{CacheError, Result};
pub use index::{IndexProvider, RTreeIndexProvider, SpatialIndex};
pub use source::{DataSource, MemoryDataSource, MemoryTable};
pub use stats::CacheStats;
