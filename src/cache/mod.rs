pub mod lock;
pub mod planner;
pub mod result_cache;
pub mod result_set;

pub use lock::{LockCoordinator, OwnedGuard};
pub use planner::{AccessPath, QueryPlan, QueryPlanner, DEFAULT_INDEX_THRESHOLD};
pub use result_cache::{CacheEntry, ResultSetCache};
pub use result_set::{CachedResultSet, ResultSetProvider};
