pub mod provider;
pub mod spatial;

pub use provider::{IndexBuildRequest, IndexProvider, RTreeIndexProvider};
pub use spatial::{IndexRecord, SpatialIndex};
