pub mod envelope;
pub mod progress;
pub mod row;
pub mod table_ref;

pub use envelope::Envelope;
pub use progress::{CancellableProgress, NullProgress, ProgressMonitor};
pub use row::{Row, RowIdentity, Value};
pub use table_ref::{IdentifierCase, TableReference, DEFAULT_SCHEMA};
