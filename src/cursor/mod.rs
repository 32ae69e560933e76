pub mod events;
pub mod pk_index;
pub mod row_cursor;
pub mod window;

pub use events::{CursorEvent, CursorMove, ListenerId};
pub use pk_index::PrimaryKeyIndex;
pub use row_cursor::{CloseDelay, FetchDirection, Position, RowCursor, DEFAULT_FETCH_SIZE};
pub use window::FetchWindow;
