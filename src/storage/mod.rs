pub mod index_file;

pub use index_file::{IndexFile, INDEX_FILE_EXT};
