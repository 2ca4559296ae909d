//! Turning files into chunks: load, validate metadata, split.

pub mod loader;
pub mod sanitize;
pub mod splitter;

pub use loader::{DocumentFormat, LoadFailure, LoaderError};
pub use sanitize::{IngestMetadata, ValidationError};
pub use splitter::{SplitterError, TextSplitter};
