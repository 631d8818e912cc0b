//! Authlog Storage - durable log files.
//!
//! Finalized [`LogEntry`](authlog_core::LogEntry) records are appended to one
//! newline-delimited JSON file per UTC day and read back newest first.
//! [`LogTail`] follows the newest file as it grows.
//!
//! # Example
//!
//! ```no_run
//! use authlog_storage::LogStore;
//!
//! let store = LogStore::open("./logs");
//! for entry in store.recent(20).unwrap() {
//!     println!("{} {}", entry.method, entry.url);
//! }
//! ```

pub mod error;
mod store;
mod tail;

pub use error::{Result, StorageError};
pub use store::{partition_file_name, LogStore, FILE_PREFIX, FILE_SUFFIX};
pub use tail::LogTail;
