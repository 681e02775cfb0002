//! Writer builder and reader engine for strata artifacts.
//!
//! The writer side builds a packed hash-table file in one pass and publishes
//! it atomically. The reader side memory-maps a published artifact, serves
//! zero-copy typed lookups, and hot-swaps to newer artifacts while in-flight
//! lookups on the previous generation stay valid.
//!
//! # Architecture
//!
//! - **Build once**: [`Builder`] owns a growable region (keyspace + arena),
//!   inserts typed records, and seals the file under a temp name before an
//!   atomic rename.
//! - **Read many**: [`Generation`] wraps one mapped artifact; [`Reader`]
//!   holds the active generation in an atomic shared cell and swaps it on
//!   update. Lookups pin a snapshot for the duration of one call.
//! - **No runtime mutation**: everything inside the mapping is immutable
//!   after publication.

pub mod builder;
pub mod loader;
pub mod mapped;
pub mod options;
pub mod probe;
pub mod reader;
pub mod view;

pub use builder::Builder;
pub use loader::{
    latest_timestamp_path, read_latest_timestamp, timestamped_cache_path, untimestamped_cache_path,
};
pub use options::{ReaderOptions, UpdateCallback, WriterOptions};
pub use reader::{Generation, Reader};
pub use view::CacheView;
