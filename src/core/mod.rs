//! The storage engine.
//!
//! Leaves first: `path_guard`, `sanitize` and `pii` are pure checks; `lock`
//! coordinates writers across processes; `format` and `encoder` define the
//! on-disk line shape; `writer` and `reader` are the two I/O paths; `store`
//! ties one writer per record kind to the configured data directory.

pub mod config;
pub mod encoder;
pub mod error;
pub mod format;
pub mod lock;
pub mod output;
pub mod path_guard;
pub mod pii;
pub mod reader;
pub mod record;
pub mod sanitize;
pub mod schemas;
pub mod store;
pub mod time;
pub mod writer;
