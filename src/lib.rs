//! Query-shape plan caching and hierarchical row demultiplexing.
//!
//! [`query`] normalizes request ASTs into literal-free shapes and caches the
//! plans compiled for them; [`demux`] turns the flat rows those plans return
//! back into nested entries or a nested event stream.

#![warn(missing_docs)]

pub mod config;
pub mod demux;
pub mod query;
pub mod types;

pub use config::EngineOptions;
pub use types::{MuxError, Result};
