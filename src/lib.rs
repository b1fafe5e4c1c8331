//! CaskDB: an embeddable log-structured key/value store based on the
//! Bitcask model.
//!
//! Keys and values are opaque byte sequences. All writes append to a
//! rotating set of data files; an in-memory key directory maps every live
//! key to the exact offset of its latest value, so a lookup costs one
//! positional read. Compaction is caller-paced through [`Cask::merge`],
//! which also emits hint files that speed up the next startup.

pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod keydir;
pub mod record;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use fs::IN_MEMORY_DB;
pub use store::Cask;
