//! Filesystem collaborator.
//!
//! The engine never touches the filesystem directly; it consumes the
//! [`FileSystem`] trait, which is implemented on disk ([`disk::DiskFs`])
//! and in memory ([`memory::MemoryFs`]). Both implementations share the
//! same directory layout:
//!
//! - `data_<index>_<unix_ts>.csk`: data file
//! - `data_<index>_<unix_ts>.a.csk`: hint sidecar for the matching data file
//! - `<name>.merge.tmp.csk` / `<name>.hint.tmp.csk`: merge temporaries,
//!   invisible to [`FileSystem::walk`]
//!
//! File names are exchanged with the engine without the `.csk` extension;
//! implementations append it internally.

pub mod disk;
pub mod memory;

use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

pub use disk::DiskFs;
pub use memory::MemoryFs;

/// Magic database path selecting the in-memory filesystem.
pub const IN_MEMORY_DB: &str = "in:mem:db";

/// Data file extension.
pub const DATA_FILE_EXT: &str = ".csk";

/// Name suffix marking a hint sidecar (`data_0_1.a` names the hint for
/// data file `data_0_1`).
pub const HINT_SUFFIX: &str = ".a";

/// Name fragment marking merge temporaries.
pub const TMP_MARKER: &str = ".tmp";

/// A single database file.
pub trait File: Read + Write + Send + Sync {
    /// File name without the data file extension. Used as the segment id
    /// in key directory locators.
    fn name(&self) -> &str;

    /// Current byte length of the file.
    fn size(&self) -> u64;
}

/// Filesystem operations the engine consumes.
pub trait FileSystem: Send + Sync {
    /// Open the active data file for the given db path, creating the
    /// directory and a fresh data file if none exist.
    fn open(&self, path: &Path) -> Result<Box<dyn File>>;

    /// Allocate and open a new data file whose name sorts after all prior
    /// ones.
    fn rotate(&self, path: &Path) -> Result<Box<dyn File>>;

    /// Visit every data and hint file in chronological order. Temporaries
    /// are skipped, and a data file is skipped when its hint sidecar
    /// exists.
    fn walk(&self, path: &Path, f: &mut dyn FnMut(&mut dyn File) -> Result<()>) -> Result<()>;

    /// Positional read from the named data file, filling `buf` entirely.
    fn read_at(&self, path: &Path, name: &str, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Open the named file, truncating it to zero length, creating it if
    /// it does not exist.
    fn open_truncate(&self, path: &Path, name: &str) -> Result<Box<dyn File>>;

    /// Atomically rename `src` to `dst` within the directory, replacing
    /// `dst` if it exists.
    fn rename(&self, path: &Path, src: &str, dst: &str) -> Result<()>;
}

/// Append the data file extension to a bare file name.
pub(crate) fn to_data_file(name: &str) -> String {
    format!("{name}{DATA_FILE_EXT}")
}

/// Whether the bare name refers to a hint sidecar.
pub(crate) fn is_hint_name(name: &str) -> bool {
    name.ends_with(HINT_SUFFIX)
}

/// Whether the bare name refers to a merge temporary.
pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.contains(TMP_MARKER)
}

/// The data file a hint sidecar belongs to.
pub(crate) fn hint_target(name: &str) -> &str {
    name.strip_suffix(HINT_SUFFIX).unwrap_or(name)
}

/// Chronological ordering key for a bare file name.
///
/// Data files are named `data_<index>_<unix_ts>`; the index alone orders
/// them, since lexical comparison would put `data_10` before `data_2`. A
/// hint shares its data file's position. Unparseable names sort first, in
/// name order.
pub(crate) fn segment_sort_key(name: &str) -> (u64, u64) {
    let stem = hint_target(name);

    let mut parts = stem.splitn(3, '_');
    let _prefix = parts.next();
    let index = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let ts = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    (index, ts)
}

/// Next data file index given the bare names already present.
pub(crate) fn next_index<'a>(names: impl Iterator<Item = &'a str>) -> u64 {
    names
        .map(|n| segment_sort_key(n).0 + 1)
        .max()
        .unwrap_or(0)
}
