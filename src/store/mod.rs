//! The storage engine.
//!
//! [`Cask`] ties the collaborators together: an append-only active data
//! file obtained from the filesystem, the in-memory key directory, and the
//! record codec. One reader-writer lock guards the key directory and the
//! identity of the active file; reads take the shared side, while Put,
//! Delete, rotation and the commit step of merge take the exclusive side.

mod merge;
mod recovery;

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::{DiskFs, File, FileSystem, MemoryFs, IN_MEMORY_DB};
use crate::keydir::KeyDir;
use crate::record::{self, Header};

/// A bitcask database: a log-structured hash table for fast key/value
/// data, based on <https://riak.com/assets/bitcask-intro.pdf>.
pub struct Cask {
    path: PathBuf,
    cfg: Config,
    clock: Box<dyn Clock>,
    fs: Box<dyn FileSystem>,
    inner: RwLock<Inner>,
    /// Serializes merge invocations; the data path never touches it.
    merge_lock: Mutex<()>,
}

struct Inner {
    active: Box<dyn File>,
    keydir: KeyDir,
}

impl Cask {
    /// Open the database under `name` with the default configuration.
    ///
    /// The magic path [`IN_MEMORY_DB`] selects a fresh in-memory
    /// filesystem instead of disk.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with_config(name, Config::default())
    }

    /// Open the database under `name` with a custom configuration.
    pub fn open_with_config(name: &str, cfg: Config) -> Result<Self> {
        let fs: Box<dyn FileSystem> = if name == IN_MEMORY_DB {
            Box::new(MemoryFs::new())
        } else {
            Box::new(DiskFs::new(Box::new(SystemClock)))
        };

        Self::with_fs(name, fs, Box::new(SystemClock), cfg)
    }

    /// Open the database with explicit collaborators. This is how tests
    /// inject an in-memory filesystem they keep a handle on, or a fixed
    /// clock.
    pub fn with_fs(
        name: &str,
        fs: Box<dyn FileSystem>,
        clock: Box<dyn Clock>,
        cfg: Config,
    ) -> Result<Self> {
        let path = cfg.data_dir.join(name);

        let active = fs.open(&path)?;

        let mut keydir = KeyDir::new();
        recovery::rebuild(fs.as_ref(), &path, active.name(), &mut keydir)?;

        tracing::debug!(path = %path.display(), keys = keydir.len(), "database opened");

        Ok(Cask {
            path,
            cfg,
            clock,
            fs,
            inner: RwLock::new(Inner { active, keydir }),
            merge_lock: Mutex::new(()),
        })
    }

    /// Store the value under the given key.
    ///
    /// A zero-length value is legal; it is encoded with a nonzero key size
    /// and therefore distinguishable from a tombstone.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let mut guard = self.inner.write()?;
        let inner = &mut *guard;

        let h = Header::for_put(self.clock.now_unix(), key, value);

        self.rotate_if_needed(inner, u64::from(h.entry_size()))?;

        let entry = record::encode_record(&h, key, value);
        Self::append_record(inner.active.as_mut(), &mut inner.keydir, &entry)?;

        inner.keydir.set(key, &h, inner.active.name());

        Ok(())
    }

    /// Retrieve the value stored under the given key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let inner = self.inner.read()?;

        let entry = inner.keydir.get(key)?;

        let mut value = vec![0u8; entry.value_size as usize];
        self.fs
            .read_at(&self.path, &entry.file, &mut value, u64::from(entry.value_pos))?;

        if record::CRC32.checksum(&value) != entry.crc {
            return Err(Error::CrcFailed);
        }

        Ok(value)
    }

    /// Delete the key, or report [`Error::KeyNotFound`] if it does not
    /// exist.
    ///
    /// The check consults the key directory only, so an entry whose value
    /// is corrupted on disk is still deletable.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let mut guard = self.inner.write()?;
        let inner = &mut *guard;

        inner.keydir.get(key)?;

        let h = Header::for_tombstone(self.clock.now_unix(), key);

        // the key bytes occupy the value slot of a tombstone
        let entry = record::encode_record(&h, &[], key);
        Self::append_record(inner.active.as_mut(), &mut inner.keydir, &entry)?;

        inner.keydir.unset(key);

        Ok(())
    }

    /// Snapshot of all live keys, in arbitrary order.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.inner.read()?.keydir.keys())
    }

    /// Close the database.
    pub fn close(self) -> Result<()> {
        self.inner.write()?.active.flush()?;

        Ok(())
    }

    /// Rotate the active data file if appending `entry_size` more bytes
    /// would push it past the configured threshold. The threshold is a
    /// soft ceiling: an oversized record still lands, alone, in the fresh
    /// file.
    fn rotate_if_needed(&self, inner: &mut Inner, entry_size: u64) -> Result<()> {
        if inner.active.size() + entry_size <= self.cfg.max_data_file_size {
            return Ok(());
        }

        let file = self.fs.rotate(&self.path)?;

        tracing::debug!(
            from = %inner.active.name(),
            to = %file.name(),
            "rotating data file"
        );

        inner.active = file;
        inner.keydir.reset_offset();

        Ok(())
    }

    /// Append a serialized record with a single write.
    ///
    /// When fewer than the full record's bytes are accepted, the key
    /// directory offset is advanced past the partial bytes so that future
    /// records land after them, and [`Error::PartialWrite`] is surfaced.
    /// The caller must not install a locator in that case.
    pub(crate) fn append_record(
        file: &mut dyn File,
        keydir: &mut KeyDir,
        entry: &[u8],
    ) -> Result<()> {
        let n = file.write(entry)?;

        if n < entry.len() {
            keydir.advance_offset(n as u32);

            return Err(Error::PartialWrite);
        }

        Ok(())
    }
}
