//! In-memory filesystem collaborator, selected by the `in:mem:db` magic
//! path. Satisfies the same contract as the disk implementation so the
//! whole engine, merge included, runs against it in tests.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

use super::{
    is_hint_name, is_tmp_name, next_index, segment_sort_key, to_data_file, File, FileSystem,
    DATA_FILE_EXT,
};

type Buffer = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct Inner {
    /// Full file name (with extension) to contents.
    files: HashMap<String, Buffer>,
}

/// In-memory filesystem. Clones share the same files, so a database can be
/// "closed" and reopened against the same instance.
///
/// A single instance holds one flat namespace; the db path argument is
/// accepted for contract parity and not interpreted.
#[derive(Clone, Default)]
pub struct MemoryFs {
    inner: Arc<Mutex<Inner>>,
}

/// Handle to an in-memory file: reads from its own cursor, appends at the
/// end like an `O_APPEND` descriptor.
pub struct MemoryFile {
    name: String,
    buf: Buffer,
    pos: usize,
}

impl Read for MemoryFile {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let buf = self.buf.lock().expect("memory fs poisoned");
        let n = out.len().min(buf.len().saturating_sub(self.pos));
        out[..n].copy_from_slice(&buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().expect("memory fs poisoned");
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl File for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.buf.lock().expect("memory fs poisoned").len() as u64
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bare names of all files.
    fn names(inner: &Inner) -> Vec<String> {
        inner
            .files
            .keys()
            .filter_map(|f| f.strip_suffix(DATA_FILE_EXT))
            .map(str::to_string)
            .collect()
    }

    fn handle(inner: &mut Inner, name: &str) -> MemoryFile {
        let buf = inner
            .files
            .entry(to_data_file(name))
            .or_default()
            .clone();

        MemoryFile {
            name: name.to_string(),
            buf,
            pos: 0,
        }
    }
}

impl FileSystem for MemoryFs {
    fn open(&self, _path: &Path) -> Result<Box<dyn File>> {
        let mut inner = self.inner.lock()?;

        let names = Self::names(&inner);
        let latest = names
            .iter()
            .filter(|n| !is_hint_name(n) && !is_tmp_name(n))
            .max_by_key(|n| segment_sort_key(n))
            .cloned();

        let name = match latest {
            Some(name) => name,
            None => format!("data_{}_0", next_index(names.iter().map(String::as_str))),
        };

        Ok(Box::new(Self::handle(&mut inner, &name)))
    }

    fn rotate(&self, _path: &Path) -> Result<Box<dyn File>> {
        let mut inner = self.inner.lock()?;

        let names = Self::names(&inner);
        let name = format!("data_{}_0", next_index(names.iter().map(String::as_str)));

        Ok(Box::new(Self::handle(&mut inner, &name)))
    }

    fn walk(&self, _path: &Path, f: &mut dyn FnMut(&mut dyn File) -> Result<()>) -> Result<()> {
        // Snapshot under the lock, then run callbacks without it so they
        // can call back into the filesystem (merge renames mid-walk).
        let mut snapshot: Vec<(String, Buffer)> = {
            let inner = self.inner.lock()?;

            let names = Self::names(&inner);
            names
                .iter()
                .filter(|n| !is_tmp_name(n))
                .filter(|n| is_hint_name(n) || !names.iter().any(|h| h == &format!("{n}.a")))
                .map(|n| (n.clone(), inner.files[&to_data_file(n)].clone()))
                .collect()
        };

        snapshot.sort_by_key(|(n, _)| (segment_sort_key(n), n.clone()));

        for (name, buf) in snapshot {
            let mut file = MemoryFile { name, buf, pos: 0 };
            f(&mut file)?;
        }

        Ok(())
    }

    fn read_at(&self, _path: &Path, name: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = {
            let inner = self.inner.lock()?;
            inner
                .files
                .get(&to_data_file(name))
                .cloned()
                .ok_or_else(|| Error::Io(format!("no such data file: {name}")))?
        };

        let data = data.lock()?;
        let offset = offset as usize;
        if offset + buf.len() > data.len() {
            return Err(Error::Io(format!(
                "short read at {offset} in data file {name}"
            )));
        }

        buf.copy_from_slice(&data[offset..offset + buf.len()]);

        Ok(buf.len())
    }

    fn open_truncate(&self, _path: &Path, name: &str) -> Result<Box<dyn File>> {
        let mut inner = self.inner.lock()?;

        let file = Self::handle(&mut inner, name);
        file.buf.lock()?.clear();

        Ok(Box::new(file))
    }

    fn rename(&self, _path: &Path, src: &str, dst: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;

        let buf = inner
            .files
            .remove(&to_data_file(src))
            .ok_or_else(|| Error::Io(format!("no such data file: {src}")))?;

        inner.files.insert(to_data_file(dst), buf);

        Ok(())
    }
}
