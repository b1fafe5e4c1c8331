//! Disk-backed filesystem collaborator.

use std::fs::{self, File as StdFile, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::clock::Clock;
use crate::error::{Error, Result};

use super::{
    is_hint_name, is_tmp_name, next_index, segment_sort_key, to_data_file, File, FileSystem,
    DATA_FILE_EXT,
};

/// A file on disk. Tracks its own size so the rotation check does not
/// `stat` per write.
pub struct DiskFile {
    file: StdFile,
    name: String,
    size: u64,
}

impl DiskFile {
    fn open(path: &Path, opts: &OpenOptions) -> Result<Self> {
        let file = opts
            .open(path)
            .map_err(|e| Error::Io(format!("could not open data file {path:?}: {e}")))?;

        let size = file.metadata()?.len();

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(DATA_FILE_EXT).to_string())
            .ok_or_else(|| Error::Io(format!("invalid data file path {path:?}")))?;

        Ok(DiskFile { file, name, size })
    }
}

impl Read for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for DiskFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl File for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Disk-backed filesystem. Data file names embed a rotation index and a
/// creation timestamp taken from the injected clock.
pub struct DiskFs {
    clock: Box<dyn Clock>,
}

impl DiskFs {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        DiskFs { clock }
    }

    /// Bare names of all `.csk` entries in the directory.
    fn list_names(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str() {
                if let Some(name) = file_name.strip_suffix(DATA_FILE_EXT) {
                    names.push(name.to_string());
                }
            }
        }

        Ok(names)
    }

    fn create_data_file(&self, path: &Path, index: u64) -> Result<Box<dyn File>> {
        let name = format!("data_{}_{}", index, self.clock.now_unix());
        let file = DiskFile::open(
            &path.join(to_data_file(&name)),
            OpenOptions::new().create(true).append(true).read(true),
        )?;

        Ok(Box::new(file))
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        match fs::metadata(path) {
            Ok(info) if info.is_dir() => Ok(()),
            Ok(_) => Err(Error::Io(format!(
                "database path {path:?} exists and is not a directory"
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(fs::create_dir_all(path)?),
            Err(e) => Err(e.into()),
        }
    }
}

impl FileSystem for DiskFs {
    fn open(&self, path: &Path) -> Result<Box<dyn File>> {
        self.ensure_dir(path)?;

        let names = self.list_names(path)?;

        // Only plain data files may become active; leftover temporaries and
        // hint sidecars never do.
        let latest = names
            .iter()
            .filter(|n| !is_hint_name(n) && !is_tmp_name(n))
            .max_by_key(|n| segment_sort_key(n));

        match latest {
            Some(name) => {
                let file = DiskFile::open(
                    &path.join(to_data_file(name)),
                    OpenOptions::new().create(true).append(true).read(true),
                )?;
                Ok(Box::new(file))
            }
            None => self.create_data_file(path, next_index(names.iter().map(String::as_str))),
        }
    }

    fn rotate(&self, path: &Path) -> Result<Box<dyn File>> {
        let names = self.list_names(path)?;

        self.create_data_file(path, next_index(names.iter().map(String::as_str)))
    }

    fn walk(&self, path: &Path, f: &mut dyn FnMut(&mut dyn File) -> Result<()>) -> Result<()> {
        let names = self.list_names(path)?;

        let mut walkable: Vec<&String> = names
            .iter()
            .filter(|n| !is_tmp_name(n))
            .filter(|n| {
                // a hinted data file is replayed through its hint instead
                is_hint_name(n) || !names.iter().any(|h| h == &format!("{n}.a"))
            })
            .collect();

        walkable.sort_by_key(|n| (segment_sort_key(n), n.to_string()));

        for name in walkable {
            let mut file = DiskFile::open(
                &path.join(to_data_file(name)),
                OpenOptions::new().read(true),
            )?;

            f(&mut file)?;
        }

        Ok(())
    }

    fn read_at(&self, path: &Path, name: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(path.join(to_data_file(name)))?;

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(buf.len())
    }

    fn open_truncate(&self, path: &Path, name: &str) -> Result<Box<dyn File>> {
        let file = DiskFile::open(
            &path.join(to_data_file(name)),
            OpenOptions::new().create(true).write(true).truncate(true),
        )?;

        Ok(Box::new(file))
    }

    fn rename(&self, path: &Path, src: &str, dst: &str) -> Result<()> {
        Ok(fs::rename(
            path.join(to_data_file(src)),
            path.join(to_data_file(dst)),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn disk() -> DiskFs {
        DiskFs::new(Box::new(FixedClock(42)))
    }

    #[test]
    fn test_open_creates_dir_and_fresh_data_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");

        let fs = disk();
        let file = fs.open(&path).expect("open");

        assert_eq!(file.name(), "data_0_42");
        assert_eq!(file.size(), 0);
        assert!(path.join("data_0_42.csk").exists());
    }

    #[test]
    fn test_open_picks_latest_data_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_path_buf();

        let fs = disk();
        for name in ["data_0_10", "data_2_30", "data_1_20"] {
            fs.open_truncate(&path, name).expect("seed");
        }
        // stale temporaries and hints must not win
        fs.open_truncate(&path, "data_9_90.merge.tmp").expect("seed");
        fs.open_truncate(&path, "data_2_30.a").expect("seed");

        let file = fs.open(&path).expect("open");
        assert_eq!(file.name(), "data_2_30");
    }

    #[test]
    fn test_rotate_sorts_after_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");

        let fs = disk();
        let first = fs.open(&path).expect("open");
        let second = fs.rotate(&path).expect("rotate");

        assert_ne!(first.name(), second.name());
        assert!(
            segment_sort_key(first.name()) < segment_sort_key(second.name()),
            "rotated file must sort after the previous active file"
        );
    }

    #[test]
    fn test_write_tracks_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_path_buf();

        let fs = disk();
        let mut file = fs.open_truncate(&path, "data_0_1").expect("create");

        file.write_all(b"hello").expect("write");
        assert_eq!(file.size(), 5);
    }

    #[test]
    fn test_walk_order_and_filtering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_path_buf();

        let fs = disk();
        for name in [
            "data_0_10",
            "data_10_99",
            "data_2_30",
            "data_2_30.a",
            "data_1_20.merge.tmp",
            "data_1_20.hint.tmp",
        ] {
            fs.open_truncate(&path, name).expect("seed");
        }

        let mut seen = Vec::new();
        fs.walk(&path, &mut |file| {
            seen.push(file.name().to_string());
            Ok(())
        })
        .expect("walk");

        // numeric order, hint replaces its data file, temporaries invisible
        assert_eq!(seen, vec!["data_0_10", "data_2_30.a", "data_10_99"]);
    }

    #[test]
    fn test_read_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_path_buf();

        let fs = disk();
        let mut file = fs.open_truncate(&path, "data_0_1").expect("create");
        file.write_all(b"hello world").expect("write");

        let mut buf = [0u8; 5];
        let n = fs.read_at(&path, "data_0_1", &mut buf, 6).expect("read_at");
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_rename_replaces_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_path_buf();

        let fs = disk();
        let mut src = fs.open_truncate(&path, "data_0_1.merge.tmp").expect("src");
        src.write_all(b"new contents").expect("write");
        drop(src);

        let mut dst = fs.open_truncate(&path, "data_0_1").expect("dst");
        dst.write_all(b"old").expect("write");
        drop(dst);

        fs.rename(&path, "data_0_1.merge.tmp", "data_0_1")
            .expect("rename");

        let mut buf = [0u8; 12];
        fs.read_at(&path, "data_0_1", &mut buf, 0).expect("read_at");
        assert_eq!(&buf, b"new contents");
        assert!(!path.join("data_0_1.merge.tmp.csk").exists());
    }
}
