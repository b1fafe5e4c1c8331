//! Merge: compaction of immutable data files plus hint emission.
//!
//! Merge is invoked by the caller, never scheduled; each invocation
//! rewrites at most one non-active data file that has no hint sidecar yet.
//! The file is scanned sequentially, not through the key directory (which
//! would race with concurrent writes and miss deleted keys), and only
//! records the live directory still points at are copied into a
//! replacement file.
//! A hint sidecar with the rewritten offsets is emitted alongside.
//!
//! Nothing observable changes until the replacement file is renamed over
//! the original under the exclusive lock; a failure before that point
//! leaves only stray `.tmp` files behind.

use std::io::BufReader;

use crate::error::{Error, Result};
use crate::fs::{is_hint_name, File};
use crate::keydir::KeyDir;
use crate::record;

use super::Cask;

impl Cask {
    /// Compact the first eligible data file and write its hint sidecar.
    ///
    /// Eligible means non-active, not yet hinted, and at least
    /// `merge_min_bytes` long. Errors while a file is being rewritten are
    /// logged and leave the database untouched; the next invocation picks
    /// up where this one left off.
    pub fn merge(&self) -> Result<()> {
        // one merge at a time; writers never contend on this lock
        let _serialize = self.merge_lock.lock()?;

        let active = self.inner.read()?.active.name().to_string();

        let mut done = false;

        self.fs.walk(&self.path, &mut |file| {
            if done || is_hint_name(file.name()) || file.name() == active {
                return Ok(());
            }

            if file.size() < self.cfg.merge_min_bytes {
                return Ok(());
            }

            done = true;

            let name = file.name().to_string();
            if let Err(e) = self.merge_file(file) {
                tracing::warn!(
                    segment = %name,
                    error = %e,
                    "merge failed, data file left untouched"
                );
            }

            Ok(())
        })
    }

    /// Rewrite one immutable data file, keeping only records the live key
    /// directory points at, then commit via rename and splice the new
    /// offsets back in.
    fn merge_file(&self, file: &mut dyn File) -> Result<()> {
        let name = file.name().to_string();

        let merge_tmp = format!("{name}.merge.tmp");
        let hint_tmp = format!("{name}.hint.tmp");

        let mut merged = self.fs.open_truncate(&self.path, &merge_tmp)?;
        let mut hints = self.fs.open_truncate(&self.path, &hint_tmp)?;

        // tracks offsets within the replacement file
        let mut rewritten = KeyDir::new();

        let mut kept = 0u64;
        let mut dropped = 0u64;

        let mut pos: u32 = 0;
        let mut r = BufReader::new(file);

        while let Some(h) = record::read_header(&mut r)? {
            let value_pos = pos + record::HEADER_SIZE + h.key_size;
            pos += h.entry_size();

            // tombstones never survive a merge
            if h.is_tombstone() {
                record::skip_payload(&mut r, h.value_size, "tombstone key")?;
                dropped += 1;
                continue;
            }

            let key = record::read_payload(&mut r, h.key_size, "key")?;
            let value = record::read_payload(&mut r, h.value_size, "value")?;

            // drop corrupted records rather than carry them forward
            if record::CRC32.checksum(&value) != h.crc {
                dropped += 1;
                continue;
            }

            // a record is live only while the directory points at this
            // exact location; anything else has been deleted or overwritten
            let live = {
                let inner = self.inner.read()?;
                match inner.keydir.get(&key) {
                    Ok(e) => e.file == name && e.value_pos == value_pos,
                    Err(_) => false,
                }
            };
            if !live {
                dropped += 1;
                continue;
            }

            let entry = record::encode_record(&h, &key, &value);
            Self::append_record(merged.as_mut(), &mut rewritten, &entry)?;

            let locator = rewritten.set(&key, &h, &name);

            let hint = record::encode_hint(&h.to_hint(locator.value_pos), &key);
            Self::append_hint(hints.as_mut(), &hint)?;

            kept += 1;
        }

        // commit: swap the data file and splice the new offsets while
        // writers are held off
        let mut guard = self.inner.write()?;

        self.fs.rename(&self.path, &merge_tmp, &name)?;
        guard.keydir.merge(rewritten);

        tracing::info!(segment = %name, kept, dropped, "merged data file");

        // best effort: a lost hint only costs the next startup a rescan
        if let Err(e) = self.fs.rename(&self.path, &hint_tmp, &format!("{name}.a")) {
            tracing::warn!(segment = %name, error = %e, "hint rename failed after merge");
        }

        Ok(())
    }

    /// Append a serialized hint record with a single write.
    fn append_hint(file: &mut dyn File, hint: &[u8]) -> Result<()> {
        let n = file.write(hint)?;

        if n < hint.len() {
            return Err(Error::PartialWrite);
        }

        Ok(())
    }
}
