//! Record codec for data and hint files.
//!
//! # Data record format
//!
//! Each data file is a sequence of records, appended and never mutated:
//!
//! ```text
//! +---------+--------------+-------------+--------------+---------+-----------+
//! | crc:u32 | timestamp:u32| key_size:u32| value_size:u32| key     | value     |
//! +---------+--------------+-------------+--------------+---------+-----------+
//! | 4 bytes | 4 bytes      | 4 bytes     | 4 bytes      | var len | var len   |
//! +---------+--------------+-------------+--------------+---------+-----------+
//! ```
//!
//! - All integers are little-endian
//! - The CRC32 (IEEE) covers the value bytes only
//! - A tombstone is encoded with `key_size = 0` and `value_size = len(key)`;
//!   the key bytes occupy the value slot and no value is stored
//!
//! # Hint record format
//!
//! Hint files written by merge carry the same header plus the absolute
//! offset of the value within the matching data file:
//!
//! ```text
//! +---------+--------------+-------------+--------------+--------------+---------+
//! | crc:u32 | timestamp:u32| key_size:u32| value_size:u32| value_pos:u32| key     |
//! +---------+--------------+-------------+--------------+--------------+---------+
//! ```
//!
//! Parsers here do not verify checksums; the CRC is checked against the
//! bytes actually pulled from disk, at read time and during merge scans.
//! Recovery scans would otherwise pay the CRC cost for values they never
//! serve.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::io::{self, Read};

use crate::error::{Error, Result};

/// Size of a data record header in bytes.
pub const HEADER_SIZE: u32 = 16;

/// Size of a hint record header in bytes.
pub const HINT_HEADER_SIZE: u32 = 20;

/// CRC-32/IEEE (polynomial 0xEDB88320), computed over value bytes only.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Fixed-layout header of a data record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub crc: u32,
    pub timestamp: u32,
    pub key_size: u32,
    pub value_size: u32,
}

impl Header {
    /// Header for a key/value record. The checksum covers the value bytes.
    pub fn for_put(timestamp: u32, key: &[u8], value: &[u8]) -> Self {
        Header {
            crc: CRC32.checksum(value),
            timestamp,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
        }
    }

    /// Header for a tombstone. The key bytes go into the value slot, so the
    /// checksum covers the key.
    pub fn for_tombstone(timestamp: u32, key: &[u8]) -> Self {
        Header {
            crc: CRC32.checksum(key),
            timestamp,
            key_size: 0,
            value_size: key.len() as u32,
        }
    }

    /// A record with no key bytes is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.key_size == 0
    }

    /// Total on-disk size of the record this header describes.
    pub fn entry_size(&self) -> u32 {
        HEADER_SIZE + self.key_size + self.value_size
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut [u8]) {
        let mut w = &mut buf[..];
        w.write_u32::<LittleEndian>(self.crc).unwrap();
        w.write_u32::<LittleEndian>(self.timestamp).unwrap();
        w.write_u32::<LittleEndian>(self.key_size).unwrap();
        w.write_u32::<LittleEndian>(self.value_size).unwrap();
    }

    fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Self {
        let mut r = &buf[..];
        Header {
            crc: r.read_u32::<LittleEndian>().unwrap(),
            timestamp: r.read_u32::<LittleEndian>().unwrap(),
            key_size: r.read_u32::<LittleEndian>().unwrap(),
            value_size: r.read_u32::<LittleEndian>().unwrap(),
        }
    }

    /// Hint header locating this record's value at `value_pos` in its data file.
    pub fn to_hint(&self, value_pos: u32) -> HintHeader {
        HintHeader {
            header: *self,
            value_pos,
        }
    }
}

/// Fixed-layout header of a hint record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HintHeader {
    pub header: Header,
    pub value_pos: u32,
}

impl HintHeader {
    pub fn encode(&self) -> [u8; HINT_HEADER_SIZE as usize] {
        let mut buf = [0u8; HINT_HEADER_SIZE as usize];
        self.header.encode_into(&mut buf[..HEADER_SIZE as usize]);
        (&mut buf[HEADER_SIZE as usize..])
            .write_u32::<LittleEndian>(self.value_pos)
            .unwrap();
        buf
    }
}

/// Serialize a full record into one contiguous buffer so it can be appended
/// with a single write.
///
/// For a tombstone pass an empty key slot and the key bytes as the value
/// slot, matching the wire layout.
pub fn encode_record(h: &Header, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(h.entry_size() as usize);
    buf.extend_from_slice(&h.encode());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

/// Serialize a hint record into one contiguous buffer.
pub fn encode_hint(h: &HintHeader, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HINT_HEADER_SIZE as usize + key.len());
    buf.extend_from_slice(&h.encode());
    buf.extend_from_slice(key);
    buf
}

/// Read the next data record header from a stream.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes left at a record
/// boundary). A header cut short mid-way is corruption, as is any short
/// read reported while the payload is being consumed by the caller.
pub fn read_header<R: Read>(r: &mut R) -> Result<Option<Header>> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    match read_full(r, &mut buf)? {
        0 => Ok(None),
        n if n < buf.len() => Err(Error::Corruption(format!(
            "record header cut short ({n} of {HEADER_SIZE} bytes)"
        ))),
        _ => Ok(Some(Header::decode(&buf))),
    }
}

/// Read the next hint record header from a stream.
///
/// Same end-of-stream semantics as [`read_header`].
pub fn read_hint_header<R: Read>(r: &mut R) -> Result<Option<HintHeader>> {
    let mut buf = [0u8; HINT_HEADER_SIZE as usize];
    match read_full(r, &mut buf)? {
        0 => Ok(None),
        n if n < buf.len() => Err(Error::Corruption(format!(
            "hint header cut short ({n} of {HINT_HEADER_SIZE} bytes)"
        ))),
        _ => {
            let header = Header::decode(buf[..HEADER_SIZE as usize].try_into().unwrap());
            let value_pos = (&buf[HEADER_SIZE as usize..])
                .read_u32::<LittleEndian>()
                .unwrap();
            Ok(Some(HintHeader { header, value_pos }))
        }
    }
}

/// Read exactly `len` payload bytes, reporting a short read as corruption.
pub fn read_payload<R: Read>(r: &mut R, len: u32, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    let n = read_full(r, &mut buf)?;
    if n < buf.len() {
        return Err(Error::Corruption(format!(
            "{what} cut short ({n} of {len} bytes)"
        )));
    }
    Ok(buf)
}

/// Skip `len` payload bytes without retaining them, reporting a short read
/// as corruption.
pub fn skip_payload<R: Read>(r: &mut R, len: u32, what: &str) -> Result<()> {
    let n = io::copy(&mut r.take(u64::from(len)), &mut io::sink())?;
    if n < u64::from(len) {
        return Err(Error::Corruption(format!(
            "{what} cut short ({n} of {len} bytes)"
        )));
    }
    Ok(())
}

/// Read until the buffer is full or the stream ends, returning the number
/// of bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(n)
}
