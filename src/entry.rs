use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// Key type stored by the tree.
pub type Key = i64;

/// Value type stored by the tree.
pub type Value = i64;

/// Sentinel value recording a deletion. Reserved: a user value equal to the
/// sentinel is indistinguishable from a delete.
pub const TOMBSTONE: Value = Value::MIN;

/// Encoded width of one entry: key then value, little-endian.
pub const ENTRY_SIZE: usize = 16;

/// A single key-value record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Whether this entry records a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value == TOMBSTONE
    }

    /// Appends the encoded entry to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_i64::<LittleEndian>(self.key)?;
        w.write_i64::<LittleEndian>(self.value)?;
        Ok(())
    }

    /// Decodes an entry from the first `ENTRY_SIZE` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Entry {
        Entry {
            key: LittleEndian::read_i64(&buf[..8]),
            value: LittleEndian::read_i64(&buf[8..ENTRY_SIZE]),
        }
    }

    /// Reads the next entry from a byte stream. A clean end of stream yields
    /// `None`; a stream ending mid-record is corrupt input.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Entry>> {
        let mut buf = [0u8; ENTRY_SIZE];
        let mut filled = 0;
        while filled < ENTRY_SIZE {
            match r.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            ENTRY_SIZE => Ok(Some(Entry::decode(&buf))),
            n => Err(Error::CorruptInput(format!(
                "record truncated after {n} of {ENTRY_SIZE} bytes"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        Entry::new(1, 256).write_to(&mut buf).expect("encode failed");

        assert_eq!(buf.len(), ENTRY_SIZE);
        // Little-endian: low byte first.
        assert_eq!(&buf[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buf[8..], &[0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_roundtrip() {
        for entry in [
            Entry::new(0, 0),
            Entry::new(-42, 42),
            Entry::new(Key::MAX, Value::MAX),
            Entry::new(7, TOMBSTONE),
        ] {
            let mut buf = Vec::new();
            entry.write_to(&mut buf).expect("encode failed");
            assert_eq!(Entry::decode(&buf), entry);
        }
    }

    #[test]
    fn test_read_from_stream() {
        let mut buf = Vec::new();
        Entry::new(1, 10).write_to(&mut buf).unwrap();
        Entry::new(2, 20).write_to(&mut buf).unwrap();

        let mut cursor = &buf[..];
        assert_eq!(
            Entry::read_from(&mut cursor).unwrap(),
            Some(Entry::new(1, 10))
        );
        assert_eq!(
            Entry::read_from(&mut cursor).unwrap(),
            Some(Entry::new(2, 20))
        );
        assert_eq!(Entry::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_read_from_rejects_partial_record() {
        let mut buf = Vec::new();
        Entry::new(1, 10).write_to(&mut buf).unwrap();
        buf.extend_from_slice(&[0xab, 0xcd]);

        let mut cursor = &buf[..];
        assert!(Entry::read_from(&mut cursor).unwrap().is_some());
        assert!(matches!(
            Entry::read_from(&mut cursor),
            Err(Error::CorruptInput(_))
        ));
    }

    #[test]
    fn test_tombstone_predicate() {
        assert!(Entry::new(1, TOMBSTONE).is_tombstone());
        assert!(!Entry::new(1, 0).is_tombstone());
    }
}
