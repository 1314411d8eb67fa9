//! Run footer metadata.
//!
//! Every run file ends with a meta block describing its entry region, framed
//! so a reader can find and verify it from the end of the file:
//!
//! ```text
//! +---------------------------+
//! | serialized meta (bincode) |
//! +---------------------------+
//! | crc32 of meta block : u32 |
//! +---------------------------+
//! | meta block offset   : u64 |
//! +---------------------------+
//! ```
//!
//! The trailer integers are big-endian. A mismatched checksum, a truncated
//! trailer, or an offset pointing past the file all fail the read as corrupt.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};

use crate::entry::Key;
use crate::error::{Error, Result};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Byte length of the fixed trailer: checksum plus meta offset.
pub const TRAILER_SIZE: u64 = 12;

/// Metadata appended after a run's entry region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    /// Number of entries in the entry region.
    pub entry_count: u64,
    /// First key of each entry page, for narrowing point and range lookups.
    pub fences: Vec<Key>,
    /// Bloom filter bitmap over the run's keys.
    pub filter_bitmap: Vec<u8>,
    /// Bit count of the filter bitmap.
    pub filter_bits: u64,
    /// Number of hash functions the filter uses.
    pub filter_hashes: u32,
    /// SipHash keys the filter was built with.
    pub filter_sip_keys: [(u64, u64); 2],
}

impl RunMeta {
    /// Appends the meta block and trailer to `w`, which must be positioned at
    /// the end of the entry region, `data_len` bytes into the file.
    pub fn write_to<W: Write>(&self, w: &mut W, data_len: u64) -> Result<()> {
        let meta = bincode::serialize(self)?;
        w.write_all(&meta)?;
        w.write_u32::<BigEndian>(CRC32.checksum(&meta))?;
        w.write_u64::<BigEndian>(data_len)?;
        Ok(())
    }

    /// Reads the meta block back from an open run file. Returns the decoded
    /// meta and the byte length of the entry region.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<(RunMeta, u64)> {
        let file_len = r.seek(SeekFrom::End(0))?;
        if file_len < TRAILER_SIZE {
            return Err(Error::Corrupt(format!(
                "file too short for a trailer: {file_len} bytes"
            )));
        }

        r.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let checksum = r.read_u32::<BigEndian>()?;
        let meta_offset = r.read_u64::<BigEndian>()?;
        if meta_offset > file_len - TRAILER_SIZE {
            return Err(Error::Corrupt(format!(
                "meta offset {meta_offset} beyond file end"
            )));
        }

        let meta_len = (file_len - TRAILER_SIZE - meta_offset) as usize;
        let mut meta = vec![0u8; meta_len];
        r.seek(SeekFrom::Start(meta_offset))?;
        r.read_exact(&mut meta)?;
        if CRC32.checksum(&meta) != checksum {
            return Err(Error::Corrupt("meta checksum mismatch".to_string()));
        }

        Ok((bincode::deserialize(&meta)?, meta_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_meta() -> RunMeta {
        RunMeta {
            entry_count: 3,
            fences: vec![1, 257],
            filter_bitmap: vec![0b1010_0101; 8],
            filter_bits: 64,
            filter_hashes: 4,
            filter_sip_keys: [(1, 2), (3, 4)],
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let meta = sample_meta();
        let mut file = Cursor::new(vec![0u8; 48]); // fake entry region
        file.seek(SeekFrom::End(0)).unwrap();
        meta.write_to(&mut file, 48).expect("write failed");

        let (decoded, data_len) = RunMeta::read_from(&mut file).expect("read failed");
        assert_eq!(data_len, 48);
        assert_eq!(decoded.entry_count, 3);
        assert_eq!(decoded.fences, vec![1, 257]);
        assert_eq!(decoded.filter_bitmap, meta.filter_bitmap);
        assert_eq!(decoded.filter_sip_keys, meta.filter_sip_keys);
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let mut file = Cursor::new(Vec::new());
        sample_meta().write_to(&mut file, 0).expect("write failed");

        // Flip one byte inside the meta block.
        file.get_mut()[1] ^= 0xff;
        assert!(matches!(
            RunMeta::read_from(&mut file),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_truncated_trailer_is_corrupt() {
        let mut file = Cursor::new(vec![1u8, 2, 3]);
        assert!(matches!(
            RunMeta::read_from(&mut file),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_bogus_offset_is_corrupt() {
        let mut file = Cursor::new(Vec::new());
        file.write_u32::<BigEndian>(0).unwrap();
        file.write_u64::<BigEndian>(u64::MAX).unwrap();
        assert!(matches!(
            RunMeta::read_from(&mut file),
            Err(Error::Corrupt(_))
        ));
    }
}
