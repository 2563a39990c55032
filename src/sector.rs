//! Splits files into sectors on the way in and reassembles them on the way out.
//!
//! A sectored, compressed file is stored as:
//!
//! ```text
//! [sector offset table][sector 0][sector 1]...[sector n-1][checksums]
//! ```
//!
//! The offset table holds `n + 1` offsets relative to the start of the file
//! (one more when checksums are present, pointing at the end of the checksum
//! table). An uncompressed file has no offset table, and a single-unit file
//! is one block with no table at all.

use std::cmp::min;
use std::ops::Range;

use byteorder::{ByteOrder, LE};
use log::debug;

use super::block_table::BlockEntry;
use super::compression::*;
use super::consts::*;
use super::crypto::*;
use super::error::{Error, Result};

pub(crate) fn sector_count(size: u64, sector_size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        ((size - 1) / sector_size) + 1
    }
}

/// How a file should be laid out, independent of encryption.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    pub compression: Compression,
    pub single_unit: bool,
    pub checksums: bool,
}

/// A file that went through compression but not yet through encryption,
/// since the encryption key may depend on where the file ends up.
#[derive(Debug)]
pub(crate) struct EncodedFile {
    flags: u32,
    offsets: Vec<u32>,
    sectors: Vec<Vec<u8>>,
    checksums: Vec<u32>,
}

impl EncodedFile {
    /// Storage flags describing the layout. Never includes `EXISTS` or
    /// encryption flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn sectors(&self) -> &[Vec<u8>] {
        &self.sectors
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn stored_size(&self) -> u64 {
        let table = self.offsets.len() * 4;
        let sectors: usize = self.sectors.iter().map(Vec::len).sum();
        let checksums = self.checksums.len() * 4;

        (table + sectors + checksums) as u64
    }

    /// Serializes the file, encrypting it with `key` if one is given.
    pub fn seal(self, key: Option<u32>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.stored_size() as usize);

        if !self.offsets.is_empty() {
            let mut table = vec![0u8; self.offsets.len() * 4];
            LE::write_u32_into(&self.offsets, &mut table);

            if let Some(key) = key {
                encrypt_block(&mut table, key.wrapping_sub(1));
            }
            buf.extend_from_slice(&table);
        }

        let single_unit = self.flags & MPQ_FILE_SINGLE_UNIT != 0;
        for (i, mut sector) in self.sectors.into_iter().enumerate() {
            if let Some(key) = key {
                let key = if single_unit { key } else { key.wrapping_add(i as u32) };
                encrypt_block(&mut sector, key);
            }
            buf.extend_from_slice(&sector);
        }

        if !self.checksums.is_empty() {
            let mut table = vec![0u8; self.checksums.len() * 4];
            LE::write_u32_into(&self.checksums, &mut table);
            buf.extend_from_slice(&table);
        }

        buf
    }
}

/// Compresses `data` sector by sector. Sectors that do not shrink are
/// stored raw, so no stored sector is ever larger than its input.
pub(crate) fn encode(data: &[u8], sector_size: u64, layout: Layout) -> Result<EncodedFile> {
    let compressed = layout.compression != Compression::None;

    if data.is_empty() {
        return Ok(EncodedFile {
            flags: MPQ_FILE_SINGLE_UNIT,
            offsets: Vec::new(),
            sectors: Vec::new(),
            checksums: Vec::new(),
        });
    }

    if layout.single_unit {
        let unit = compress_block(data, layout.compression)?.unwrap_or_else(|| data.to_vec());
        let mut flags = MPQ_FILE_SINGLE_UNIT;
        if compressed {
            flags |= MPQ_FILE_COMPRESS;
        }

        return Ok(EncodedFile {
            flags,
            offsets: Vec::new(),
            sectors: vec![unit],
            checksums: Vec::new(),
        });
    }

    let chunks: Vec<&[u8]> = data.chunks(sector_size as usize).collect();

    if !compressed {
        return Ok(EncodedFile {
            flags: 0,
            offsets: Vec::new(),
            sectors: chunks.into_iter().map(<[u8]>::to_vec).collect(),
            checksums: Vec::new(),
        });
    }

    let mut sectors = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let sector = compress_block(chunk, layout.compression)?.unwrap_or_else(|| chunk.to_vec());
        sectors.push(sector);
    }

    let table_entries = sectors.len() + if layout.checksums { 2 } else { 1 };
    let mut offsets = Vec::with_capacity(table_entries);
    let mut position = (table_entries * 4) as u32;
    offsets.push(position);
    for sector in &sectors {
        position += sector.len() as u32;
        offsets.push(position);
    }

    let mut flags = MPQ_FILE_COMPRESS;
    let checksums = if layout.checksums {
        flags |= MPQ_FILE_SECTOR_CRC;
        let checksums: Vec<u32> = sectors.iter().map(|s| adler2::adler32_slice(s)).collect();
        offsets.push(position + (checksums.len() * 4) as u32);
        checksums
    } else {
        Vec::new()
    };

    debug!(
        "encoded {} bytes into {} sectors ({} stored bytes)",
        data.len(),
        sectors.len(),
        offsets.last().copied().unwrap_or(0)
    );

    Ok(EncodedFile {
        flags,
        offsets,
        sectors,
        checksums,
    })
}

/// Where each piece of a stored file lives, relative to the file start.
struct StoredLayout {
    table: Option<Range<usize>>,
    sectors: Vec<Range<usize>>,
    checksums: Option<Range<usize>>,
}

fn read_offset_table(stored: &[u8], entries: usize, key: Option<u32>) -> Result<Vec<u32>> {
    let table_size = entries * 4;
    if stored.len() < table_size {
        return Err(Error::corrupt("sector offset table is truncated"));
    }

    let mut table = stored[..table_size].to_vec();
    if let Some(key) = key {
        decrypt_block(&mut table, key.wrapping_sub(1));
    }

    let mut offsets = vec![0u32; entries];
    LE::read_u32_into(&table, &mut offsets);

    Ok(offsets)
}

fn stored_layout(
    stored: &[u8],
    entry: &BlockEntry,
    sector_size: u64,
    key: Option<u32>,
) -> Result<StoredLayout> {
    let size = entry.uncompressed_size;
    let count = sector_count(size, sector_size) as usize;

    if entry.is_single_unit() {
        return Ok(StoredLayout {
            table: None,
            sectors: vec![0..stored.len()],
            checksums: None,
        });
    }

    if !entry.is_compressed() && !entry.is_imploded() {
        if (stored.len() as u64) < size {
            return Err(Error::corrupt("uncompressed file is truncated"));
        }

        let sectors = (0..count as u64)
            .map(|i| (i * sector_size) as usize..min((i + 1) * sector_size, size) as usize)
            .collect();

        return Ok(StoredLayout {
            table: None,
            sectors,
            checksums: None,
        });
    }

    let entries = count + if entry.has_checksums() { 2 } else { 1 };
    let offsets = read_offset_table(stored, entries, key)?;

    let mut sectors = Vec::with_capacity(count);
    for i in 0..count {
        let (start, end) = (offsets[i] as usize, offsets[i + 1] as usize);
        if start > end || end > stored.len() || start < entries * 4 {
            return Err(Error::corrupt(format!("sector {} has invalid offsets", i)));
        }
        sectors.push(start..end);
    }

    let checksums = if entry.has_checksums() {
        let (start, end) = (offsets[count] as usize, offsets[count + 1] as usize);
        if start > end || end > stored.len() {
            return Err(Error::corrupt("checksum table has invalid offsets"));
        }
        Some(start..end)
    } else {
        None
    };

    Ok(StoredLayout {
        table: Some(0..entries * 4),
        sectors,
        checksums,
    })
}

/// Rebuilds a file from its stored bytes, verifying sector checksums when
/// the file carries them.
pub(crate) fn decode(
    stored: &[u8],
    entry: &BlockEntry,
    sector_size: u64,
    key: Option<u32>,
) -> Result<Vec<u8>> {
    let size = entry.uncompressed_size;

    if size == 0 {
        return Ok(Vec::new());
    }

    if entry.is_imploded() {
        return Err(Error::UnsupportedCompression {
            kind: "PKWare DCL".to_string(),
        });
    }

    let layout = stored_layout(stored, entry, sector_size, key)?;

    if entry.is_single_unit() {
        let mut unit = stored.to_vec();
        if let Some(key) = key {
            decrypt_block(&mut unit, key);
        }

        return if entry.is_compressed() {
            decompress_block(&unit, size as usize)
        } else if unit.len() as u64 >= size {
            unit.truncate(size as usize);
            Ok(unit)
        } else {
            Err(Error::corrupt("single unit file is truncated"))
        };
    }

    let checksums = match &layout.checksums {
        Some(range) if range.len() == layout.sectors.len() * 4 => {
            let mut values = vec![0u32; layout.sectors.len()];
            LE::read_u32_into(&stored[range.clone()], &mut values);
            Some(values)
        }
        _ => None,
    };

    let mut result = Vec::with_capacity(size as usize);
    for (i, range) in layout.sectors.iter().enumerate() {
        let mut sector = stored[range.clone()].to_vec();

        if let Some(key) = key {
            decrypt_block(&mut sector, key.wrapping_add(i as u32));
        }

        if let Some(expected) = checksums.as_ref().map(|c| c[i]) {
            let actual = adler2::adler32_slice(&sector);
            // a zero checksum means none was recorded for this sector
            if expected != 0 && expected != actual {
                return Err(Error::ChecksumMismatch {
                    sector: i,
                    expected,
                    actual,
                });
            }
        }

        let expected_size = min(sector_size, size - i as u64 * sector_size) as usize;
        if entry.is_compressed() {
            result.extend(decompress_block(&sector, expected_size)?);
        } else {
            result.extend_from_slice(&sector);
        }
    }

    if result.len() as u64 != size {
        return Err(Error::corrupt(format!(
            "file decoded to {} bytes, expected {}",
            result.len(),
            size
        )));
    }

    Ok(result)
}

/// Re-encrypts a stored file from `old_key` to `new_key` without decoding it.
pub(crate) fn rekey(
    stored: &mut [u8],
    entry: &BlockEntry,
    sector_size: u64,
    old_key: u32,
    new_key: u32,
) -> Result<()> {
    if entry.uncompressed_size == 0 {
        return Ok(());
    }

    let layout = stored_layout(stored, entry, sector_size, Some(old_key))?;

    if entry.is_single_unit() {
        decrypt_block(stored, old_key);
        encrypt_block(stored, new_key);
        return Ok(());
    }

    if let Some(table) = layout.table {
        decrypt_block(&mut stored[table.clone()], old_key.wrapping_sub(1));
        encrypt_block(&mut stored[table], new_key.wrapping_sub(1));
    }

    for (i, range) in layout.sectors.into_iter().enumerate() {
        let sector = &mut stored[range];
        decrypt_block(sector, old_key.wrapping_add(i as u32));
        encrypt_block(sector, new_key.wrapping_add(i as u32));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTOR: u64 = 512;

    fn text(len: usize) -> Vec<u8> {
        b"lorem ipsum dolor sit amet "
            .iter()
            .cycle()
            .take(len)
            .cloned()
            .collect()
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn layout(compression: Compression) -> Layout {
        Layout {
            compression,
            single_unit: false,
            checksums: false,
        }
    }

    fn store(data: &[u8], layout: Layout, key: Option<u32>) -> (BlockEntry, Vec<u8>) {
        let encoded = encode(data, SECTOR, layout).unwrap();
        let mut flags = encoded.flags() | MPQ_FILE_EXISTS;
        if key.is_some() {
            flags |= MPQ_FILE_ENCRYPTED;
        }
        let stored = encoded.seal(key);
        let entry = BlockEntry::new(0, stored.len() as u64, data.len() as u64, flags);

        (entry, stored)
    }

    #[test]
    fn sector_counts() {
        assert_eq!(sector_count(0, 512), 0);
        assert_eq!(sector_count(1, 512), 1);
        assert_eq!(sector_count(512, 512), 1);
        assert_eq!(sector_count(513, 512), 2);
    }

    #[test]
    fn compressed_roundtrip_with_partial_last_sector() {
        let data = text(1300);
        let encoded = encode(&data, SECTOR, layout(Compression::Zlib)).unwrap();

        assert_eq!(encoded.sectors().len(), 3);
        assert_eq!(encoded.offsets().len(), 4);
        assert_eq!(encoded.offsets()[0], 16);
        assert_eq!(*encoded.offsets().last().unwrap() as u64, encoded.stored_size());

        let (entry, stored) = store(&data, layout(Compression::Zlib), None);
        assert_eq!(decode(&stored, &entry, SECTOR, None).unwrap(), data);
    }

    #[test]
    fn small_file_uses_one_sector() {
        let data = text(10);
        let encoded = encode(&data, SECTOR, layout(Compression::Zlib)).unwrap();

        assert_eq!(encoded.sectors().len(), 1);
        assert_eq!(encoded.sectors()[0], data);
    }

    #[test]
    fn no_sector_grows() {
        let mut data = noise(700);
        data.extend(text(900));
        let encoded = encode(&data, SECTOR, layout(Compression::Smallest)).unwrap();

        for (sector, chunk) in encoded.sectors().iter().zip(data.chunks(SECTOR as usize)) {
            assert!(sector.len() <= chunk.len());
        }
        // the noisy first sector is kept raw
        assert_eq!(encoded.sectors()[0], data[..512].to_vec());

        let (entry, stored) = store(&data, layout(Compression::Smallest), Some(0x1234_5678));
        assert_eq!(decode(&stored, &entry, SECTOR, Some(0x1234_5678)).unwrap(), data);
    }

    #[test]
    fn empty_file_is_single_unit() {
        let encoded = encode(&[], SECTOR, layout(Compression::Zlib)).unwrap();

        assert_eq!(encoded.flags(), MPQ_FILE_SINGLE_UNIT);
        assert_eq!(encoded.stored_size(), 0);

        let entry = BlockEntry::new(0, 0, 0, MPQ_FILE_EXISTS | MPQ_FILE_SINGLE_UNIT);
        assert!(decode(&[], &entry, SECTOR, None).unwrap().is_empty());
    }

    #[test]
    fn uncompressed_and_single_unit_roundtrips() {
        let data = noise(1100);

        for layout in &[
            layout(Compression::None),
            Layout {
                compression: Compression::Bzip2,
                single_unit: true,
                checksums: false,
            },
            Layout {
                compression: Compression::None,
                single_unit: true,
                checksums: false,
            },
        ] {
            for key in &[None, Some(0xDEAD_BEEF)] {
                let (entry, stored) = store(&data, *layout, *key);
                assert_eq!(decode(&stored, &entry, SECTOR, *key).unwrap(), data);
            }
        }
    }

    #[test]
    fn checksums_detect_damage() {
        let data = text(1500);
        let layout = Layout {
            compression: Compression::Zlib,
            single_unit: false,
            checksums: true,
        };
        let (entry, mut stored) = store(&data, layout, None);

        assert!(entry.has_checksums());
        assert_eq!(decode(&stored, &entry, SECTOR, None).unwrap(), data);

        let offsets = read_offset_table(&stored, 5, None).unwrap();
        let second = offsets[1] as usize;
        stored[second + 1] ^= 0xFF;

        match decode(&stored, &entry, SECTOR, None) {
            Err(Error::ChecksumMismatch { sector: 1, .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn damaged_offset_table_is_corrupt() {
        let data = text(1500);
        let (entry, mut stored) = store(&data, layout(Compression::Zlib), None);
        LE::write_u32(&mut stored[4..8], 0xFFFF);

        assert!(matches!(
            decode(&stored, &entry, SECTOR, None),
            Err(Error::Corrupt { .. })
        ));
        assert!(matches!(
            decode(&stored[..6], &entry, SECTOR, None),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn rekey_moves_between_keys() {
        let data = text(2000);
        let layouts = [
            layout(Compression::Zlib),
            layout(Compression::None),
            Layout {
                compression: Compression::Zlib,
                single_unit: true,
                checksums: false,
            },
        ];

        for layout in layouts.iter() {
            let (entry, mut stored) = store(&data, *layout, Some(100));
            rekey(&mut stored, &entry, SECTOR, 100, 200).unwrap();

            assert_eq!(decode(&stored, &entry, SECTOR, Some(200)).unwrap(), data);
        }
    }
}
