use std::io::Error as IoError;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::consts::*;
use super::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BlockEntry {
    pub file_pos: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub flags: u32,
}

impl BlockEntry {
    pub fn new(
        file_pos: u64,
        compressed_size: u64,
        uncompressed_size: u64,
        flags: u32,
    ) -> BlockEntry {
        BlockEntry {
            file_pos,
            compressed_size,
            uncompressed_size,
            flags,
        }
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<BlockEntry> {
        let file_pos = u64::from(reader.read_u32::<LE>()?);
        let compressed_size = u64::from(reader.read_u32::<LE>()?);
        let uncompressed_size = u64::from(reader.read_u32::<LE>()?);
        let flags = reader.read_u32::<LE>()?;

        Ok(BlockEntry {
            file_pos,
            compressed_size,
            uncompressed_size,
            flags,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> std::result::Result<(), IoError> {
        writer.write_u32::<LE>(self.file_pos as u32)?;
        writer.write_u32::<LE>(self.compressed_size as u32)?;
        writer.write_u32::<LE>(self.uncompressed_size as u32)?;
        writer.write_u32::<LE>(self.flags)?;

        Ok(())
    }

    pub fn end(&self) -> u64 {
        self.file_pos + self.compressed_size
    }

    pub fn exists(&self) -> bool {
        (self.flags & MPQ_FILE_EXISTS) != 0
    }

    pub fn is_imploded(&self) -> bool {
        (self.flags & MPQ_FILE_IMPLODE) != 0
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & MPQ_FILE_COMPRESS) != 0
    }

    pub fn is_encrypted(&self) -> bool {
        (self.flags & MPQ_FILE_ENCRYPTED) != 0
    }

    pub fn is_key_adjusted(&self) -> bool {
        (self.flags & MPQ_FILE_ADJUST_KEY) != 0
    }

    pub fn is_single_unit(&self) -> bool {
        (self.flags & MPQ_FILE_SINGLE_UNIT) != 0
    }

    pub fn is_delete_marker(&self) -> bool {
        (self.flags & MPQ_FILE_DELETE_MARKER) != 0
    }

    pub fn is_patch_file(&self) -> bool {
        (self.flags & MPQ_FILE_PATCH_FILE) != 0
    }

    pub fn has_checksums(&self) -> bool {
        (self.flags & MPQ_FILE_SECTOR_CRC) != 0
    }
}

/// Result of [`BlockTable::allocate`], needed to undo it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Allocation {
    pub index: u32,
    previous: Option<BlockEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct BlockTable {
    entries: Vec<BlockEntry>,
}

impl BlockTable {
    pub fn new() -> BlockTable {
        BlockTable::default()
    }

    pub fn from_entries(entries: Vec<BlockEntry>) -> BlockTable {
        BlockTable { entries }
    }

    /// Parses an already decrypted table.
    pub fn from_bytes(data: &[u8], entries: usize) -> Result<BlockTable> {
        let mut table = Vec::with_capacity(entries);
        let mut slice = data;
        for _ in 0..entries {
            table.push(BlockEntry::from_reader(&mut slice)?);
        }

        Ok(BlockTable { entries: table })
    }

    /// Serializes the table without encryption.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.len() * BLOCK_TABLE_ENTRY_SIZE as usize);
        for entry in &self.entries {
            // writing into a Vec cannot fail
            let _ = entry.write(&mut buf);
        }

        buf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Result<&BlockEntry> {
        self.entries.get(index).ok_or(Error::InvalidIndex { index })
    }

    /// Records a new file, reusing the first slot that holds no file or
    /// appending a new one.
    pub fn allocate(
        &mut self,
        file_pos: u64,
        compressed_size: u64,
        uncompressed_size: u64,
        flags: u32,
    ) -> Allocation {
        let entry = BlockEntry::new(file_pos, compressed_size, uncompressed_size, flags | MPQ_FILE_EXISTS);

        match self.entries.iter().position(|e| !e.exists()) {
            Some(index) => {
                let previous = std::mem::replace(&mut self.entries[index], entry);
                Allocation {
                    index: index as u32,
                    previous: Some(previous),
                }
            }
            None => {
                self.entries.push(entry);
                Allocation {
                    index: (self.entries.len() - 1) as u32,
                    previous: None,
                }
            }
        }
    }

    /// Undoes the most recent [`allocate`](BlockTable::allocate).
    pub fn rollback(&mut self, allocation: Allocation) {
        match allocation.previous {
            Some(previous) => self.entries[allocation.index as usize] = previous,
            None => {
                self.entries.pop();
            }
        }
    }

    /// Frees the slot. The bytes it pointed at stay in the file, but the
    /// space is handed out again by later allocations.
    pub fn mark_deleted(&mut self, index: usize) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(Error::InvalidIndex { index })?;

        *entry = BlockEntry::default();

        Ok(())
    }

    fn used_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = self
            .entries
            .iter()
            .filter(|e| e.exists() && e.compressed_size > 0)
            .map(|e| (e.file_pos, e.end()))
            .collect();
        ranges.sort();

        ranges
    }

    /// End of the last stored file, never less than `data_start`.
    pub fn data_end(&self, data_start: u64) -> u64 {
        self.used_ranges()
            .iter()
            .map(|(_, end)| *end)
            .fold(data_start, u64::max)
    }

    /// Gaps between stored files, starting at `data_start`. The open-ended
    /// space after [`data_end`](BlockTable::data_end) is not included.
    pub fn free_space(&self, data_start: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut cursor = data_start;

        for (start, end) in self.used_ranges() {
            if start > cursor {
                gaps.push((cursor, start - cursor));
            }
            cursor = cursor.max(end);
        }

        gaps
    }

    /// First position with room for `size` bytes.
    pub fn first_fit(&self, size: u64, data_start: u64) -> u64 {
        self.free_space(data_start)
            .into_iter()
            .find(|(_, len)| *len >= size)
            .map(|(start, _)| start)
            .unwrap_or_else(|| self.data_end(data_start))
    }
}
