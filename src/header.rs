use std::io::Error as IoError;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::consts::*;
use super::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub header_size: u32,
    pub archive_size: u32,
    pub format_version: u16,
    pub sector_size_shift: u16,
    pub hash_table_offset: u32,
    pub block_table_offset: u32,
    pub hash_table_entries: u32,
    pub block_table_entries: u32,
}

impl FileHeader {
    /// A header for an archive that holds nothing but empty tables placed
    /// right after the header.
    pub fn new_v1(sector_size_shift: u16, hash_table_entries: u32) -> FileHeader {
        let tables_offset = HEADER_MPQ_SIZE as u32;

        FileHeader {
            header_size: HEADER_MPQ_SIZE as u32,
            archive_size: tables_offset + hash_table_entries * HASH_TABLE_ENTRY_SIZE as u32,
            format_version: 0,
            sector_size_shift,
            hash_table_offset: tables_offset,
            block_table_offset: tables_offset + hash_table_entries * HASH_TABLE_ENTRY_SIZE as u32,
            hash_table_entries,
            block_table_entries: 0,
        }
    }

    /// Reads the header fields following the magic.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<FileHeader, Error> {
        let header_size = reader.read_u32::<LE>()?;
        let archive_size = reader.read_u32::<LE>()?;
        let format_version = reader.read_u16::<LE>()?;
        let sector_size_shift = reader.read_u16::<LE>()?;
        let hash_table_offset = reader.read_u32::<LE>()?;
        let block_table_offset = reader.read_u32::<LE>()?;
        let hash_table_entries = reader.read_u32::<LE>()?;
        let block_table_entries = reader.read_u32::<LE>()?;

        if format_version != 0 {
            return Err(Error::UnsupportedVersion {
                version: format_version,
            });
        }

        Ok(FileHeader {
            header_size,
            archive_size,
            format_version,
            sector_size_shift,
            hash_table_offset,
            block_table_offset,
            hash_table_entries,
            block_table_entries,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        writer.write_u32::<LE>(HEADER_MPQ_MAGIC)?;
        writer.write_u32::<LE>(self.header_size)?;
        writer.write_u32::<LE>(self.archive_size)?;
        writer.write_u16::<LE>(self.format_version)?;
        writer.write_u16::<LE>(self.sector_size_shift)?;
        writer.write_u32::<LE>(self.hash_table_offset)?;
        writer.write_u32::<LE>(self.block_table_offset)?;
        writer.write_u32::<LE>(self.hash_table_entries)?;
        writer.write_u32::<LE>(self.block_table_entries)?;

        Ok(())
    }

    pub fn sector_size(&self) -> u64 {
        512u64 << self.sector_size_shift
    }

    /// Checks that the header describes tables that fit inside `available`
    /// bytes, counted from the header's own position.
    pub fn validate(&self, available: u64) -> Result<(), Error> {
        if u64::from(self.header_size) < HEADER_MPQ_SIZE {
            return Err(Error::corrupt(format!(
                "header size {} is too small",
                self.header_size
            )));
        }

        if self.sector_size_shift > MAX_SECTOR_SIZE_SHIFT {
            return Err(Error::corrupt(format!(
                "sector size shift {} is out of range",
                self.sector_size_shift
            )));
        }

        let hash_entries = self.hash_table_entries as usize;
        if hash_entries == 0 || !hash_entries.is_power_of_two() {
            return Err(Error::corrupt(format!(
                "hash table size {} is not a power of two",
                self.hash_table_entries
            )));
        }

        let hash_table_end = u64::from(self.hash_table_offset)
            + u64::from(self.hash_table_entries) * HASH_TABLE_ENTRY_SIZE;
        let block_table_end = u64::from(self.block_table_offset)
            + u64::from(self.block_table_entries) * BLOCK_TABLE_ENTRY_SIZE;

        if hash_table_end > available {
            return Err(Error::corrupt("hash table extends past the end of file"));
        }

        if block_table_end > available {
            return Err(Error::corrupt("block table extends past the end of file"));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct UserHeader {
    pub user_data_size: u32,
    pub file_header_offset: u32,
}

impl UserHeader {
    pub fn from_reader<R: Read>(mut reader: R) -> Result<UserHeader, Error> {
        let user_data_size = reader.read_u32::<LE>()?;
        let file_header_offset = reader.read_u32::<LE>()?;

        Ok(UserHeader {
            user_data_size,
            file_header_offset,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        writer.write_u32::<LE>(HEADER_USER_MAGIC)?;
        writer.write_u32::<LE>(self.user_data_size)?;
        writer.write_u32::<LE>(self.file_header_offset)?;
        writer.write_u32::<LE>(HEADER_USER_SIZE as u32)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;

    #[test]
    fn header_roundtrip() {
        let header = FileHeader::new_v1(3, 8);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        assert_eq!(buf.len() as u64, HEADER_MPQ_SIZE);

        let mut slice = &buf[..];
        assert_eq!(slice.read_u32::<LE>().unwrap(), HEADER_MPQ_MAGIC);
        let read = FileHeader::from_reader(&mut slice).unwrap();

        assert_eq!(read, header);
        assert_eq!(read.sector_size(), 4096);
        assert_eq!(read.archive_size, 32 + 8 * 16);
    }

    #[test]
    fn rejects_newer_versions() {
        let mut header = FileHeader::new_v1(3, 8);
        header.format_version = 1;
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        match FileHeader::from_reader(&buf[4..]) {
            Err(Error::UnsupportedVersion { version: 1 }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validation_catches_bad_tables() {
        let header = FileHeader::new_v1(3, 8);
        assert!(header.validate(u64::from(header.archive_size)).is_ok());
        assert!(header.validate(64).is_err());

        let mut odd = header.clone();
        odd.hash_table_entries = 6;
        assert!(odd.validate(1 << 20).is_err());

        let mut shifted = header;
        shifted.sector_size_shift = 40;
        assert!(shifted.validate(1 << 20).is_err());
    }

    #[test]
    fn user_header_roundtrip() {
        let user = UserHeader {
            user_data_size: 0x200,
            file_header_offset: 0x200,
        };
        let mut buf = Vec::new();
        user.write(&mut buf).unwrap();

        assert_eq!(buf.len() as u64, HEADER_USER_SIZE);
        let read = UserHeader::from_reader(&buf[4..]).unwrap();
        assert_eq!(read.file_header_offset, 0x200);
        assert_eq!(read.user_data_size, 0x200);
    }
}
