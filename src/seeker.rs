use std::fs::File;
use std::io::Error as IoError;
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, LE};
use log::debug;

use super::consts::*;
use super::error::Error;
use super::header::*;

/// Positions all archive I/O relative to the MPQ header and keeps reads
/// inside the underlying file.
#[derive(Debug)]
pub(crate) struct Seeker<S> {
    inner: S,
    header_offset: u64,
    file_size: u64,
}

impl<S> Seeker<S> {
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Bytes available from the header position to the end of the file.
    pub fn available(&self) -> u64 {
        self.file_size.saturating_sub(self.header_offset)
    }

    fn archive_offset(&self, offset: u64) -> u64 {
        offset + self.header_offset
    }
}

impl<S: Read + Seek> Seeker<S> {
    /// Locates the MPQ header and validates it against the file size.
    pub fn open(mut inner: S) -> Result<(Seeker<S>, FileHeader), Error> {
        let file_size = inner.seek(SeekFrom::End(0))?;
        let (header_offset, header) = find_header(&mut inner, file_size)?;

        header.validate(file_size - header_offset)?;
        debug!(
            "found MPQ header at {:#x}, {} hash entries, {} block entries",
            header_offset, header.hash_table_entries, header.block_table_entries
        );

        let seeker = Seeker {
            inner,
            header_offset,
            file_size,
        };

        Ok((seeker, header))
    }

    pub fn read(&mut self, offset: u64, size: u64) -> Result<Vec<u8>, Error> {
        let offset = self.archive_offset(offset);

        if offset + size > self.file_size {
            return Err(Error::corrupt(format!(
                "read of {} bytes at {:#x} is past the end of file",
                size, offset
            )));
        }

        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        self.inner.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Reads raw bytes that precede the header, such as a user data block.
    pub fn read_prefix(&mut self) -> Result<Vec<u8>, Error> {
        self.inner.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; self.header_offset as usize];
        self.inner.read_exact(&mut buf)?;

        Ok(buf)
    }
}

impl<S: Write + Seek> Seeker<S> {
    /// Wraps a fresh, writable stream whose header will live at `header_offset`.
    pub fn create(inner: S, header_offset: u64) -> Seeker<S> {
        Seeker {
            inner,
            header_offset,
            file_size: header_offset,
        }
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), IoError> {
        let offset = self.archive_offset(offset);

        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        self.file_size = self.file_size.max(offset + data.len() as u64);

        Ok(())
    }

    pub fn write_prefix(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(data)?;
        self.file_size = self.file_size.max(data.len() as u64);

        Ok(())
    }

    pub fn write_header(&mut self, header: &FileHeader) -> Result<(), IoError> {
        let mut buf = Vec::with_capacity(HEADER_MPQ_SIZE as usize);
        header.write(&mut buf)?;

        self.write(0, &buf)
    }
}

impl Seeker<File> {
    /// Cuts the file right after the archive and forces it to disk.
    pub fn finish(&mut self, archive_size: u64) -> Result<(), IoError> {
        let end = self.archive_offset(archive_size);

        self.inner.set_len(end)?;
        self.inner.sync_all()?;
        self.file_size = end;

        Ok(())
    }
}

fn find_header<R: Read + Seek>(mut reader: R, file_size: u64) -> Result<(u64, FileHeader), Error> {
    let mut position = 0;

    while position + HEADER_MPQ_SIZE <= file_size {
        reader.seek(SeekFrom::Start(position))?;

        let magic = reader.read_u32::<LE>()?;

        if magic == HEADER_USER_MAGIC {
            let user_header = UserHeader::from_reader(&mut reader)?;
            let file_header_offset = u64::from(user_header.file_header_offset) + position;

            if file_header_offset + HEADER_MPQ_SIZE > file_size {
                return Err(Error::corrupt("user data header points past the end of file"));
            }

            reader.seek(SeekFrom::Start(file_header_offset))?;

            if reader.read_u32::<LE>()? != HEADER_MPQ_MAGIC {
                return Err(Error::corrupt("user data header does not point at an MPQ header"));
            }

            let header = FileHeader::from_reader(&mut reader)?;
            return Ok((file_header_offset, header));
        } else if magic == HEADER_MPQ_MAGIC {
            let header = FileHeader::from_reader(&mut reader)?;
            return Ok((position, header));
        }

        position += HEADER_BOUNDARY;
    }

    Err(Error::InvalidFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn empty_archive(prefix: usize) -> Vec<u8> {
        let mut seeker = Seeker::create(Cursor::new(vec![0u8; prefix]), prefix as u64);
        let header = FileHeader::new_v1(3, 4);
        seeker.write_header(&header).unwrap();
        seeker.write(32, &[0u8; 64]).unwrap();

        seeker.inner.into_inner()
    }

    #[test]
    fn finds_header_at_start() {
        let data = empty_archive(0);
        let (mut seeker, header) = Seeker::open(Cursor::new(data)).unwrap();

        assert_eq!(seeker.header_offset(), 0);
        assert_eq!(header.hash_table_entries, 4);
        assert_eq!(seeker.read(32, 64).unwrap().len(), 64);
        assert!(matches!(seeker.read(90, 64), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn finds_header_on_boundary() {
        let data = empty_archive(1024);
        let (seeker, _) = Seeker::open(Cursor::new(data)).unwrap();

        assert_eq!(seeker.header_offset(), 1024);
        assert_eq!(seeker.available(), 96);
    }

    #[test]
    fn follows_user_header() {
        let mut data = empty_archive(512);
        let user = UserHeader {
            user_data_size: 0x100,
            file_header_offset: 512,
        };
        let mut buf = Vec::new();
        user.write(&mut buf).unwrap();
        data[..buf.len()].copy_from_slice(&buf);

        let (mut seeker, _) = Seeker::open(Cursor::new(data)).unwrap();
        assert_eq!(seeker.header_offset(), 512);
        assert_eq!(seeker.read_prefix().unwrap().len(), 512);
    }

    #[test]
    fn missing_magic_is_invalid_format() {
        let mut data = empty_archive(0);
        data[0] = b'X';

        assert!(matches!(
            Seeker::open(Cursor::new(data)),
            Err(Error::InvalidFormat)
        ));
        assert!(matches!(
            Seeker::open(Cursor::new(vec![1u8; 8])),
            Err(Error::InvalidFormat)
        ));
    }
}
