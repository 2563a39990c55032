pub(crate) const HEADER_BOUNDARY: u64 = 512;
pub(crate) const HEADER_MPQ_MAGIC: u32 = 0x1A51_504D;
pub(crate) const HEADER_USER_MAGIC: u32 = 0x1B51_504D;
pub(crate) const HEADER_MPQ_SIZE: u64 = 32;
pub(crate) const HEADER_USER_SIZE: u64 = 16;
pub(crate) const MAX_SECTOR_SIZE_SHIFT: u16 = 16;

pub(crate) const HASH_TABLE_ENTRY_SIZE: u64 = 16;
pub(crate) const BLOCK_TABLE_ENTRY_SIZE: u64 = 16;
pub(crate) const MIN_HASH_TABLE_SIZE: usize = 4;
pub(crate) const MAX_HASH_TABLE_SIZE: usize = 0x0008_0000;

// precomputed FILE_KEY hashes of "(hash table)" and "(block table)"
pub(crate) const HASH_TABLE_KEY: u32 = 0xC3AF_3770;
pub(crate) const BLOCK_TABLE_KEY: u32 = 0xEC83_B3A3;

pub(crate) const HASH_ENTRY_FREE: u32 = 0xFFFF_FFFF;
pub(crate) const HASH_ENTRY_DELETED: u32 = 0xFFFF_FFFE;

pub(crate) const MPQ_HASH_TABLE_INDEX: u32 = 0x000;
pub(crate) const MPQ_HASH_NAME_A: u32 = 0x100;
pub(crate) const MPQ_HASH_NAME_B: u32 = 0x200;
pub(crate) const MPQ_HASH_FILE_KEY: u32 = 0x300;
pub(crate) const MPQ_HASH_KEY2_MIX: u32 = 0x400;

pub(crate) const MPQ_FILE_IMPLODE: u32 = 0x0000_0100;
pub(crate) const MPQ_FILE_COMPRESS: u32 = 0x0000_0200;
pub(crate) const MPQ_FILE_ENCRYPTED: u32 = 0x0001_0000;
pub(crate) const MPQ_FILE_ADJUST_KEY: u32 = 0x0002_0000;
pub(crate) const MPQ_FILE_PATCH_FILE: u32 = 0x0010_0000;
pub(crate) const MPQ_FILE_SINGLE_UNIT: u32 = 0x0100_0000;
pub(crate) const MPQ_FILE_DELETE_MARKER: u32 = 0x0200_0000;
pub(crate) const MPQ_FILE_SECTOR_CRC: u32 = 0x0400_0000;
pub(crate) const MPQ_FILE_EXISTS: u32 = 0x8000_0000;

pub(crate) const COMPRESSION_HUFFMAN: u8 = 0x01;
pub(crate) const COMPRESSION_ZLIB: u8 = 0x02;
pub(crate) const COMPRESSION_PKWARE: u8 = 0x08;
pub(crate) const COMPRESSION_BZIP2: u8 = 0x10;
pub(crate) const COMPRESSION_SPARSE: u8 = 0x20;
pub(crate) const COMPRESSION_IMA_ADCPM_MONO: u8 = 0x40;
pub(crate) const COMPRESSION_IMA_ADCPM_STEREO: u8 = 0x80;
pub(crate) const COMPRESSION_LZMA: u8 = 0x12;

pub(crate) const LISTFILE_NAME: &str = "(listfile)";
pub(crate) const INTERNAL_FILES: [&str; 3] = ["(listfile)", "(attributes)", "(signature)"];

/// Neutral locale, matched when no locale-specific entry exists.
pub const LOCALE_NEUTRAL: u16 = 0;

/// Host create flag: maintain a `(listfile)` in the new archive.
pub const MPQ_CREATE_LISTFILE: u32 = 0x0010_0000;
/// Host create flag: replace an existing file at the target path.
pub const MPQ_CREATE_OVERWRITE: u32 = 0x8000_0000;
/// Host open flag: open the archive without write access.
pub const MPQ_OPEN_READ_ONLY: u32 = 0x0000_0100;

/// Host add-file flag: compress the file with zlib.
pub const MPQ_ADD_COMPRESS: u32 = MPQ_FILE_COMPRESS;
/// Host add-file flag: encrypt the file.
pub const MPQ_ADD_ENCRYPTED: u32 = MPQ_FILE_ENCRYPTED;
/// Host add-file flag: adjust the encryption key by file position and size.
pub const MPQ_ADD_FIX_KEY: u32 = MPQ_FILE_ADJUST_KEY;
/// Host add-file flag: store the file as a single compression unit.
pub const MPQ_ADD_SINGLE_UNIT: u32 = MPQ_FILE_SINGLE_UNIT;
/// Host add-file flag: store a checksum for every sector.
pub const MPQ_ADD_SECTOR_CRC: u32 = MPQ_FILE_SECTOR_CRC;
/// Host add-file flag: overwrite a file of the same name.
pub const MPQ_ADD_REPLACE_EXISTING: u32 = 0x8000_0000;
