//! A storage engine for Blizzard's proprietary MoPaQ archive format.
//!
//! `mpq-store` reads and writes Version 1 MoPaQ archives, the version used
//! by Warcraft III maps and most other archives still encountered in the
//! wild. Unlike a one-shot writer, archives are edited in place: files can
//! be added, replaced and deleted on an open archive, and the space they
//! leave behind is reused or reclaimed with [`Archive::compact`].
//!
//! # Supported features
//!
//! * zlib and bzip2 compression, per sector, picking the smallest result
//!   with [`Compression::Smallest`]. Sectors that do not shrink are stored raw.
//! * File encryption, optionally with a position-adjusted key.
//! * Single-unit files and per-sector Adler-32 checksums.
//! * Locale-specific files, falling back to the neutral locale and then to
//!   any locale on reads.
//! * Archives prefixed with user data, such as Warcraft III maps.
//! * A `(listfile)` that is kept up to date so file names can be listed.
//!
//! Not supported for reading:
//!
//! * IMA ADPCM, Huffman, PKWare DCL, sparse and LZMA compression.
//! * Patch files and archive chains.
//! * Digital signatures, which are neither checked nor written.
//!
//! # Thread safety
//!
//! [`Archive`] is `Send + Sync`. Reads run concurrently, while mutations
//! take exclusive access to the archive tables. Concurrent writers in
//! different processes are not coordinated and must be serialized by the
//! caller.
//!
//! # Example
//!
//! ```
//! # use mpq_store::{Archive, CreateOptions, FileOptions, OpenMode};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let dir = tempfile::tempdir()?;
//! let path = dir.path().join("example.mpq");
//!
//! // creating an archive
//! let archive = Archive::create(&path, CreateOptions::default())?;
//! archive.add_file("hello.txt", b"hello world!", FileOptions::default())?;
//! archive.close()?;
//!
//! // reading it back
//! let archive = Archive::open(&path, OpenMode::ReadOnly)?;
//! assert_eq!(archive.read_file("hello.txt")?, b"hello world!");
//! assert_eq!(archive.list_files()?, vec!["hello.txt".to_string()]);
//! # Ok(())
//! # }
//! ```

pub(crate) mod block_table;
pub(crate) mod consts;
pub(crate) mod hash_table;
pub(crate) mod header;
pub(crate) mod listfile;
pub(crate) mod sector;
pub(crate) mod seeker;

pub mod archive;
pub mod compression;
pub mod crypto;
pub mod error;
pub mod host;

pub use archive::{Archive, CreateOptions, FileOptions, Files, OpenMode};
pub use compression::Compression;
pub use consts::{
    LOCALE_NEUTRAL, MPQ_ADD_COMPRESS, MPQ_ADD_ENCRYPTED, MPQ_ADD_FIX_KEY,
    MPQ_ADD_REPLACE_EXISTING, MPQ_ADD_SECTOR_CRC, MPQ_ADD_SINGLE_UNIT, MPQ_CREATE_LISTFILE,
    MPQ_CREATE_OVERWRITE, MPQ_OPEN_READ_ONLY,
};
pub use crypto::{hash_string, HashType};
pub use error::{Error, Result};
pub use host::HandleRef;
