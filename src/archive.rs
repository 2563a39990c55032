use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::block_table::*;
use super::compression::Compression;
use super::consts::*;
use super::crypto::*;
use super::error::{Error, Result};
use super::hash_table::*;
use super::header::*;
use super::listfile::{self, NameIndex};
use super::sector::{self, Layout};
use super::seeker::Seeker;

/// Options used when creating a new archive.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// How many files the archive can hold. The hash table is sized to the
    /// next power of two above this, leaving room for the `(listfile)`.
    pub max_file_count: usize,
    /// Sectors are `512 << sector_size_shift` bytes long.
    pub sector_size_shift: u16,
    /// Replace a file that already exists at the target path.
    pub overwrite: bool,
    /// Keep a `(listfile)` with the names of all added files.
    pub listfile: bool,
}

impl Default for CreateOptions {
    fn default() -> CreateOptions {
        CreateOptions {
            max_file_count: 1024,
            sector_size_shift: 3,
            overwrite: false,
            listfile: true,
        }
    }
}

impl CreateOptions {
    /// Translates host create flags (`MPQ_CREATE_*`).
    pub fn from_flags(flags: u32, max_file_count: usize) -> CreateOptions {
        CreateOptions {
            max_file_count,
            overwrite: flags & MPQ_CREATE_OVERWRITE != 0,
            listfile: flags & MPQ_CREATE_LISTFILE != 0,
            ..CreateOptions::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_file_count == 0 || self.max_file_count >= MAX_HASH_TABLE_SIZE {
            return Err(Error::InvalidOptions {
                reason: format!("max file count {} is out of range", self.max_file_count),
            });
        }

        if self.sector_size_shift > MAX_SECTOR_SIZE_SHIFT {
            return Err(Error::InvalidOptions {
                reason: format!("sector size shift {} is out of range", self.sector_size_shift),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    /// Translates host open flags (`MPQ_OPEN_*`).
    pub fn from_flags(flags: u32) -> OpenMode {
        if flags & MPQ_OPEN_READ_ONLY != 0 {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        }
    }
}

/// Represents various options that can be used when adding a file to an archive.
#[derive(Debug, Clone, Copy)]
pub struct FileOptions {
    /// Compression applied to each sector. A sector that does not shrink is
    /// stored raw.
    pub compression: Compression,
    /// Whether to encrypt the file using MPQ's encryption scheme.
    /// The encryption key is derived from the file name, so in practice
    /// this only hides the contents from casual inspection.
    pub encrypt: bool,
    /// If the file is encrypted, also mix its position and size into the key.
    pub adjust_key: bool,
    /// Store the file as one unit instead of splitting it into sectors.
    pub single_unit: bool,
    /// Record an Adler-32 checksum per sector. Only compressed, sectored
    /// files carry checksums; the option is ignored otherwise.
    pub checksums: bool,
    /// Overwrite a file with the same name and locale.
    pub replace_existing: bool,
    pub locale: u16,
}

impl Default for FileOptions {
    fn default() -> FileOptions {
        FileOptions {
            compression: Compression::Zlib,
            encrypt: false,
            adjust_key: false,
            single_unit: false,
            checksums: false,
            replace_existing: false,
            locale: LOCALE_NEUTRAL,
        }
    }
}

impl FileOptions {
    /// Translates host add-file flags (`MPQ_ADD_*`).
    pub fn from_flags(flags: u32) -> FileOptions {
        FileOptions {
            compression: if flags & MPQ_ADD_COMPRESS != 0 {
                Compression::Zlib
            } else {
                Compression::None
            },
            encrypt: flags & MPQ_ADD_ENCRYPTED != 0,
            adjust_key: flags & MPQ_ADD_FIX_KEY != 0,
            single_unit: flags & MPQ_ADD_SINGLE_UNIT != 0,
            checksums: flags & MPQ_ADD_SECTOR_CRC != 0,
            replace_existing: flags & MPQ_ADD_REPLACE_EXISTING != 0,
            locale: LOCALE_NEUTRAL,
        }
    }

    fn listfile() -> FileOptions {
        FileOptions {
            encrypt: true,
            adjust_key: true,
            replace_existing: true,
            ..FileOptions::default()
        }
    }

    fn layout(&self) -> Layout {
        Layout {
            compression: self.compression,
            single_unit: self.single_unit,
            checksums: self.checksums,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Poisoned,
    Closed,
}

#[derive(Debug)]
struct ArchiveState {
    storage: Mutex<Option<Seeker<File>>>,
    mode: OpenMode,
    header: FileHeader,
    hash_table: HashTable,
    block_table: BlockTable,
    names: NameIndex,
    listfile: bool,
    max_file_count: usize,
    dirty: bool,
    lifecycle: Lifecycle,
}

/// An MPQ archive backed by a file on disk.
///
/// All methods take `&self`, so an archive can be shared between threads
/// behind an `Arc`. Reads run concurrently with each other; mutations
/// (adding, deleting, flushing, compacting) take exclusive access to the
/// archive tables for their whole duration.
///
/// Changes are only guaranteed to be on disk after [`flush`](Archive::flush)
/// or [`close`](Archive::close). Dropping an archive with unsaved changes
/// attempts a flush and logs a warning if it fails.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    state: RwLock<ArchiveState>,
}

impl Archive {
    /// Creates a new, empty archive at `path` and writes its header and
    /// tables immediately.
    ///
    /// Fails with [`Error::AlreadyExists`] if the file exists and
    /// `options.overwrite` is not set.
    pub fn create<P: AsRef<Path>>(path: P, options: CreateOptions) -> Result<Archive> {
        let path = path.as_ref();
        options.validate()?;

        let mut open_options = OpenOptions::new();
        open_options.read(true).write(true);
        if options.overwrite {
            open_options.create(true).truncate(true);
        } else {
            open_options.create_new(true);
        }

        let file = open_options.open(path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::AlreadyExists {
                name: path.display().to_string(),
            },
            _ => Error::from(e),
        })?;

        let hash_table = HashTable::new(HashTable::size_for(options.max_file_count + 1))?;
        let header = FileHeader::new_v1(options.sector_size_shift, hash_table.len() as u32);

        let mut state = ArchiveState {
            storage: Mutex::new(Some(Seeker::create(file, 0))),
            mode: OpenMode::ReadWrite,
            header,
            hash_table,
            block_table: BlockTable::new(),
            names: NameIndex::new(),
            listfile: options.listfile,
            max_file_count: options.max_file_count,
            dirty: true,
            lifecycle: Lifecycle::Open,
        };
        state.flush()?;

        info!(
            "created archive {} ({} hash slots, {} byte sectors)",
            path.display(),
            state.hash_table.len(),
            state.header.sector_size()
        );

        Ok(Archive {
            path: path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    /// Opens an existing archive.
    ///
    /// Immediately, this will perform the following:
    ///
    /// 1. Locate an MPQ header, following a user data header if present.
    /// 2. Locate, decrypt and read the hash table and block table.
    /// 3. Check that every table entry points inside the file.
    /// 4. Load the names recorded in the `(listfile)`, if there is one.
    ///
    /// If any of the first three steps fail, the archive is deemed corrupted
    /// and an appropriate error is returned. An unreadable listfile is only
    /// logged, since it merely affects which names can be listed.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Archive> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)?;

        let (mut seeker, header) = Seeker::open(file)?;
        let (hash_table, block_table) = read_tables(&mut seeker, &header)?;

        let mut state = ArchiveState {
            storage: Mutex::new(None),
            mode,
            header,
            max_file_count: hash_table.len().saturating_sub(1),
            hash_table,
            block_table,
            names: NameIndex::new(),
            listfile: false,
            dirty: false,
            lifecycle: Lifecycle::Open,
        };
        state.listfile = state.load_names(&mut seeker);
        *state.storage.get_mut() = Some(seeker);

        info!(
            "opened archive {} ({} files, {} hash slots)",
            path.display(),
            state.file_count(),
            state.hash_table.len()
        );

        Ok(Archive {
            path: path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.state.read_recursive().mode
    }

    pub fn sector_size(&self) -> u64 {
        self.state.read_recursive().header.sector_size()
    }

    /// How many files can be stored, not counting internal files.
    pub fn max_file_count(&self) -> usize {
        self.state.read_recursive().max_file_count
    }

    /// Number of stored files, not counting internal files.
    pub fn file_count(&self) -> usize {
        self.state.read_recursive().file_count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read_recursive().find(name, LOCALE_NEUTRAL).is_some()
    }

    /// Adds a file to the archive.
    ///
    /// If anything fails, the archive tables are left exactly as they were
    /// before the call.
    pub fn add_file(&self, name: &str, data: &[u8], options: FileOptions) -> Result<()> {
        let mut state = self.state.write();
        state.check_writable()?;

        if name.is_empty() {
            return Err(Error::InvalidOptions {
                reason: "file name is empty".to_string(),
            });
        }

        state.store(name, data, &options, false)
    }

    pub fn add_file_from_path<P: AsRef<Path>>(
        &self,
        source: P,
        name: &str,
        options: FileOptions,
    ) -> Result<()> {
        let data = fs::read(source)?;

        self.add_file(name, &data, options)
    }

    /// Read a file's contents.
    ///
    /// Notably, the filename resolution algorithm is case-insensitive, and
    /// will treat backslashes (`\`) and forward slashes (`/`) as the same
    /// character.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.read_file_with_locale(name, LOCALE_NEUTRAL)
    }

    /// Like [`read_file`](Archive::read_file), preferring the entry for
    /// `locale`, then the neutral one, then any locale holding the name.
    pub fn read_file_with_locale(&self, name: &str, locale: u16) -> Result<Vec<u8>> {
        let state = self.state.read_recursive();
        state.check_usable()?;

        let mut storage = state.storage.lock();
        let seeker = storage.as_mut().ok_or(Error::Closed)?;

        state.read_file(seeker, name, locale)
    }

    pub fn extract_to_path<P: AsRef<Path>>(&self, name: &str, dest: P) -> Result<()> {
        let data = self.read_file(name)?;
        fs::write(dest, data)?;

        Ok(())
    }

    /// Lazily lists the stored files in hash table order. Internal files
    /// are skipped, and files whose name is unknown are listed as
    /// `FileXXXXXXXX.xxx`, where `XXXXXXXX` is the block index.
    ///
    /// The iterator holds a shared lock on the archive tables, so mutating
    /// the archive from the same thread before dropping it will deadlock.
    /// Reading files while it is alive is fine, even with a writer waiting.
    pub fn files(&self) -> Result<Files<'_>> {
        let state = self.state.read_recursive();
        state.check_usable()?;

        Ok(Files { state, next: 0 })
    }

    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files()?.collect())
    }

    pub fn delete_file(&self, name: &str) -> Result<()> {
        self.delete_file_with_locale(name, LOCALE_NEUTRAL)
    }

    /// Removes a file. Its data stays in the archive until the space is
    /// reused or the archive is compacted.
    pub fn delete_file_with_locale(&self, name: &str, locale: u16) -> Result<()> {
        let mut state = self.state.write();
        state.check_writable()?;

        state.delete(name, locale)
    }

    /// Writes the header and tables if anything changed since the last flush.
    ///
    /// A failure poisons the archive: every later operation fails with
    /// [`Error::Poisoned`].
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        state.check_usable()?;

        state.flush()
    }

    /// Flushes pending changes and releases the file.
    ///
    /// The file is released even if the flush fails, in which case
    /// [`Error::FlushFailed`] is returned and the archive stays poisoned.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();

        match state.lifecycle {
            Lifecycle::Closed => return Err(Error::Closed),
            Lifecycle::Poisoned => {
                state.storage.get_mut().take();
                return Err(Error::Poisoned);
            }
            Lifecycle::Open => (),
        }

        let result = state.flush();
        state.storage.get_mut().take();

        if result.is_ok() {
            state.lifecycle = Lifecycle::Closed;
            info!("closed archive {}", self.path.display());
        }

        result
    }

    /// Rewrites the archive without the space left behind by deleted and
    /// replaced files.
    ///
    /// The new archive is written to a temporary file next to the original
    /// and then moved over it. Encrypted files whose key depends on their
    /// position are re-encrypted, which requires their name to be known.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.write();
        state.check_writable()?;
        state.flush()?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let temp = tempfile::NamedTempFile::new_in(dir)?;
        let (hash_table, block_table) = state.rewrite_into(temp.reopen()?)?;

        // from here on the in-memory state no longer matches any file
        state.storage.get_mut().take();
        let reloaded = temp
            .persist(&self.path)
            .map_err(|e| Error::from(e.error))
            .and_then(|_| {
                let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
                Seeker::open(file)
            });

        match reloaded {
            Ok((seeker, header)) => {
                info!(
                    "compacted archive {}: {} -> {} bytes",
                    self.path.display(),
                    state.header.archive_size,
                    header.archive_size
                );

                state.header = header;
                state.hash_table = hash_table;
                state.block_table = block_table;
                *state.storage.get_mut() = Some(seeker);

                Ok(())
            }
            Err(e) => {
                state.lifecycle = Lifecycle::Poisoned;
                Err(e)
            }
        }
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        if state.lifecycle == Lifecycle::Open && state.dirty {
            if let Err(e) = state.flush() {
                warn!(
                    "failed to flush archive {} on drop: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Iterator returned by [`Archive::files`].
pub struct Files<'a> {
    state: RwLockReadGuard<'a, ArchiveState>,
    next: usize,
}

impl<'a> Iterator for Files<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.next < self.state.hash_table.len() {
            let index = self.next;
            self.next += 1;

            if let Some(Slot::Occupied(entry)) = self.state.hash_table.slot(index) {
                if let Some(name) = self.state.listed_name(entry) {
                    return Some(name);
                }
            }
        }

        None
    }
}

fn read_tables(seeker: &mut Seeker<File>, header: &FileHeader) -> Result<(HashTable, BlockTable)> {
    let hash_entries = header.hash_table_entries as usize;
    let mut hash_data = seeker.read(
        u64::from(header.hash_table_offset),
        hash_entries as u64 * HASH_TABLE_ENTRY_SIZE,
    )?;
    decrypt_block(&mut hash_data, HASH_TABLE_KEY);
    let hash_table = HashTable::from_bytes(&hash_data, hash_entries)?;

    let block_entries = header.block_table_entries as usize;
    let mut block_data = seeker.read(
        u64::from(header.block_table_offset),
        block_entries as u64 * BLOCK_TABLE_ENTRY_SIZE,
    )?;
    decrypt_block(&mut block_data, BLOCK_TABLE_KEY);
    let block_table = BlockTable::from_bytes(&block_data, block_entries)?;

    for (slot, entry) in hash_table.occupied() {
        if entry.block_index as usize >= block_entries {
            return Err(Error::corrupt(format!(
                "hash slot {} points at block {} of {}",
                slot, entry.block_index, block_entries
            )));
        }
    }

    let available = seeker.available();
    for (index, block) in block_table.entries().iter().enumerate() {
        if block.exists() && block.end() > available {
            return Err(Error::corrupt(format!(
                "block {} extends past the end of file",
                index
            )));
        }
    }

    Ok((hash_table, block_table))
}

fn encrypted_table(mut data: Vec<u8>, key: u32) -> Vec<u8> {
    encrypt_block(&mut data, key);
    data
}

impl ArchiveState {
    fn check_usable(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Poisoned => Err(Error::Poisoned),
            Lifecycle::Closed => Err(Error::Closed),
        }
    }

    fn check_writable(&self) -> Result<()> {
        self.check_usable()?;

        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(Error::ReadOnly),
        }
    }

    fn sector_size(&self) -> u64 {
        self.header.sector_size()
    }

    /// Finds the live entry for `locale`, falling back to the neutral
    /// locale and then to whichever locale holds the name.
    fn find(&self, name: &str, locale: u16) -> Option<(usize, HashEntry)> {
        let key = FileKey::new(name);
        let live = |entry: &HashEntry| self.live_block(entry.block_index).is_some();

        self.hash_table
            .find(&key, locale)
            .filter(|(_, entry)| live(entry))
            .or_else(|| match locale {
                LOCALE_NEUTRAL => None,
                _ => self
                    .hash_table
                    .find(&key, LOCALE_NEUTRAL)
                    .filter(|(_, entry)| live(entry)),
            })
            .or_else(|| self.hash_table.find_any(&key, live))
    }

    /// Like [`find`](ArchiveState::find), also accepting the names listed
    /// for entries whose real name is unknown. Returns the entry and, when
    /// known, the real name.
    fn resolve<'a>(&'a self, name: &'a str, locale: u16) -> Option<(HashEntry, Option<&'a str>)> {
        if let Some((_, entry)) = self.find(name, locale) {
            return Some((entry, Some(name)));
        }

        let block_index = listfile::placeholder_index(name)?;
        self.live_block(block_index)?;
        let (_, entry) = self
            .hash_table
            .occupied()
            .find(|(_, entry)| entry.block_index == block_index)?;

        Some((*entry, self.names.get(entry.hash_a, entry.hash_b)))
    }

    fn live_block(&self, index: u32) -> Option<&BlockEntry> {
        self.block_table
            .get(index as usize)
            .ok()
            .filter(|block| block.exists() && !block.is_delete_marker())
    }

    fn listed_name(&self, entry: &HashEntry) -> Option<String> {
        self.live_block(entry.block_index)?;

        if listfile::is_internal(entry.hash_a, entry.hash_b) {
            return None;
        }

        let name = match self.names.get(entry.hash_a, entry.hash_b) {
            Some(name) => name.to_string(),
            None => listfile::placeholder(entry.block_index),
        };

        Some(name)
    }

    fn file_count(&self) -> usize {
        self.hash_table
            .occupied()
            .filter(|(_, entry)| self.live_block(entry.block_index).is_some())
            .filter(|(_, entry)| !listfile::is_internal(entry.hash_a, entry.hash_b))
            .count()
    }

    /// Reads the `(listfile)` into the name index. Returns whether the
    /// archive has one.
    fn load_names(&mut self, seeker: &mut Seeker<File>) -> bool {
        for name in INTERNAL_FILES.iter() {
            if self.find(name, LOCALE_NEUTRAL).is_some() {
                self.names.insert(name);
            }
        }

        if self.find(LISTFILE_NAME, LOCALE_NEUTRAL).is_none() {
            return false;
        }

        match self.read_file(seeker, LISTFILE_NAME, LOCALE_NEUTRAL) {
            Ok(data) => {
                let names = listfile::parse(&data);
                let learned = self.names.extend_from_table(names, &self.hash_table);
                debug!("learned {} names from {}", learned, LISTFILE_NAME);
            }
            Err(e) => warn!("failed to read {}: {}", LISTFILE_NAME, e),
        }

        true
    }

    fn read_file(&self, seeker: &mut Seeker<File>, name: &str, locale: u16) -> Result<Vec<u8>> {
        let (entry, real_name) = self
            .resolve(name, locale)
            .ok_or_else(|| Error::not_found(name))?;
        let block = *self.block_table.get(entry.block_index as usize)?;

        if block.is_patch_file() {
            return Err(Error::UnsupportedCompression {
                kind: "incremental patch".to_string(),
            });
        }

        let stored = seeker.read(block.file_pos, block.compressed_size)?;
        let key = if block.is_encrypted() {
            // the key is derived from the name, which a placeholder lacks
            let real_name = real_name.ok_or(Error::UnresolvedName {
                hash_a: entry.hash_a,
                hash_b: entry.hash_b,
            })?;

            Some(calculate_file_key(
                real_name,
                block.file_pos as u32,
                block.uncompressed_size as u32,
                block.is_key_adjusted(),
            ))
        } else {
            None
        };

        debug!(
            "reading {} from block {} ({} -> {} bytes)",
            name, entry.block_index, block.compressed_size, block.uncompressed_size
        );

        sector::decode(&stored, &block, self.sector_size(), key)
    }

    fn store(&mut self, name: &str, data: &[u8], options: &FileOptions, internal: bool) -> Result<()> {
        // a slot whose block is gone is reused rather than duplicated
        let found = self.hash_table.find(&FileKey::new(name), options.locale);
        let replaced = found
            .map(|(_, entry)| entry.block_index)
            .filter(|&index| self.live_block(index).is_some());

        match replaced {
            Some(_) if !options.replace_existing => {
                return Err(Error::AlreadyExists {
                    name: name.to_string(),
                });
            }
            None if !internal && self.file_count() >= self.max_file_count => {
                return Err(Error::TableFull);
            }
            _ => (),
        }

        let encoded = sector::encode(data, self.sector_size(), options.layout())?;
        let stored_size = encoded.stored_size();
        let file_pos = self.block_table.first_fit(stored_size, HEADER_MPQ_SIZE);

        let limit = u64::from(u32::max_value());
        if file_pos + stored_size > limit || data.len() as u64 > limit {
            return Err(Error::InvalidOptions {
                reason: format!("{} does not fit in a 4 GiB archive", name),
            });
        }

        let mut flags = encoded.flags();
        let encryption_key = if options.encrypt {
            flags |= MPQ_FILE_ENCRYPTED;
            if options.adjust_key {
                flags |= MPQ_FILE_ADJUST_KEY;
            }

            Some(calculate_file_key(
                name,
                file_pos as u32,
                data.len() as u32,
                options.adjust_key,
            ))
        } else {
            None
        };
        let stored = encoded.seal(encryption_key);

        let allocation = self
            .block_table
            .allocate(file_pos, stored_size, data.len() as u64, flags);
        let block_index = allocation.index;

        let slot = found.map(|(slot, _)| slot);
        match self.link(name, &stored, file_pos, block_index, slot, replaced, options.locale) {
            Ok(slot) => {
                debug!(
                    "stored {} in block {} at {:#x}, hash slot {} ({} -> {} bytes)",
                    name,
                    block_index,
                    file_pos,
                    slot,
                    data.len(),
                    stored_size
                );
                self.names.insert(name);
                Ok(())
            }
            Err(e) => {
                self.block_table.rollback(allocation);
                Err(e)
            }
        }
    }

    /// Writes stored bytes and points a hash slot at the new block, freeing
    /// the `replaced` block. On failure the hash table is unchanged.
    fn link(
        &mut self,
        name: &str,
        stored: &[u8],
        file_pos: u64,
        block_index: u32,
        slot: Option<usize>,
        replaced: Option<u32>,
        locale: u16,
    ) -> Result<usize> {
        // the write may overwrite the tables of the last flush
        self.dirty = true;
        self.storage
            .get_mut()
            .as_mut()
            .ok_or(Error::Closed)?
            .write(file_pos, stored)?;

        match slot {
            Some(slot) => {
                if let Some(replaced) = replaced {
                    self.block_table.mark_deleted(replaced as usize)?;
                }
                self.hash_table.set_block_index(slot, block_index);
                Ok(slot)
            }
            None => self.hash_table.insert(name, locale, block_index),
        }
    }

    fn delete(&mut self, name: &str, locale: u16) -> Result<()> {
        let (slot, entry) = self
            .hash_table
            .find(&FileKey::new(name), locale)
            .filter(|(_, entry)| self.live_block(entry.block_index).is_some())
            .ok_or_else(|| Error::not_found(name))?;

        self.block_table.mark_deleted(entry.block_index as usize)?;
        self.hash_table.vacate(slot);

        let still_present = self
            .hash_table
            .occupied()
            .any(|(_, other)| (other.hash_a, other.hash_b) == (entry.hash_a, entry.hash_b));
        if !still_present {
            self.names.remove(name);
        }

        self.dirty = true;
        debug!("deleted {} (hash slot {}, block {})", name, slot, entry.block_index);

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        match self.write_tables() {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.lifecycle = Lifecycle::Poisoned;
                Err(Error::FlushFailed { cause: Box::new(e) })
            }
        }
    }

    fn write_tables(&mut self) -> Result<()> {
        if self.listfile {
            let contents = self.names.render(&self.hash_table);
            self.store(LISTFILE_NAME, &contents, &FileOptions::listfile(), true)?;
        }

        let data_end = self.block_table.data_end(HEADER_MPQ_SIZE);
        let hash_data = encrypted_table(self.hash_table.to_bytes(), HASH_TABLE_KEY);
        let block_data = encrypted_table(self.block_table.to_bytes(), BLOCK_TABLE_KEY);

        let hash_table_offset = data_end;
        let block_table_offset = hash_table_offset + hash_data.len() as u64;
        let archive_size = block_table_offset + block_data.len() as u64;

        if archive_size > u64::from(u32::max_value()) {
            return Err(Error::corrupt("archive would exceed 4 GiB"));
        }

        self.header.archive_size = archive_size as u32;
        self.header.hash_table_offset = hash_table_offset as u32;
        self.header.block_table_offset = block_table_offset as u32;
        self.header.hash_table_entries = self.hash_table.len() as u32;
        self.header.block_table_entries = self.block_table.len() as u32;

        let seeker = self.storage.get_mut().as_mut().ok_or(Error::Closed)?;
        seeker.write(hash_table_offset, &hash_data)?;
        seeker.write(block_table_offset, &block_data)?;
        seeker.write_header(&self.header)?;
        seeker.finish(archive_size)?;

        debug!(
            "flushed tables at {:#x} and {:#x}, archive size {}",
            hash_table_offset, block_table_offset, archive_size
        );

        Ok(())
    }

    /// Writes a compacted copy of the archive into `file` and returns the
    /// tables describing it.
    fn rewrite_into(&mut self, file: File) -> Result<(HashTable, BlockTable)> {
        let sector_size = self.sector_size();
        let old = self.storage.get_mut().as_mut().ok_or(Error::Closed)?;
        let mut out = Seeker::create(file, old.header_offset());

        if old.header_offset() > 0 {
            out.write_prefix(&old.read_prefix()?)?;
        }

        let mut hash_table = self.hash_table.clone();
        let mut blocks = Vec::new();
        let mut moved: HashMap<u32, u32> = HashMap::new();
        let mut position = HEADER_MPQ_SIZE;

        for (slot, entry) in self.hash_table.occupied() {
            if let Some(&index) = moved.get(&entry.block_index) {
                hash_table.set_block_index(slot, index);
                continue;
            }

            let block = *self.block_table.get(entry.block_index as usize)?;
            if !block.exists() {
                hash_table.vacate(slot);
                continue;
            }

            let mut stored = old.read(block.file_pos, block.compressed_size)?;

            if block.is_encrypted() && block.is_key_adjusted() && block.file_pos != position {
                let name = self
                    .names
                    .get(entry.hash_a, entry.hash_b)
                    .ok_or(Error::UnresolvedName {
                        hash_a: entry.hash_a,
                        hash_b: entry.hash_b,
                    })?;
                let size = block.uncompressed_size as u32;
                let old_key = calculate_file_key(name, block.file_pos as u32, size, true);
                let new_key = calculate_file_key(name, position as u32, size, true);

                sector::rekey(&mut stored, &block, sector_size, old_key, new_key)?;
            }

            out.write(position, &stored)?;

            let index = blocks.len() as u32;
            blocks.push(BlockEntry::new(
                position,
                block.compressed_size,
                block.uncompressed_size,
                block.flags,
            ));
            moved.insert(entry.block_index, index);
            hash_table.set_block_index(slot, index);

            position += block.compressed_size;
        }

        let block_table = BlockTable::from_entries(blocks);
        let hash_data = encrypted_table(hash_table.to_bytes(), HASH_TABLE_KEY);
        let block_data = encrypted_table(block_table.to_bytes(), BLOCK_TABLE_KEY);

        let mut header = self.header.clone();
        header.hash_table_offset = position as u32;
        header.block_table_offset = (position + hash_data.len() as u64) as u32;
        header.archive_size = header.block_table_offset + block_data.len() as u32;
        header.hash_table_entries = hash_table.len() as u32;
        header.block_table_entries = block_table.len() as u32;

        out.write(u64::from(header.hash_table_offset), &hash_data)?;
        out.write(u64::from(header.block_table_offset), &block_data)?;
        out.write_header(&header)?;
        out.finish(u64::from(header.archive_size))?;

        Ok((hash_table, block_table))
    }
}
