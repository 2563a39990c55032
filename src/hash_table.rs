use std::io::Error as IoError;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::consts::*;
use super::crypto::*;
use super::error::{Error, Result};

/// The three name hashes that identify a file in the hash table.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub(crate) struct FileKey {
    pub hash_a: u32,
    pub hash_b: u32,
    pub index: u32,
}

impl FileKey {
    pub fn new(name: &str) -> FileKey {
        let hash_a = hash_string(name, HashType::NameA);
        let hash_b = hash_string(name, HashType::NameB);
        let index = hash_string(name, HashType::TableOffset);

        FileKey {
            hash_a,
            hash_b,
            index,
        }
    }

    /// Identity used by the name index; the table offset hash is not
    /// stored in the hash table, so it cannot take part.
    pub fn names(&self) -> (u32, u32) {
        (self.hash_a, self.hash_b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HashEntry {
    pub hash_a: u32,
    pub hash_b: u32,
    pub locale: u16,
    pub platform: u16,
    pub block_index: u32,
}

impl HashEntry {
    fn matches(&self, key: &FileKey, locale: u16) -> bool {
        self.hash_a == key.hash_a && self.hash_b == key.hash_b && self.locale == locale
    }
}

/// A hash table slot. `Deleted` is a tombstone: probing continues past it,
/// while `Free` ends the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Free,
    Deleted,
    Occupied(HashEntry),
}

impl Slot {
    fn from_reader<R: Read>(mut reader: R) -> Result<Slot> {
        let hash_a = reader.read_u32::<LE>()?;
        let hash_b = reader.read_u32::<LE>()?;
        let locale = reader.read_u16::<LE>()?;
        let platform = reader.read_u16::<LE>()?;
        let block_index = reader.read_u32::<LE>()?;

        Ok(match block_index {
            HASH_ENTRY_FREE => Slot::Free,
            HASH_ENTRY_DELETED => Slot::Deleted,
            _ => Slot::Occupied(HashEntry {
                hash_a,
                hash_b,
                locale,
                platform,
                block_index,
            }),
        })
    }

    fn write<W: Write>(&self, mut writer: W) -> std::result::Result<(), IoError> {
        let entry = match self {
            Slot::Occupied(entry) => *entry,
            Slot::Free | Slot::Deleted => HashEntry {
                hash_a: 0xFFFF_FFFF,
                hash_b: 0xFFFF_FFFF,
                locale: 0xFFFF,
                platform: 0x00FF,
                block_index: if *self == Slot::Free {
                    HASH_ENTRY_FREE
                } else {
                    HASH_ENTRY_DELETED
                },
            },
        };

        writer.write_u32::<LE>(entry.hash_a)?;
        writer.write_u32::<LE>(entry.hash_b)?;
        writer.write_u16::<LE>(entry.locale)?;
        writer.write_u16::<LE>(entry.platform)?;
        writer.write_u32::<LE>(entry.block_index)?;

        Ok(())
    }
}

/// Open-addressed table mapping (name, locale) to a block index.
///
/// The size is fixed when the table is created. Inserting into a table
/// without a free or deleted slot fails with [`Error::TableFull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HashTable {
    slots: Vec<Slot>,
}

impl HashTable {
    pub fn new(size: usize) -> Result<HashTable> {
        if size == 0 || !size.is_power_of_two() || size > MAX_HASH_TABLE_SIZE {
            return Err(Error::InvalidOptions {
                reason: format!("hash table size {} is not a valid power of two", size),
            });
        }

        Ok(HashTable {
            slots: vec![Slot::Free; size],
        })
    }

    /// Smallest valid table size that can hold `file_count` entries.
    pub fn size_for(file_count: usize) -> usize {
        file_count.max(MIN_HASH_TABLE_SIZE).next_power_of_two()
    }

    /// Parses an already decrypted table.
    pub fn from_bytes(data: &[u8], entries: usize) -> Result<HashTable> {
        let mut slots = Vec::with_capacity(entries);
        let mut slice = data;
        for _ in 0..entries {
            slots.push(Slot::from_reader(&mut slice)?);
        }

        Ok(HashTable { slots })
    }

    /// Serializes the table without encryption.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.slots.len() * HASH_TABLE_ENTRY_SIZE as usize);
        for slot in &self.slots {
            // writing into a Vec cannot fail
            let _ = slot.write(&mut buf);
        }

        buf
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn probe(&self, key: &FileKey) -> impl Iterator<Item = usize> {
        let mask = self.mask();
        let start = key.index as usize & mask;

        (0..self.slots.len()).map(move |step| (start + step) & mask)
    }

    /// Finds the slot holding `key` for exactly `locale`.
    pub fn find(&self, key: &FileKey, locale: u16) -> Option<(usize, HashEntry)> {
        for index in self.probe(key) {
            match self.slots[index] {
                Slot::Free => break,
                Slot::Deleted => continue,
                Slot::Occupied(entry) if entry.matches(key, locale) => return Some((index, entry)),
                Slot::Occupied(_) => continue,
            }
        }

        None
    }

    /// Finds the first entry holding `key` under any locale that `accept`
    /// agrees to, in probe order.
    pub fn find_any<F>(&self, key: &FileKey, mut accept: F) -> Option<(usize, HashEntry)>
    where
        F: FnMut(&HashEntry) -> bool,
    {
        for index in self.probe(key) {
            match self.slots[index] {
                Slot::Free => break,
                Slot::Occupied(entry)
                    if entry.hash_a == key.hash_a && entry.hash_b == key.hash_b && accept(&entry) =>
                {
                    return Some((index, entry))
                }
                _ => continue,
            }
        }

        None
    }

    pub fn lookup(&self, name: &str, locale: u16) -> Result<u32> {
        self.find(&FileKey::new(name), locale)
            .map(|(_, entry)| entry.block_index)
            .ok_or_else(|| Error::not_found(name))
    }

    /// Stores a new entry in the first free or deleted slot of the probe
    /// chain and returns the slot index.
    pub fn insert(&mut self, name: &str, locale: u16, block_index: u32) -> Result<usize> {
        let key = FileKey::new(name);
        let mut candidate = None;

        for index in self.probe(&key) {
            match self.slots[index] {
                Slot::Free => {
                    candidate.get_or_insert(index);
                    break;
                }
                Slot::Deleted => {
                    candidate.get_or_insert(index);
                }
                Slot::Occupied(entry) if entry.matches(&key, locale) => {
                    return Err(Error::AlreadyExists {
                        name: name.to_string(),
                    });
                }
                Slot::Occupied(_) => (),
            }
        }

        let index = candidate.ok_or(Error::TableFull)?;
        self.slots[index] = Slot::Occupied(HashEntry {
            hash_a: key.hash_a,
            hash_b: key.hash_b,
            locale,
            platform: 0,
            block_index,
        });

        Ok(index)
    }

    /// Turns the entry into a tombstone and returns the block index it held.
    pub fn delete(&mut self, name: &str, locale: u16) -> Result<u32> {
        let (index, entry) = self
            .find(&FileKey::new(name), locale)
            .ok_or_else(|| Error::not_found(name))?;

        self.slots[index] = Slot::Deleted;

        Ok(entry.block_index)
    }

    pub fn set_block_index(&mut self, slot: usize, block_index: u32) {
        if let Some(Slot::Occupied(entry)) = self.slots.get_mut(slot) {
            entry.block_index = block_index;
        }
    }

    /// Turns the slot into a tombstone regardless of what it holds.
    pub fn vacate(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if matches!(slot, Slot::Occupied(_)) {
                *slot = Slot::Deleted;
            }
        }
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// In-use entries in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &HashEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(entry) => Some((index, entry)),
                _ => None,
            })
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // names whose probe chains start at the same slot of a table of `size`
    fn colliding_names(size: usize, count: usize) -> Vec<String> {
        let mut by_start: HashMap<usize, Vec<String>> = HashMap::new();

        for i in 0.. {
            let name = format!("file{}.txt", i);
            let start = FileKey::new(&name).index as usize & (size - 1);
            let bucket = by_start.entry(start).or_default();
            bucket.push(name);

            if bucket.len() == count {
                return bucket.clone();
            }
        }

        unreachable!()
    }

    #[test]
    fn sizes_are_powers_of_two() {
        assert_eq!(HashTable::size_for(0), 4);
        assert_eq!(HashTable::size_for(4), 4);
        assert_eq!(HashTable::size_for(5), 8);
        assert_eq!(HashTable::size_for(1000), 1024);
        assert!(HashTable::new(6).is_err());
        assert!(HashTable::new(0).is_err());
    }

    #[test]
    fn insert_and_lookup() {
        let mut table = HashTable::new(16).unwrap();
        table.insert("war3map.j", 0, 0).unwrap();
        table.insert("Units\\Footman.mdx", 0, 1).unwrap();
        table.insert("Units\\Footman.mdx", 0x409, 2).unwrap();

        assert_eq!(table.lookup("WAR3MAP.J", 0).unwrap(), 0);
        assert_eq!(table.lookup("units/footman.mdx", 0).unwrap(), 1);
        assert_eq!(table.lookup("units/footman.mdx", 0x409).unwrap(), 2);
        assert!(matches!(table.lookup("missing", 0), Err(Error::NotFound { .. })));
        assert!(matches!(
            table.insert("war3map.j", 0, 7),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn full_table_rejects_inserts() {
        let mut table = HashTable::new(4).unwrap();
        for i in 0..4 {
            table.insert(&format!("{}.txt", i), 0, i).unwrap();
        }

        assert!(matches!(table.insert("4.txt", 0, 4), Err(Error::TableFull)));
        for i in 0..4 {
            assert_eq!(table.lookup(&format!("{}.txt", i), 0).unwrap(), i);
        }
    }

    #[test]
    fn tombstones_keep_probe_chains() {
        let names = colliding_names(8, 3);
        let mut table = HashTable::new(8).unwrap();
        for (i, name) in names.iter().enumerate() {
            table.insert(name, 0, i as u32).unwrap();
        }

        assert_eq!(table.delete(&names[0], 0).unwrap(), 0);
        assert!(table.lookup(&names[0], 0).is_err());
        assert_eq!(table.lookup(&names[1], 0).unwrap(), 1);
        assert_eq!(table.lookup(&names[2], 0).unwrap(), 2);
        assert!(matches!(table.delete(&names[0], 0), Err(Error::NotFound { .. })));

        // the tombstone is the first reusable slot of the chain
        let first = FileKey::new(&names[0]).index as usize & 7;
        assert_eq!(table.insert(&names[0], 0, 9).unwrap(), first);
        assert_eq!(table.lookup(&names[0], 0).unwrap(), 9);
    }

    #[test]
    fn find_any_ignores_locale() {
        let mut table = HashTable::new(8).unwrap();
        table.insert("readme.txt", 0x407, 3).unwrap();
        table.insert("readme.txt", 0x409, 4).unwrap();
        let key = FileKey::new("readme.txt");

        assert!(table.find(&key, 0).is_none());
        assert_eq!(table.find_any(&key, |_| true).unwrap().1.locale, 0x407);
        let (_, entry) = table.find_any(&key, |e| e.block_index != 3).unwrap();
        assert_eq!(entry.locale, 0x409);
        assert!(table.find_any(&key, |_| false).is_none());
        assert!(table.find_any(&FileKey::new("other.txt"), |_| true).is_none());
    }

    #[test]
    fn serialization_keeps_slot_states() {
        let mut table = HashTable::new(4).unwrap();
        table.insert("a", 0, 0).unwrap();
        table.insert("b", 0, 1).unwrap();
        table.delete("a", 0).unwrap();

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 64);

        let restored = HashTable::from_bytes(&bytes, 4).unwrap();
        assert_eq!(restored, table);
        assert_eq!(restored.occupied_count(), 1);
        assert_eq!(restored.lookup("b", 0).unwrap(), 1);
        assert!(restored.slots.contains(&Slot::Deleted));
    }

    #[test]
    fn random_operations_match_model() {
        let mut table = HashTable::new(16).unwrap();
        let mut model: HashMap<String, u32> = HashMap::new();
        let mut state: u32 = 0x1234_5678;

        for step in 0..2000u32 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let name = format!("f{}", (state >> 16) % 24);

            if (state >> 8) % 3 == 0 {
                let removed = table.delete(&name, 0).ok();
                assert_eq!(removed, model.remove(&name));
            } else {
                match table.insert(&name, 0, step) {
                    Ok(_) => assert!(model.insert(name.clone(), step).is_none()),
                    Err(Error::AlreadyExists { .. }) => assert!(model.contains_key(&name)),
                    Err(Error::TableFull) => assert_eq!(model.len(), 16),
                    Err(other) => panic!("unexpected error {:?}", other),
                }
            }

            for i in 0..24 {
                let name = format!("f{}", i);
                assert_eq!(table.lookup(&name, 0).ok(), model.get(&name).copied());
            }
        }
    }
}
