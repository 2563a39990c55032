use byteorder::{ByteOrder, LE};
use lazy_static::lazy_static;

use super::consts::*;

lazy_static! {
    static ref CRYPTO_TABLE: [u32; 0x500] = generate_crypto_table();
    static ref NAME_LOOKUP: [u8; 0x100] = generate_name_lookup();
}

fn generate_crypto_table() -> [u32; 0x500] {
    let mut crypto_table = [0u32; 0x500];
    let mut seed: u32 = 0x0010_0001;

    for i in 0..0x100 {
        for j in 0..5 {
            let index = i + j * 0x100;
            seed = (seed * 125 + 3) % 0x002A_AAAB;
            let t1 = (seed & 0xFFFF) << 0x10;
            seed = (seed * 125 + 3) % 0x002A_AAAB;
            let t2 = seed & 0xFFFF;

            crypto_table[index] = t1 | t2;
        }
    }

    crypto_table
}

// uppercases ASCII and folds forward slashes into backslashes
fn generate_name_lookup() -> [u8; 0x100] {
    let mut lookup = [0u8; 0x100];

    for (i, slot) in lookup.iter_mut().enumerate() {
        let byte = i as u8;
        *slot = if byte == b'/' {
            b'\\'
        } else {
            byte.to_ascii_uppercase()
        };
    }

    lookup
}

/// Selects which of the four MPQ hash functions to compute.
///
/// All four share the same accumulation loop and differ only in which
/// quarter of the crypto table they index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    /// Start index into the hash table.
    TableOffset,
    /// First name verification hash.
    NameA,
    /// Second name verification hash.
    NameB,
    /// Encryption key derivation.
    FileKey,
}

impl HashType {
    fn table_offset(self) -> u32 {
        match self {
            HashType::TableOffset => MPQ_HASH_TABLE_INDEX,
            HashType::NameA => MPQ_HASH_NAME_A,
            HashType::NameB => MPQ_HASH_NAME_B,
            HashType::FileKey => MPQ_HASH_FILE_KEY,
        }
    }
}

/// Computes the MPQ hash of `name`.
///
/// Hashing is case-insensitive for ASCII and treats `/` and `\` as the same
/// character, so `"Units/Human.txt"` and `"UNITS\\HUMAN.TXT"` hash identically.
pub fn hash_string(name: &str, hash_type: HashType) -> u32 {
    hash_bytes(name.as_bytes(), hash_type)
}

pub(crate) fn hash_bytes(source: &[u8], hash_type: HashType) -> u32 {
    let hash_type = hash_type.table_offset();
    let mut seed1: u32 = 0x7FED_7FED;
    let mut seed2: u32 = 0xEEEE_EEEE;

    for byte in source {
        let upper = u32::from(NAME_LOOKUP[*byte as usize]);

        seed1 = CRYPTO_TABLE[(hash_type + upper) as usize] ^ seed1.wrapping_add(seed2);
        seed2 = upper
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }

    seed1
}

/// Encrypts `data` in place. Trailing bytes that do not fill a whole
/// `u32` are left untouched.
pub(crate) fn encrypt_block(data: &mut [u8], mut key: u32) {
    let mut key_secondary: u32 = 0xEEEE_EEEE;

    for chunk in data.chunks_exact_mut(4) {
        key_secondary = key_secondary
            .wrapping_add(CRYPTO_TABLE[(MPQ_HASH_KEY2_MIX + (key & 0xFF)) as usize]);

        let plain = LE::read_u32(chunk);
        LE::write_u32(chunk, plain ^ key.wrapping_add(key_secondary));

        key = (!key << 0x15).wrapping_add(0x1111_1111) | (key >> 0x0B);
        key_secondary = plain
            .wrapping_add(key_secondary)
            .wrapping_add(key_secondary << 5)
            .wrapping_add(3);
    }
}

/// Inverse of [`encrypt_block`].
pub(crate) fn decrypt_block(data: &mut [u8], mut key: u32) {
    let mut key_secondary: u32 = 0xEEEE_EEEE;

    for chunk in data.chunks_exact_mut(4) {
        key_secondary = key_secondary
            .wrapping_add(CRYPTO_TABLE[(MPQ_HASH_KEY2_MIX + (key & 0xFF)) as usize]);

        let plain = LE::read_u32(chunk) ^ key.wrapping_add(key_secondary);
        LE::write_u32(chunk, plain);

        key = (!key << 0x15).wrapping_add(0x1111_1111) | (key >> 0x0B);
        key_secondary = plain
            .wrapping_add(key_secondary)
            .wrapping_add(key_secondary << 5)
            .wrapping_add(3);
    }
}

pub(crate) fn get_plain_name(input: &str) -> &[u8] {
    let bytes = input.as_bytes();

    match bytes.iter().rposition(|b| *b == b'\\' || *b == b'/') {
        Some(pos) => &bytes[(pos + 1)..],
        None => bytes,
    }
}

/// Derives the encryption key of an archived file. Only the part of the name
/// after the last path separator participates. With `adjusted` set, the key
/// also depends on where the file is stored, which is why moving such a
/// file requires re-encrypting it.
pub(crate) fn calculate_file_key(
    file_name: &str,
    file_offset: u32,
    file_size: u32,
    adjusted: bool,
) -> u32 {
    let plain_name = get_plain_name(file_name);
    let mut key = hash_bytes(plain_name, HashType::FileKey);

    if adjusted {
        key = key.wrapping_add(file_offset) ^ file_size;
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hash_values() {
        assert_eq!(hash_string("(listfile)", HashType::TableOffset), 0x5F3D_E859);
        assert_eq!(hash_string("(hash table)", HashType::FileKey), HASH_TABLE_KEY);
        assert_eq!(hash_string("(block table)", HashType::FileKey), BLOCK_TABLE_KEY);
        assert_eq!(hash_string("file.txt", HashType::TableOffset), 0x3EA9_8D7A);
        assert_eq!(
            hash_string("interface\\glue\\mainmenu.blp", HashType::TableOffset),
            0x2BBE_7C09
        );
    }

    #[test]
    fn hashing_normalizes_case_and_separators() {
        for hash_type in &[
            HashType::TableOffset,
            HashType::NameA,
            HashType::NameB,
            HashType::FileKey,
        ] {
            assert_eq!(
                hash_string("path/to/File.txt", *hash_type),
                hash_string("PATH\\TO\\FILE.TXT", *hash_type)
            );
        }

        assert_eq!(hash_string("path\\to\\file", HashType::TableOffset), 0x534C_C8EE);
    }

    #[test]
    fn hash_types_differ() {
        let name = "war3map.j";
        let a = hash_string(name, HashType::NameA);
        let b = hash_string(name, HashType::NameB);
        let offset = hash_string(name, HashType::TableOffset);

        assert_ne!(a, b);
        assert_ne!(a, offset);
        assert_ne!(b, offset);
        assert_eq!(a, hash_string(name, HashType::NameA));
    }

    #[test]
    fn encryption_roundtrip_leaves_tail_alone() {
        let original: Vec<u8> = (0..39u8).collect();
        let mut data = original.clone();

        encrypt_block(&mut data, 0xC1EB_1CEF);
        assert_ne!(data[..36], original[..36]);
        assert_eq!(data[36..], original[36..]);

        decrypt_block(&mut data, 0xC1EB_1CEF);
        assert_eq!(data, original);
    }

    #[test]
    fn plain_name_strips_directories() {
        assert_eq!(get_plain_name("a\\b/c.txt"), b"c.txt");
        assert_eq!(get_plain_name("c.txt"), b"c.txt");
        assert_eq!(get_plain_name("dir\\"), b"");
    }

    #[test]
    fn adjusted_file_key() {
        let base = calculate_file_key("units\\footman.mdx", 0x1000, 0x2000, false);
        let adjusted = calculate_file_key("units\\footman.mdx", 0x1000, 0x2000, true);

        assert_eq!(base, hash_string("footman.mdx", HashType::FileKey));
        assert_eq!(adjusted, base.wrapping_add(0x1000) ^ 0x2000);
    }
}
