//! The `(listfile)` and the in-memory index of known file names.
//!
//! The hash table only stores name hashes, so names can only be listed if
//! they were seen at some point: added through this handle, or read from
//! the archive's `(listfile)` when it was opened.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::warn;

use super::consts::*;
use super::hash_table::{FileKey, HashTable};

lazy_static! {
    static ref INTERNAL_KEYS: Vec<(u32, u32)> = INTERNAL_FILES
        .iter()
        .map(|name| FileKey::new(name).names())
        .collect();
}

pub(crate) fn is_internal(hash_a: u32, hash_b: u32) -> bool {
    INTERNAL_KEYS.contains(&(hash_a, hash_b))
}

/// Name listed for an entry whose real name is unknown.
pub(crate) fn placeholder(block_index: u32) -> String {
    format!("File{:08}.xxx", block_index)
}

/// Block index named by a placeholder produced by [`placeholder`].
pub(crate) fn placeholder_index(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let digits = lower.strip_prefix("file")?.strip_suffix(".xxx")?;

    if digits.len() < 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// Splits a listfile into names. Lines may be separated by `\r`, `\n` or
/// `;`, and blank lines are skipped.
pub(crate) fn parse(data: &[u8]) -> Vec<String> {
    let content = match std::str::from_utf8(data) {
        Ok(content) => content.to_string(),
        Err(_) => {
            warn!("(listfile) is not valid UTF-8, using lossy conversion");
            String::from_utf8_lossy(data).into_owned()
        }
    };

    content
        .split(|c| c == '\r' || c == '\n' || c == ';')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default)]
pub(crate) struct NameIndex {
    names: IndexMap<(u32, u32), String>,
}

impl NameIndex {
    pub fn new() -> NameIndex {
        NameIndex::default()
    }

    /// Records `name`. Only the first spelling of a name is kept, since
    /// hashing ignores case and separators.
    pub fn insert(&mut self, name: &str) {
        let key = FileKey::new(name).names();

        self.names.entry(key).or_insert_with(|| name.to_string());
    }

    /// Records every name that actually occurs in `table`, returning how
    /// many were new.
    pub fn extend_from_table<I>(&mut self, names: I, table: &HashTable) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut present = std::collections::HashSet::new();
        for (_, entry) in table.occupied() {
            present.insert((entry.hash_a, entry.hash_b));
        }

        let mut added = 0;
        for name in names {
            let key = FileKey::new(&name).names();
            if present.contains(&key) && !self.names.contains_key(&key) {
                self.names.insert(key, name);
                added += 1;
            }
        }

        added
    }

    pub fn get(&self, hash_a: u32, hash_b: u32) -> Option<&str> {
        self.names.get(&(hash_a, hash_b)).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) {
        self.names.shift_remove(&FileKey::new(name).names());
    }

    /// Renders the listfile for every known, non-internal name still in
    /// `table`, in the order the names were learned.
    pub fn render(&self, table: &HashTable) -> Vec<u8> {
        let mut present = std::collections::HashSet::new();
        for (_, entry) in table.occupied() {
            present.insert((entry.hash_a, entry.hash_b));
        }

        let mut out = Vec::new();
        for (key, name) in &self.names {
            if is_internal(key.0, key.1) || !present.contains(key) {
                continue;
            }

            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let data = b"war3map.j\r\nwar3map.w3e\n\nunits\\hero.mdx;scripts\\blizzard.j\r\n  ";

        assert_eq!(
            parse(data),
            vec![
                "war3map.j",
                "war3map.w3e",
                "units\\hero.mdx",
                "scripts\\blizzard.j"
            ]
        );
        assert!(parse(b"").is_empty());
    }

    #[test]
    fn internal_names_are_recognized() {
        let (a, b) = FileKey::new("(LISTFILE)").names();
        assert!(is_internal(a, b));

        let (a, b) = FileKey::new("listfile").names();
        assert!(!is_internal(a, b));
    }

    #[test]
    fn placeholders_are_padded() {
        assert_eq!(placeholder(7), "File00000007.xxx");
        assert_eq!(placeholder_index(&placeholder(7)), Some(7));
        assert_eq!(placeholder_index("FILE00001234.XXX"), Some(1234));
        assert_eq!(placeholder_index("File7.xxx"), None);
        assert_eq!(placeholder_index("File0000000a.xxx"), None);
        assert_eq!(placeholder_index("File00000007.txt"), None);
    }

    #[test]
    fn render_skips_missing_and_internal_names() {
        let mut table = HashTable::new(8).unwrap();
        table.insert("a.txt", 0, 0).unwrap();
        table.insert("(listfile)", 0, 1).unwrap();
        table.insert("dir/b.txt", 0, 2).unwrap();

        let mut index = NameIndex::new();
        index.insert("a.txt");
        index.insert("(listfile)");
        index.insert("gone.txt");
        index.insert("dir/b.txt");
        index.insert("A.TXT");

        assert_eq!(index.render(&table), b"a.txt\r\ndir/b.txt\r\n".to_vec());

        index.remove("DIR\\B.TXT");
        assert_eq!(index.render(&table), b"a.txt\r\n".to_vec());
    }

    #[test]
    fn extend_only_learns_present_names() {
        let mut table = HashTable::new(4).unwrap();
        table.insert("x.blp", 0, 0).unwrap();

        let mut index = NameIndex::new();
        let added = index.extend_from_table(
            vec!["x.blp".to_string(), "y.blp".to_string()],
            &table,
        );

        assert_eq!(added, 1);
        let (a, b) = FileKey::new("X.BLP").names();
        assert_eq!(index.get(a, b), Some("x.blp"));
    }
}
