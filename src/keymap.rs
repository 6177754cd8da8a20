// Key layout table and per-device key database

use std::collections::HashMap;

/// One addressable key: a stable zero-based render index plus the logical
/// keycode used for event matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub index: usize,
    pub keycode: u16,
    pub name: &'static str,
}

/// Standard key layout in render order: (evdev keycode, name).
///
/// Devices report how many keys they address; the database takes that many
/// entries from the front of this table.
pub const KEY_LAYOUT: &[(u16, &str)] = &[
    (1, "Esc"),
    (59, "F1"),
    (60, "F2"),
    (61, "F3"),
    (62, "F4"),
    (63, "F5"),
    (64, "F6"),
    (65, "F7"),
    (66, "F8"),
    (67, "F9"),
    (68, "F10"),
    (87, "F11"),
    (88, "F12"),
    (41, "`"),
    (2, "1"),
    (3, "2"),
    (4, "3"),
    (5, "4"),
    (6, "5"),
    (7, "6"),
    (8, "7"),
    (9, "8"),
    (10, "9"),
    (11, "0"),
    (12, "-"),
    (13, "="),
    (14, "Backspace"),
    (15, "Tab"),
    (16, "Q"),
    (17, "W"),
    (18, "E"),
    (19, "R"),
    (20, "T"),
    (21, "Y"),
    (22, "U"),
    (23, "I"),
    (24, "O"),
    (25, "P"),
    (26, "["),
    (27, "]"),
    (43, "\\"),
    (58, "CapsLock"),
    (30, "A"),
    (31, "S"),
    (32, "D"),
    (33, "F"),
    (34, "G"),
    (35, "H"),
    (36, "J"),
    (37, "K"),
    (38, "L"),
    (39, ";"),
    (40, "'"),
    (28, "Enter"),
    (42, "LShift"),
    (44, "Z"),
    (45, "X"),
    (46, "C"),
    (47, "V"),
    (48, "B"),
    (49, "N"),
    (50, "M"),
    (51, ","),
    (52, "."),
    (53, "/"),
    (54, "RShift"),
    (29, "LCtrl"),
    (125, "LMeta"),
    (56, "LAlt"),
    (57, "Space"),
    (100, "RAlt"),
    (97, "RCtrl"),
    (110, "Insert"),
    (111, "Delete"),
    (102, "Home"),
    (107, "End"),
    (104, "PgUp"),
    (109, "PgDn"),
    (103, "Up"),
    (108, "Down"),
    (105, "Left"),
    (106, "Right"),
    (99, "PrintScreen"),
    (70, "ScrollLock"),
    (119, "Pause"),
];

/// Per-device key database mapping keycodes to stable render indices.
/// Immutable for the lifetime of a device.
#[derive(Debug, Clone)]
pub struct KeyDatabase {
    keys: Vec<Key>,
    by_code: HashMap<u16, usize>,
}

impl KeyDatabase {
    /// Build a database for the first `count` keys of the standard layout.
    pub fn from_layout(count: usize) -> Self {
        let keys: Vec<Key> = KEY_LAYOUT
            .iter()
            .take(count)
            .enumerate()
            .map(|(index, &(keycode, name))| Key {
                index,
                keycode,
                name,
            })
            .collect();
        let by_code = keys.iter().map(|k| (k.keycode, k.index)).collect();
        Self { keys, by_code }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Key> {
        self.keys.get(index)
    }

    /// Look up the key generating a given event keycode.
    pub fn by_keycode(&self, keycode: u16) -> Option<&Key> {
        self.by_code.get(&keycode).map(|&index| &self.keys[index])
    }

    pub fn by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_layout_indices_are_stable() {
        let db = KeyDatabase::from_layout(13);
        assert_eq!(db.len(), 13);
        assert_eq!(db.get(0).unwrap().name, "Esc");
        assert_eq!(db.get(12).unwrap().name, "F12");
        assert!(db.get(13).is_none());
    }

    #[test]
    fn test_by_keycode() {
        let db = KeyDatabase::from_layout(KEY_LAYOUT.len());
        let esc = db.by_keycode(1).unwrap();
        assert_eq!(esc.name, "Esc");
        assert_eq!(esc.index, 0);
        assert!(db.by_keycode(0xFFFF).is_none());
    }

    #[test]
    fn test_by_name_is_case_insensitive() {
        let db = KeyDatabase::from_layout(KEY_LAYOUT.len());
        assert_eq!(db.by_name("capslock").unwrap().keycode, 58);
        assert!(db.by_name("NoSuchKey").is_none());
    }

    #[test]
    fn test_layout_has_no_duplicate_keycodes() {
        let db = KeyDatabase::from_layout(KEY_LAYOUT.len());
        assert_eq!(db.len(), KEY_LAYOUT.len());
        let mut codes: Vec<u16> = db.iter().map(|k| k.keycode).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), KEY_LAYOUT.len());
    }
}
