//! Material palettes
//!
//! Datapoint ids index into a per-section [`IdTable`]. Merging columns that
//! were produced under another palette goes through [`IdTable::remap_table_into`]
//! and [`Datapoint::remap`](super::Datapoint::remap).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key of the air material, never drawn
pub const AIR: &str = "air";

/// Global material identity (block state and biome, as produced by the host)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialKey(Arc<str>);

impl MaterialKey {
    pub fn new(key: &str) -> Self {
        Self(Arc::from(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_air(&self) -> bool {
        &*self.0 == AIR
    }
}

impl fmt::Debug for MaterialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for MaterialKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Palette mapping compact ids to material keys
#[derive(Clone, Debug, Default)]
pub struct IdTable {
    keys: Vec<MaterialKey>,
    index: HashMap<MaterialKey, u32>,
}

impl IdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a palette from keys in id order
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for key in keys {
            // duplicate keys keep their first id; later ids still resolve by position
            let key = MaterialKey::new(key.as_ref());
            let id = table.keys.len() as u32;
            table.index.entry(key.clone()).or_insert(id);
            table.keys.push(key);
        }
        table
    }

    /// Id for `key`, inserting it if new
    pub fn get_or_insert(&mut self, key: impl Into<MaterialKey>) -> u32 {
        let key = key.into();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.keys.len() as u32;
        self.index.insert(key.clone(), id);
        self.keys.push(key);
        id
    }

    pub fn get(&self, id: u32) -> Option<&MaterialKey> {
        self.keys.get(id as usize)
    }

    pub fn id_of(&self, key: &str) -> Option<u32> {
        self.index.get(&MaterialKey::new(key)).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[MaterialKey] {
        &self.keys
    }

    /// Table translating this palette's ids into `dest`'s ids, extending `dest` as needed
    ///
    /// Entry `i` of the result is the id of `self.get(i)` in `dest`.
    pub fn remap_table_into(&self, dest: &mut IdTable) -> Vec<u32> {
        self.keys.iter().map(|key| dest.get_or_insert(key.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Datapoint;

    #[test]
    fn test_get_or_insert_is_stable() {
        let mut table = IdTable::new();
        let stone = table.get_or_insert("stone");
        let dirt = table.get_or_insert("dirt");
        assert_eq!(table.get_or_insert("stone"), stone);
        assert_ne!(stone, dirt);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(dirt).map(|k| k.as_str()), Some("dirt"));
        assert_eq!(table.id_of("grass"), None);
    }

    #[test]
    fn test_remap_table_into() {
        let mut dest = IdTable::from_keys(["air", "stone"]);
        let src = IdTable::from_keys(["stone", "water", "air"]);

        let table = src.remap_table_into(&mut dest);
        assert_eq!(table, vec![1, 2, 0]);
        assert_eq!(dest.len(), 3);
        assert_eq!(dest.id_of("water"), Some(2));
    }

    #[test]
    fn test_remap_datapoints_between_palettes() {
        let mut dest = IdTable::from_keys(["air", "dirt"]);
        let src = IdTable::from_keys(["dirt"]);
        let table = src.remap_table_into(&mut dest);

        let word = Datapoint::encode(0, 3, 61, 0x0F).unwrap();
        let remapped = word.remap(&table).unwrap();
        assert_eq!(dest.get(remapped.id()).unwrap().as_str(), "dirt");
        assert_eq!(remapped.y(), 61);
    }

    #[test]
    fn test_air_key() {
        assert!(MaterialKey::new(AIR).is_air());
        assert!(!MaterialKey::new("stone").is_air());
    }
}
