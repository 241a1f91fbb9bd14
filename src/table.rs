use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::guid::looks_like_guid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Slot index, or `<slot>.<logical>` inside an extended partition.
    pub name: String,
    /// Decimal type byte for MBR/EBR, type GUID text for GPT.
    pub typ: String,
    pub offset: u64, // in bytes
    pub size: u64,   // in bytes
    /// Empty unless the entry came from a GPT.
    pub guid: String,
}

impl PartitionEntry {
    /// First byte past the partition, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} offset={} size={} type={} guid={}",
            self.name, self.offset, self.size, self.typ, self.guid
        )
    }
}

/// Partitions in discovery order, addressable by name or GPT GUID.
#[derive(Debug, Default)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
    by_name: HashMap<String, usize>,
    by_guid: HashMap<String, String>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`. A repeated name replaces the earlier entry in place.
    pub(crate) fn insert(&mut self, entry: PartitionEntry) {
        match self.by_name.get(&entry.name) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.by_name.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Make the entry called `name` reachable through `guid`.
    pub(crate) fn register_guid(&mut self, guid: String, name: String) {
        self.by_guid.insert(guid, name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&PartitionEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn name_for_guid(&self, guid: &str) -> Option<&str> {
        self.by_guid
            .get(guid)
            .or_else(|| {
                looks_like_guid(guid)
                    .then(|| self.by_guid.get(&guid.to_ascii_uppercase()))
                    .flatten()
            })
            .map(String::as_str)
    }

    /// Look up `partition` as GUID text first, then as a literal name.
    pub fn resolve(&self, partition: &str) -> Result<&PartitionEntry> {
        let name = self.name_for_guid(partition).unwrap_or(partition);
        self.get(name)
            .ok_or_else(|| Error::NotFound(partition.to_owned()))
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a PartitionEntry;
    type IntoIter = std::slice::Iter<'a, PartitionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
