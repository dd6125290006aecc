//! The boat registry: name-to-vessel map with insertion-ordered iteration
//! and a secondary index from group name to its ordered members.
//!
//! The registry itself is a plain single-threaded structure; the engine
//! wraps it in one `RwLock` that the simulation thread takes exclusively
//! for the advance and command phases while server workers share it for
//! reads.

use std::collections::HashMap;

use thiserror::Error;

use crate::simulation::boat::Vessel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a boat with this name already exists")]
    Exists,
}

/// A registry node: the vessel plus its external identity.
#[derive(Debug)]
pub struct BoatEntry {
    pub name: String,
    pub group: Option<String>,
    pub alt_name: Option<String>,
    pub boat: Vessel,
}

#[derive(Debug, Clone)]
struct GroupMember {
    name: String,
    alt_name: Option<String>,
}

/// Name-keyed vessel store. Entries live in an insertion-ordered vector
/// with a name index on the side, which keeps lookups O(1) expected and
/// iteration a plain slice walk.
#[derive(Debug, Default)]
pub struct BoatRegistry {
    entries: Vec<BoatEntry>,
    index: HashMap<String, usize>,
    groups: HashMap<String, Vec<GroupMember>>,
}

impl BoatRegistry {
    pub fn new() -> BoatRegistry {
        BoatRegistry::default()
    }

    /// Inserts a vessel at the tail of iteration order, indexing it into
    /// `group` when one is given. A duplicate name changes nothing, not
    /// even group membership, and returns `Exists`.
    pub fn add(
        &mut self,
        boat: Vessel,
        name: &str,
        group: Option<String>,
        alt_name: Option<String>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(name) {
            return Err(RegistryError::Exists);
        }

        if let Some(group_name) = &group {
            self.groups.entry(group_name.clone()).or_default().push(GroupMember {
                name: name.to_string(),
                alt_name: alt_name.clone(),
            });
        }

        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(BoatEntry { name: name.to_string(), group, alt_name, boat });

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Vessel> {
        self.index.get(name).map(|&i| &self.entries[i].boat)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vessel> {
        let i = *self.index.get(name)?;
        Some(&mut self.entries[i].boat)
    }

    pub fn entry(&self, name: &str) -> Option<&BoatEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Unlinks a boat from both indices and hands the vessel back.
    /// Removing a name that is not present is a quiet no-op.
    pub fn remove(&mut self, name: &str) -> Option<Vessel> {
        let i = self.index.remove(name)?;
        let entry = self.entries.remove(i);

        // Entries after the removed slot shifted down by one.
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }

        if let Some(group_name) = &entry.group {
            if let Some(members) = self.groups.get_mut(group_name) {
                members.retain(|m| m.name != entry.name);
                if members.is_empty() {
                    self.groups.remove(group_name);
                }
            }
        }

        Some(entry.boat)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &BoatEntry> {
        self.entries.iter()
    }

    /// Live entries in insertion order, with vessel mutation access.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BoatEntry> {
        self.entries.iter_mut()
    }

    /// One `name,alt` line per member of `group` in registry insertion
    /// order, with `!` standing in for a missing alternate name. Unknown
    /// groups produce an empty response.
    pub fn group_membership_response(&self, group: &str) -> String {
        let mut resp = String::new();

        if let Some(members) = self.groups.get(group) {
            for member in members {
                resp.push_str(&member.name);
                resp.push(',');
                resp.push_str(member.alt_name.as_deref().unwrap_or("!"));
                resp.push('\n');
            }
        }

        resp
    }
}
