//! Namespace containers
//!
//! Plain data holders shared by the authoritative tree and the client replica.
//! They know nothing about change tracking or parent links; the owning tree
//! wraps every mutation with those concerns.

use mirror_core::{NamespaceId, NamespaceKind};
use std::collections::HashMap;

/// String-keyed properties, remembering insertion order
#[derive(Debug, Clone)]
pub struct MapNamespace<V> {
    values: HashMap<String, V>,
    order: Vec<String>,
}

impl<V> MapNamespace<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Value of `key`; `None` means the property has no value
    pub fn get(&self, key: &str) -> Option<&V> {
        self.values.get(key)
    }

    /// Whether `key` has a value
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set `key`, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value)
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.values.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v)))
    }

    /// Number of keys with a value
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for MapNamespace<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a splice: what left and what entered at `index`
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceOutcome<V> {
    pub index: usize,
    pub removed: Vec<V>,
    pub added: Vec<V>,
}

/// A splice that does not fit the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    pub index: usize,
    pub remove_count: usize,
    pub len: usize,
}

/// Ordered values
#[derive(Debug, Clone)]
pub struct ListNamespace<V> {
    items: Vec<V>,
}

impl<V: Clone> ListNamespace<V> {
    /// Create an empty list
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Items in order
    pub fn items(&self) -> &[V] {
        &self.items
    }

    /// Item at `index`
    pub fn get(&self, index: usize) -> Option<&V> {
        self.items.get(index)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check that a splice fits without applying it
    pub fn check_splice(&self, index: usize, remove_count: usize) -> Result<(), OutOfRange> {
        let fits = index
            .checked_add(remove_count)
            .map_or(false, |end| end <= self.items.len());
        if fits {
            Ok(())
        } else {
            Err(OutOfRange {
                index,
                remove_count,
                len: self.items.len(),
            })
        }
    }

    /// Remove `remove_count` items at `index` and insert `added` there
    pub fn splice(
        &mut self,
        index: usize,
        remove_count: usize,
        added: Vec<V>,
    ) -> Result<SpliceOutcome<V>, OutOfRange> {
        self.check_splice(index, remove_count)?;
        let removed: Vec<V> = self
            .items
            .splice(index..index + remove_count, added.iter().cloned())
            .collect();
        Ok(SpliceOutcome {
            index,
            removed,
            added,
        })
    }

    /// Replace the item at `index`, returning the old one
    pub fn replace(&mut self, index: usize, value: V) -> Result<V, OutOfRange> {
        match self.items.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(OutOfRange {
                index,
                remove_count: 1,
                len: self.items.len(),
            }),
        }
    }

    /// Remove everything, returning the old items
    pub fn clear(&mut self) -> Vec<V> {
        std::mem::take(&mut self.items)
    }
}

impl<V: Clone> Default for ListNamespace<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Either container
#[derive(Debug, Clone)]
pub enum Namespace<V> {
    Map(MapNamespace<V>),
    List(ListNamespace<V>),
}

impl<V: Clone> Namespace<V> {
    fn empty(kind: NamespaceKind) -> Self {
        match kind {
            NamespaceKind::Map => Self::Map(MapNamespace::new()),
            NamespaceKind::List => Self::List(ListNamespace::new()),
        }
    }

    /// Whether the container holds nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(m) => m.is_empty(),
            Self::List(l) => l.is_empty(),
        }
    }
}

/// Lazily created namespaces of one node, indexed by namespace id
#[derive(Debug, Clone)]
pub struct NamespaceTable<V> {
    slots: [Option<Namespace<V>>; NamespaceId::ALL.len()],
}

impl<V: Clone> NamespaceTable<V> {
    /// Table with no namespace created yet
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Namespace `ns`, if created
    pub fn get(&self, ns: NamespaceId) -> Option<&Namespace<V>> {
        self.slots[ns.index()].as_ref()
    }

    /// Namespace `ns`, created on first access
    pub fn get_or_create(&mut self, ns: NamespaceId) -> &mut Namespace<V> {
        self.slots[ns.index()].get_or_insert_with(|| Namespace::empty(ns.kind()))
    }

    /// Map namespace `ns`, if created and a map
    pub fn map(&self, ns: NamespaceId) -> Option<&MapNamespace<V>> {
        match self.get(ns)? {
            Namespace::Map(m) => Some(m),
            Namespace::List(_) => None,
        }
    }

    /// List namespace `ns`, if created and a list
    pub fn list(&self, ns: NamespaceId) -> Option<&ListNamespace<V>> {
        match self.get(ns)? {
            Namespace::List(l) => Some(l),
            Namespace::Map(_) => None,
        }
    }

    /// Map namespace `ns`, created on first access. `None` if `ns` is a list.
    pub fn map_mut(&mut self, ns: NamespaceId) -> Option<&mut MapNamespace<V>> {
        match self.get_or_create(ns) {
            Namespace::Map(m) => Some(m),
            Namespace::List(_) => None,
        }
    }

    /// List namespace `ns`, created on first access. `None` if `ns` is a map.
    pub fn list_mut(&mut self, ns: NamespaceId) -> Option<&mut ListNamespace<V>> {
        match self.get_or_create(ns) {
            Namespace::List(l) => Some(l),
            Namespace::Map(_) => None,
        }
    }

    /// Created namespaces in wire-code order
    pub fn iter(&self) -> impl Iterator<Item = (NamespaceId, &Namespace<V>)> {
        NamespaceId::ALL
            .into_iter()
            .filter_map(|ns| self.get(ns).map(|n| (ns, n)))
    }

    /// Every value held by any namespace
    pub fn values(&self) -> Vec<&V> {
        let mut values = Vec::new();
        for ns in self.slots.iter().flatten() {
            match ns {
                Namespace::Map(m) => values.extend(m.iter().map(|(_, v)| v)),
                Namespace::List(l) => values.extend(l.items()),
            }
        }
        values
    }
}

impl<V: Clone> Default for NamespaceTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_insertion_order() {
        let mut map = MapNamespace::new();
        map.insert("b", 1);
        map.insert("a", 2);
        map.insert("b", 3);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&3));

        map.remove("b");
        map.insert("b", 4);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_splice_scenario() {
        let mut list = ListNamespace::new();
        list.splice(0, 0, vec!["a", "b", "c"]).unwrap();
        let outcome = list.splice(1, 1, vec!["x", "y"]).unwrap();
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.removed, vec!["b"]);
        assert_eq!(outcome.added, vec!["x", "y"]);
        assert_eq!(list.items(), &["a", "x", "y", "c"]);
    }

    #[test]
    fn test_splice_out_of_range() {
        let mut list: ListNamespace<u8> = ListNamespace::new();
        list.splice(0, 0, vec![1, 2]).unwrap();
        assert!(list.splice(3, 0, vec![9]).is_err());
        assert!(list.splice(1, 2, vec![]).is_err());
        assert!(list.splice(usize::MAX, 2, vec![]).is_err());
        assert_eq!(list.items(), &[1, 2]);
    }

    #[test]
    fn test_table_creates_by_kind() {
        let mut table: NamespaceTable<u8> = NamespaceTable::new();
        assert!(table.get(NamespaceId::ElementChildren).is_none());
        assert!(table.list_mut(NamespaceId::ElementChildren).is_some());
        assert!(table.map_mut(NamespaceId::ElementChildren).is_none());
        assert!(table.map_mut(NamespaceId::ElementProperties).is_some());
        let created: Vec<NamespaceId> = table.iter().map(|(ns, _)| ns).collect();
        assert_eq!(created, vec![NamespaceId::ElementProperties, NamespaceId::ElementChildren]);
    }
}
