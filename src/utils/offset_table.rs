use crate::components::route::RouterId;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

type Slots = DashMap<Box<[RouterId]>, Weak<TableIds>>;

#[derive(Debug)]
struct TableIds {
    ids: Box<[RouterId]>,
    slots: Weak<Slots>,
}

impl Drop for TableIds {
    fn drop(&mut self) {
        // A slot refilled by a concurrent intern holds a live table.
        if let Some(slots) = self.slots.upgrade() {
            slots.remove_if(&*self.ids, |_, table| table.strong_count() == 0);
        }
    }
}

/// Immutable, interned, strictly increasing set of router ids. The position of
/// an id is the offset of its slot in every array kept parallel to the table.
#[derive(Clone)]
pub struct OffsetTable(Arc<TableIds>);

impl OffsetTable {
    pub fn empty() -> Self {
        OffsetTableCache::global().intern(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.ids.is_empty()
    }

    pub fn offset_of(&self, router_id: RouterId) -> Option<usize> {
        self.0.ids.binary_search(&router_id).ok()
    }

    pub fn router_id(&self, offset: usize) -> RouterId {
        self.0.ids[offset]
    }

    pub fn router_ids(&self) -> &[RouterId] {
        &self.0.ids
    }

    /// True when both handles point at the same interned table.
    pub fn ptr_eq(&self, other: &OffsetTable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn with(&self, router_id: RouterId) -> OffsetTable {
        self.with_in(OffsetTableCache::global(), router_id)
    }

    pub fn with_in(&self, cache: &OffsetTableCache, router_id: RouterId) -> OffsetTable {
        match self.0.ids.binary_search(&router_id) {
            Ok(_) => self.clone(),
            Err(insert_at) => {
                let mut ids = Vec::with_capacity(self.len() + 1);
                ids.extend_from_slice(&self.0.ids[..insert_at]);
                ids.push(router_id);
                ids.extend_from_slice(&self.0.ids[insert_at..]);
                cache.intern(ids)
            }
        }
    }

    pub fn without(&self, router_id: RouterId) -> OffsetTable {
        self.without_in(OffsetTableCache::global(), router_id)
    }

    pub fn without_in(&self, cache: &OffsetTableCache, router_id: RouterId) -> OffsetTable {
        match self.0.ids.binary_search(&router_id) {
            Err(_) => self.clone(),
            Ok(remove_at) => {
                let mut ids = Vec::with_capacity(self.len() - 1);
                ids.extend_from_slice(&self.0.ids[..remove_at]);
                ids.extend_from_slice(&self.0.ids[remove_at + 1..]);
                cache.intern(ids)
            }
        }
    }

    /// Builds the array parallel to `self` out of the array parallel to
    /// `old`, which must be `self` minus the id living at `offset`.
    pub fn expand<T>(&self, old: &OffsetTable, values: Vec<T>, offset: usize, value: T) -> Vec<T> {
        assert_eq!(values.len(), old.len(), "values out of step with offset table");
        assert_eq!(self.len(), old.len() + 1, "offset table did not grow by one");
        assert!(offset <= old.len(), "offset {} out of range", offset);

        let mut expanded = Vec::with_capacity(self.len());
        let mut old_values = values.into_iter();
        expanded.extend(old_values.by_ref().take(offset));
        expanded.push(value);
        expanded.extend(old_values);
        expanded
    }

    /// Closes the gap at `offset`, returning the shrunk array and the value
    /// that lived there.
    pub fn remove_value<T>(&self, values: Vec<T>, offset: usize) -> (Vec<T>, T) {
        assert_eq!(values.len(), self.len(), "values out of step with offset table");
        assert!(offset < self.len(), "offset {} out of range", offset);

        let mut shrunk = Vec::with_capacity(self.len() - 1);
        let mut old_values = values.into_iter();
        shrunk.extend(old_values.by_ref().take(offset));
        let removed = old_values.next().expect("offset checked above");
        shrunk.extend(old_values);
        (shrunk, removed)
    }
}

impl PartialEq for OffsetTable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.ids == other.0.ids
    }
}

impl Eq for OffsetTable {}

impl fmt::Debug for OffsetTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.0.ids.iter()).finish()
    }
}

/// Interning cache shared by every route entry. Holds weak references only,
/// so a table lives exactly as long as some entry uses it, and its slot goes
/// with it.
#[derive(Debug, Default)]
pub struct OffsetTableCache {
    tables: Arc<Slots>,
}

impl OffsetTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static OffsetTableCache {
        static GLOBAL: OnceLock<OffsetTableCache> = OnceLock::new();
        GLOBAL.get_or_init(OffsetTableCache::new)
    }

    /// Returns the shared table for `ids`, which must be strictly increasing.
    pub fn intern(&self, ids: Vec<RouterId>) -> OffsetTable {
        debug_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        if let Some(existing) = self
            .tables
            .get(ids.as_slice())
            .and_then(|table| table.upgrade())
        {
            return OffsetTable(existing);
        }

        let ids = ids.into_boxed_slice();
        let mut slot = self.tables.entry(ids.clone()).or_default();
        if let Some(existing) = slot.upgrade() {
            return OffsetTable(existing);
        }
        let table = Arc::new(TableIds {
            ids,
            slots: Arc::downgrade(&self.tables),
        });
        *slot = Arc::downgrade(&table);
        OffsetTable(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
