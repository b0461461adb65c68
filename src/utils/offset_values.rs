use crate::components::route::RouterId;
use crate::utils::offset_table::OffsetTable;

/// An offset table together with the array of values kept parallel to it.
/// Every mutation resizes both in lock-step, so `values.len()` always equals
/// the table size.
#[derive(Debug, Clone)]
pub struct OffsetValues<T> {
    offsets: OffsetTable,
    values: Vec<T>,
}

impl<T> Default for OffsetValues<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OffsetValues<T> {
    pub fn new() -> Self {
        Self {
            offsets: OffsetTable::empty(),
            values: Vec::new(),
        }
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn offset_of(&self, router_id: RouterId) -> Option<usize> {
        self.offsets.offset_of(router_id)
    }

    pub fn get_mut(&mut self, offset: usize) -> &mut T {
        &mut self.values[offset]
    }

    pub fn value_of(&self, router_id: RouterId) -> Option<&T> {
        self.offset_of(router_id).map(|offset| &self.values[offset])
    }

    /// Stores `value` for `router_id`, growing the table when the id is new.
    /// Returns the offset the value lives at.
    pub fn insert(&mut self, router_id: RouterId, value: T) -> usize {
        if let Some(offset) = self.offsets.offset_of(router_id) {
            self.values[offset] = value;
            return offset;
        }
        let offsets = self.offsets.with(router_id);
        let offset = offsets
            .offset_of(router_id)
            .expect("router id was just added to the table");
        let values = std::mem::take(&mut self.values);
        self.values = offsets.expand(&self.offsets, values, offset, value);
        self.offsets = offsets;
        offset
    }

    pub fn remove(&mut self, router_id: RouterId) -> Option<T> {
        let offset = self.offsets.offset_of(router_id)?;
        let values = std::mem::take(&mut self.values);
        let (values, removed) = self.offsets.remove_value(values, offset);
        self.values = values;
        self.offsets = self.offsets.without(router_id);
        Some(removed)
    }

    /// Values in offset order together with the router id owning each slot.
    pub fn iter(&self) -> impl Iterator<Item = (RouterId, &T)> + '_ {
        self.offsets.router_ids().iter().copied().zip(self.values.iter())
    }
}
