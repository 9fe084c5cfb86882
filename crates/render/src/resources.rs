//! Shared-resource table with explicit acquire/release counts.
//!
//! Cached resources (shared texture entries and the like) are stored in an
//! arena indexed by generational ids. Sharing is expressed by an explicit
//! count on the entry rather than by aliased smart pointers, so release is
//! deterministic: the call that drops the count to zero gets the value back
//! and routes its native destruction through the lifetime tracker.

use tracing::debug;

/// Generational index into a [`ResourceTable`].
///
/// Stale ids (whose slot was released and reused) are rejected by every
/// operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

/// One arena slot.
struct Entry<T> {
    value: Option<T>,
    generation: u32,
    ref_count: u32,
}

/// Arena of shared resources with explicit reference counts.
pub struct ResourceTable<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

impl<T> Default for ResourceTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResourceTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts a resource with an initial count of one.
    pub fn insert(&mut self, value: T) -> ResourceId {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            entry.ref_count = 1;
            return ResourceId {
                index,
                generation: entry.generation,
            };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            value: Some(value),
            generation: 0,
            ref_count: 1,
        });

        ResourceId {
            index,
            generation: 0,
        }
    }

    /// Increments the share count for an id.
    ///
    /// Returns the id back for convenience, or `None` if the id is stale.
    pub fn acquire(&mut self, id: ResourceId) -> Option<ResourceId> {
        let entry = self.live_entry_mut(id)?;
        entry.ref_count += 1;
        Some(id)
    }

    /// Decrements the share count for an id.
    ///
    /// When the count reaches zero the slot is recycled and the value is
    /// returned so the caller can destroy it (deferred, if GPU-referenced).
    /// Returns `None` while other holders remain or if the id is stale.
    pub fn release(&mut self, id: ResourceId) -> Option<T> {
        let entry = self.live_entry_mut(id)?;

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return None;
        }

        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);

        debug!("Resource slot {} released", id.index);

        value
    }

    /// Returns a reference to a live resource.
    pub fn get(&self, id: ResourceId) -> Option<&T> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.value.as_ref()
    }

    /// Returns the share count for an id, or zero for stale ids.
    pub fn ref_count(&self, id: ResourceId) -> u32 {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation && entry.value.is_some())
            .map(|entry| entry.ref_count)
            .unwrap_or(0)
    }

    /// Returns the number of live resources.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Returns true if no live resources remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every live resource, returning them for destruction.
    ///
    /// Used at teardown, after the device has idled.
    pub fn drain(&mut self) -> Vec<T> {
        let values = self
            .entries
            .iter_mut()
            .filter_map(|entry| {
                let value = entry.value.take()?;
                entry.generation = entry.generation.wrapping_add(1);
                entry.ref_count = 0;
                Some(value)
            })
            .collect();

        self.free = (0..self.entries.len() as u32).collect();

        values
    }

    fn live_entry_mut(&mut self, id: ResourceId) -> Option<&mut Entry<T>> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation || entry.value.is_none() {
            return None;
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut table = ResourceTable::new();
        let id = table.insert("texture");

        assert_eq!(table.get(id), Some(&"texture"));
        assert_eq!(table.ref_count(id), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_is_deterministic() {
        let mut table = ResourceTable::new();
        let id = table.insert(42u32);

        table.acquire(id).unwrap();
        assert_eq!(table.ref_count(id), 2);

        // First release: another holder remains, value stays put.
        assert_eq!(table.release(id), None);
        assert_eq!(table.get(id), Some(&42));

        // Last release returns the value exactly once.
        assert_eq!(table.release(id), Some(42));
        assert_eq!(table.get(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_id_rejected_after_reuse() {
        let mut table = ResourceTable::new();
        let old = table.insert("a");
        table.release(old);

        let new = table.insert("b");
        assert_eq!(new.index, old.index);
        assert_ne!(new, old);

        assert_eq!(table.get(old), None);
        assert!(table.acquire(old).is_none());
        assert_eq!(table.get(new), Some(&"b"));
    }

    #[test]
    fn test_release_stale_id_is_noop() {
        let mut table = ResourceTable::new();
        let old = table.insert(1u32);
        table.release(old);
        let _new = table.insert(2u32);

        assert_eq!(table.release(old), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_returns_all_live_values() {
        let mut table = ResourceTable::new();
        table.insert(1u32);
        let released = table.insert(2u32);
        table.insert(3u32);
        table.release(released);

        let mut values = table.drain();
        values.sort();

        assert_eq!(values, vec![1, 3]);
        assert!(table.is_empty());
    }
}
