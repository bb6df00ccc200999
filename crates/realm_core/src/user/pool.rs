//! Fixed-capacity arena for session objects.
//!
//! Objects live in a contiguous slot vector indexed by their [`UserId`]. The id
//! allocator is the single gating resource: when it runs dry, construction fails
//! without touching the arena.

use super::id::{IdAllocator, UserId};
use tracing::error;

/// Slab allocator handing out objects tagged with a unique id.
///
/// Callers hold ids, never references that outlive a borrow of the pool, so a
/// destroyed object cannot be reached through a stale handle: the slot is empty
/// until the id is issued again.
#[derive(Debug)]
pub struct ObjectPool<T> {
    ids: IdAllocator,
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> ObjectPool<T> {
    /// Creates a pool with room for `capacity` live objects.
    pub fn new(capacity: usize) -> Self {
        let ids = IdAllocator::new(capacity);
        let mut slots = Vec::with_capacity(ids.capacity());
        slots.resize_with(ids.capacity(), || None);

        Self {
            ids,
            slots,
            live: 0,
        }
    }

    /// Allocates an id and stores the object built by `init` under it.
    ///
    /// # Returns
    ///
    /// The id of the new object, or `None` if every id is in use. In that case
    /// `init` is not called.
    pub fn construct<F>(&mut self, init: F) -> Option<UserId>
    where
        F: FnOnce(UserId) -> T,
    {
        let id = self.ids.get();
        let Some(slot) = id.index().and_then(|index| self.slots.get_mut(index)) else {
            error!(
                "Generated invalid id, all {} objects are in use",
                self.slots.len()
            );
            return None;
        };

        *slot = Some(init(id));
        self.live += 1;
        Some(id)
    }

    /// Removes the object stored under `id` and releases the id.
    ///
    /// Returns `None` (and releases nothing) if no live object has that id,
    /// which makes a repeated destroy harmless.
    pub fn destroy(&mut self, id: UserId) -> Option<T> {
        let object = id
            .index()
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::take)?;

        self.ids.insert(id);
        self.live -= 1;
        Some(object)
    }

    /// Returns the object stored under `id`.
    pub fn get(&self, id: UserId) -> Option<&T> {
        id.index()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    /// Returns the object stored under `id` mutably.
    pub fn get_mut(&mut self, id: UserId) -> Option<&mut T> {
        id.index()
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::as_mut)
    }

    /// Iterates over live objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|object| (UserId::new(index as i16), object)))
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true when no object is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Maximum number of simultaneously live objects.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
