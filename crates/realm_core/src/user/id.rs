//! Identifier allocation for session slots.
//!
//! Every session is named by a small signed integer taken from a bounded pool.
//! Ids are handed out by [`IdAllocator::get`] and become reusable only once they
//! are given back through [`IdAllocator::insert`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};

/// Largest number of ids a single allocator can manage.
pub const MAX_CAPACITY: usize = i16::MAX as usize;

/// Small unique integer naming a session slot.
///
/// Valid ids lie in `[0, capacity)`. [`UserId::INVALID`] is the sentinel returned
/// when no id is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i16);

impl UserId {
    /// Sentinel meaning "no id available".
    pub const INVALID: UserId = UserId(-1);

    /// Wraps a raw id value.
    pub const fn new(raw: i16) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    pub const fn get(self) -> i16 {
        self.0
    }

    /// Returns `false` for the sentinel (and any other negative value).
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Arena index for a valid id.
    pub(crate) fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Issues and reclaims unique ids from a bounded pool.
///
/// The free ids are kept on a stack, so the most recently released id is the
/// next one handed out. A freshly created allocator yields `0` first.
#[derive(Debug)]
pub struct IdAllocator {
    free: Vec<UserId>,
    in_pool: Vec<bool>,
}

impl IdAllocator {
    /// Creates an allocator holding exactly `capacity` free ids `0..capacity`.
    ///
    /// Capacities above [`MAX_CAPACITY`] are clamped since larger ids would not
    /// fit the 16-bit representation.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity > MAX_CAPACITY {
            warn!(
                "⚠️ Requested id capacity {} exceeds {}, clamping",
                capacity, MAX_CAPACITY
            );
            MAX_CAPACITY
        } else {
            capacity
        };

        let free = (0..capacity)
            .rev()
            .map(|raw| UserId(raw as i16))
            .collect();

        Self {
            free,
            in_pool: vec![true; capacity],
        }
    }

    /// Removes and returns one free id, or [`UserId::INVALID`] when none is left.
    pub fn get(&mut self) -> UserId {
        match self.free.pop() {
            Some(id) => {
                if let Some(slot) = id.index().and_then(|index| self.in_pool.get_mut(index)) {
                    *slot = false;
                }
                id
            }
            None => UserId::INVALID,
        }
    }

    /// Returns `id` to the free pool.
    ///
    /// The id must have been issued by [`get`](Self::get) and not be in the pool
    /// already. Debug builds assert this; release builds log and ignore the call.
    pub fn insert(&mut self, id: UserId) {
        let Some(index) = id.index().filter(|index| *index < self.in_pool.len()) else {
            debug_assert!(false, "id {id} was never issued by this allocator");
            error!("Attempt to release foreign id {}", id);
            return;
        };

        if self.in_pool[index] {
            debug_assert!(false, "id {id} released twice");
            error!("Attempt to release id {} which is already free", id);
            return;
        }

        self.in_pool[index] = true;
        self.free.push(id);
    }

    /// Number of ids currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total number of ids managed by this allocator.
    pub fn capacity(&self) -> usize {
        self.in_pool.len()
    }

    /// Returns true if `id` is currently free.
    pub fn is_free(&self, id: UserId) -> bool {
        id.index()
            .and_then(|index| self.in_pool.get(index))
            .copied()
            .unwrap_or(false)
    }
}
