//! Session identity and storage.
//!
//! Ids come from an [`IdAllocator`], session objects live in an [`ObjectPool`]
//! arena indexed by those ids, and [`Sessions`] adds the dispatcher's list of
//! registered sessions on top.

pub mod id;
pub mod pool;
pub mod session;

pub use id::{IdAllocator, UserId, MAX_CAPACITY};
pub use pool::ObjectPool;
pub use session::{Session, Sessions};
