//! Session server: accept loop, dispatch and protocol callbacks.
//!
//! This module contains the server structure, the dispatcher that maps
//! connection events to sessions, and the handler trait protocols implement.

pub mod core;
pub mod dispatcher;
pub mod handlers;

pub use core::{Server, ServerHandle};
pub use dispatcher::Dispatcher;
pub use handlers::SessionHandler;
