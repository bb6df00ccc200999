//! # Realm Core - Session and Connection Foundation
//!
//! The connection and session core of a multiplayer game server. It accepts
//! stream connections, gives each admitted connection a session with a small
//! reusable id under a hard capacity bound, and routes transport events to a
//! protocol handler. Message encoding and game logic live above it.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **IdAllocator** - Issues and reclaims session ids from a bounded pool
//! * **ObjectPool** - Fixed-capacity arena of session objects indexed by id
//! * **TcpConnection** - Stream connection driven by one task per socket
//! * **UdpConnection** - Datagram socket with pooled write buffers
//! * **Server / Dispatcher** - Accept loop, capacity policy and event routing
//!
//! ### Event Flow
//!
//! 1. The server accepts a socket and allocates a `TcpConnection` from its pool
//! 2. The connection reports `Connected`; the dispatcher checks capacity,
//!    allocates a session and asks [`SessionHandler::on_connect`]
//! 3. Accepted sessions are registered and their first receive is armed
//! 4. Every completed read becomes an [`SessionHandler::on_receive`] call
//! 5. The `Closed` event calls [`SessionHandler::on_close`], then the session is
//!    destroyed and its id released
//!
//! ## Error Handling
//!
//! Pool exhaustion, capacity limits and transport failures never escape as
//! errors: they close the affected connection, log, and the accept loop keeps
//! running. [`ServerError`] covers binding and configuration failures, and
//! [`ConnectionError`] reports misuse of a connection handle.
//!
//! ## Thread Safety
//!
//! * Each connection's socket is touched only by its own driver task
//! * Pools and sessions are owned by the single dispatcher task
//! * Handles (`TcpConnection`, `UdpConnection`, `ServerHandle`) are cheap to
//!   clone and safe to use from any task

// Re-export core types and functions for easy access
pub use config::ServerConfig;
pub use connection::{
    CloseReason, ConnectionEvent, ConnectionId, ConnectionState, Datagram, TcpConnection,
    UdpConnection, UdpOptions,
};
pub use error::{ConnectionError, ServerError};
pub use server::{Dispatcher, Server, ServerHandle, SessionHandler};
pub use shutdown::ShutdownState;
pub use user::{IdAllocator, ObjectPool, Session, Sessions, UserId};
pub use utils::{create_server, create_server_with_config};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod user;
pub mod utils;

// Internal modules (not part of public API)
mod tests;

#[cfg(test)]
mod test_support;
