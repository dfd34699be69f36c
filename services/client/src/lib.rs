//! services/client/src/lib.rs
//!
//! The digital library client: session handling, the authenticated HTTP
//! client, the query cache, the resource handle manager and the typed
//! domain operations, wired together by [`library::Library`].

pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod library;
pub mod ops;
pub mod resources;
pub mod session;

pub use library::{Library, LibraryPorts};
