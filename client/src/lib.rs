//! VoidChat client core.
//!
//! Everything a chat client needs between the UI and the realtime keyed
//! store: server roles and their permission bitfield, the member ledger,
//! the friend graph with its two-sided request records, presence with a
//! persisted status preference, and staged role reordering with lost
//! update detection.
//!
//! All of it runs against the [`store::KeyedStore`] trait; production
//! wires in a real backend, tests use [`store::MemoryStore`] which keeps
//! the same write semantics (deep path merges, empty node pruning, batch
//! notification) in memory.

pub mod config;
pub mod error;
pub mod model;
pub mod presence;
pub mod reorder;
pub mod roles;
pub mod social;
pub mod store;
pub mod validation;


pub use error::{Error, ErrorKind};
pub use store::{KeyedStore, MemoryStore};
