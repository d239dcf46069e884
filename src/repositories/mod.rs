//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! connection and checkpoint tables, with tenant-aware methods.

pub mod connection;
pub mod sync_progress;

pub use connection::{ConnectionRepository, NewConnection, SyncToggles};
pub use sync_progress::{Checkpoint, ProgressKey, SyncProgressRepository};
