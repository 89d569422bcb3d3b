//! # Workitem Archive Core
//!
//! Snapshot versioning and syncpoint-based replication for workitem
//! archives: data models, snapshot-id arithmetic, the XML wire format,
//! store and transport traits with in-memory implementations, the
//! snapshot manager, and the export, import and restore engines.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. The
//! binary crate plugs SQLite stores and remote transports in through the
//! traits in [`store`] and [`transport`].

pub mod codec;
pub mod control;
pub mod errors;
pub mod export;
pub mod filter;
pub mod import;
pub mod models;
pub mod resolve;
pub mod restore;
pub mod settings;
pub mod snapshot_id;
pub mod snapshot_manager;
pub mod store;
pub mod transport;
