//! # Workitem Archive
//!
//! Snapshot archive for workflow workitems. Every save of a workitem
//! produces an immutable snapshot; snapshots are kept in a SQLite archive
//! and synchronised with a directory-structured file store and with the
//! live workflow system.
//!
//! ## Architecture
//!
//! ```text
//!   document ──▶ SnapshotManager ──▶ live store (SQLite)
//!                      │
//!                      ▼
//!               ┌────────────┐  export  ┌──────────────────┐
//!               │  archive   │ ───────▶ │  file transport  │
//!               │  (SQLite)  │ ◀─────── │  fs / ftp / s3   │
//!               └─────┬──────┘  import  └──────────────────┘
//!                     │ restore
//!                     ▼
//!               live workflow system (HTTP)
//! ```
//!
//! The engines, models and store traits live in `workitem_archive_core`;
//! this crate provides the SQLite stores, the remote backends, the
//! scheduler and the `warc` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! warc init                                  # create database
//! warc snapshot ./invoice.xml                # archive a workitem
//! warc export                                # push snapshots to the file store
//! warc restore --from 2023-05-01 --to 2023-05-31 --filter type=invoice
//! warc run                                   # schedule export, resume restore
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite archive, live store and legacy content |
//! | [`transport_fs`] | Directory-tree file transport |
//! | [`transport_s3`] | S3-compatible file transport |
//! | [`transport_ftp`] | FTP / FTPS file transport |
//! | [`sigv4`] | AWS Signature Version 4 request signing |
//! | [`util`] | URI encoding shared by the HTTP backends |
//! | [`restore_client`] | HTTP client of the live workflow system |
//! | [`scheduler`] | Recurring job registry |
//! | [`sync`] | Export, import, restore and daemon commands |
//! | [`snapshot_cmd`] | Document ingestion command |
//! | [`status`] | Cursor status and reset |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod restore_client;
pub mod scheduler;
pub mod sigv4;
pub mod snapshot_cmd;
pub mod sqlite_store;
pub mod status;
pub mod sync;
pub mod transport_fs;
pub mod transport_ftp;
pub mod transport_s3;
pub mod util;
