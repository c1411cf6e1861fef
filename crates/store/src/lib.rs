//! The event store (C1): an embedded, single-writer, multi-reader,
//! SQLite-backed log of session events with a content-addressed blob
//! pool and full-text search.

pub mod blob;
pub mod db;
pub mod schema;

pub use blob::BlobStore;
pub use db::{Appended, EventStore};
