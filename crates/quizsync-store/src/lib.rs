//! quizsync-store — Durable storage for the quizsync engine.
//!
//! Provides [`FileStore`], a directory-backed [`PersistentStore`] whose
//! contents survive process restarts.
//!
//! [`PersistentStore`]: quizsync_core::traits::PersistentStore

pub mod file;
pub mod keys;

pub use file::FileStore;
