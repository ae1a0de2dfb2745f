//! Sentinel core library: watch record types, the record store interface,
//! and the stores that implement it.
//!
//! - [`types`]: newtypes and the record envelope
//! - [`error`]: [`StoreError`]
//! - [`store`]: the [`RecordStore`] trait and paginated [`enumerate`]
//! - [`registry`]: YAML directory-backed [`DirectoryStore`]
//! - [`memory`]: in-process [`MemoryStore`]

pub mod error;
pub mod memory;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreErrorKind};
pub use memory::MemoryStore;
pub use registry::{ApplyResult, DirectoryStore};
pub use store::{enumerate, ListRequest, RecordPage, RecordStore};
pub use types::{
    FileEntry, Namespace, RecordKey, RecordMeta, RecordName, ResourceVersion, StatusSnapshot,
    WatchRecord, WatchSpec, WatchStatus,
};
