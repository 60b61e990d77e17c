//! Keyed build caching for Wheelwright.

pub mod archiver;
pub mod keys;
pub mod resolver;
pub mod store;

pub use archiver::{pack, unpack};
pub use keys::{derive_key, matches_prefix, sanitize_key};
pub use resolver::{CacheHandle, CacheResolver};
pub use store::{CacheStore, FsStore, MemoryStore};
