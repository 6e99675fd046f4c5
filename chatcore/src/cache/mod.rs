//! In-memory caches used by the media pipeline.
//!
//! Both caches store references (paths, metadata), never byte buffers.
//! Evicting an entry drops the mapping only; whatever file it names is
//! left alone.

pub mod lru;
pub mod ttl;

pub use lru::KeyedCache;
pub use ttl::{Lookup, Presence, TtlCache, TtlEntry};
