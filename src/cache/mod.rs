// src/cache/mod.rs

//! Content-addressed job cache.
//!
//! - [`hash`]: blake3 digests.
//! - [`inputs`]: resolve a job's input patterns into sorted fingerprints.
//! - [`key`]: derive a deterministic [`CacheKey`] and its [`Manifest`].
//! - [`store`]: restore, atomic save and pruning of artifacts on disk.

pub mod hash;
pub mod inputs;
pub mod key;
pub mod store;

pub use inputs::{DEFAULT_EXCLUDES, ExcludeSet, FileFingerprint, ResolvedInputs};
pub use key::{CacheKey, KeyPayload, Manifest, compute_cache_key};
pub use store::{CacheRestore, CacheSave, CacheStore, DEFAULT_CACHE_DIR};
