//! Offline cache maintenance.
//!
//! For each source the artifact is either attached as-is (fresh) or rebuilt
//! (missing, stale, incompatible, or forced). The server never rebuilds; it
//! only attaches what this workflow produced.

mod lifecycle;

pub use lifecycle::{decide, refresh, CacheAction, RefreshOptions, RefreshOutcome};
