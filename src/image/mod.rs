//! Serving-side image access.
//!
//! - [`NameResolver`] maps request paths to files under the image root
//! - [`ImageRegistry`] keeps one attached engine handle per image
//! - [`list_dir`] enumerates subdirectories and cached images

mod listing;
mod registry;
mod resolve;

pub use listing::{list_dir, DirEntry, EntryKind};
pub use registry::{ImageHandle, ImageRegistry, DEFAULT_CACHE_EXTENSION};
pub use resolve::{NameResolver, Resolved};
