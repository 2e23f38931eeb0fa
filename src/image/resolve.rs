//! Resolution of external (URL) paths to files under the image root.
//!
//! Paths are cleaned lexically: `.` and empty segments are dropped and `..`
//! pops a segment. A `..` that would climb above the root is rejected before
//! anything touches the filesystem.

use std::path::{Path, PathBuf};

use crate::error::PathError;

/// A cleaned request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Filesystem location under the root
    pub path: PathBuf,

    /// Root-relative name, without the extension of the final segment
    pub name: String,

    /// Extension given in the request (empty if none)
    pub ext: String,
}

impl Resolved {
    /// Whether this is the root itself.
    pub fn is_root(&self) -> bool {
        self.name.is_empty() && self.ext.is_empty()
    }
}

/// Maps logical names to filesystem paths confined to a root directory.
#[derive(Debug, Clone)]
pub struct NameResolver {
    root: PathBuf,
}

impl NameResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path.
    ///
    /// When the final segment has no extension, `default_ext` is appended to
    /// the filesystem path (not to the name). A trailing `/` marks a
    /// directory and suppresses the default extension.
    pub fn resolve(&self, url_path: &str, default_ext: &str) -> Result<Resolved, PathError> {
        let is_dir = url_path.ends_with('/');
        let relative = clean(url_path)?;

        if relative.is_empty() {
            return Ok(Resolved {
                path: self.root.clone(),
                name: String::new(),
                ext: String::new(),
            });
        }

        if is_dir {
            return Ok(Resolved {
                path: self.root.join(&relative),
                name: relative,
                ext: String::new(),
            });
        }

        let (name, ext) = split_extension(&relative);
        let path = if ext.is_empty() && !default_ext.is_empty() {
            self.root.join(format!("{}.{}", relative, default_ext))
        } else {
            self.root.join(&relative)
        };

        Ok(Resolved {
            path,
            name: name.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Filesystem path of `name` with `ext` appended (if not empty).
    pub fn path(&self, name: &str, ext: &str) -> Result<PathBuf, PathError> {
        let relative = clean(name)?;
        if ext.is_empty() {
            Ok(self.root.join(relative))
        } else {
            Ok(self.root.join(format!("{}.{}", relative, ext)))
        }
    }
}

/// Lexically clean a slash-separated path relative to the root.
fn clean(url_path: &str) -> Result<String, PathError> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in url_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::Escape(url_path.to_string()));
                }
            }
            segment => segments.push(segment),
        }
    }

    Ok(segments.join("/"))
}

/// Split the extension off the final segment.
fn split_extension(relative: &str) -> (&str, &str) {
    let base_start = relative.rfind('/').map_or(0, |i| i + 1);
    match relative[base_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let at = base_start + dot;
            (&relative[..at], &relative[at + 1..])
        }
        _ => (relative, ""),
    }
}
