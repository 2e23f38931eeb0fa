//! In-memory engine for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;

use crate::error::EngineError;
use crate::source::PartGrid;
use crate::tile::PixelRegion;

use super::{CacheInfo, CacheStatus, ImageEngine, ImageFormat, ImageInfo, ImageParams};

/// Classifies by extension: `.png` is a source, `.cache` an artifact, and any
/// path containing `unreadable` fails to sniff.
#[derive(Default)]
pub(crate) struct MockEngine {
    pub statuses: Mutex<HashMap<PathBuf, CacheStatus>>,
    pub status_errors: Mutex<HashSet<PathBuf>>,
    pub missing: Mutex<HashSet<PathBuf>>,
    pub render_error: Mutex<Option<EngineError>>,
    pub open_delay_ms: AtomicU64,
    pub opens: AtomicUsize,
    pub attaches: AtomicUsize,
    pub updates: AtomicUsize,
    pub closes: AtomicUsize,
    pub renders: AtomicUsize,
}

pub(crate) struct MockHandle {
    pub path: PathBuf,
    pub attached: bool,
    pub updated_from: Option<PartGrid>,
}

impl MockEngine {
    pub fn set_status(&self, cache_path: impl Into<PathBuf>, status: CacheStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(cache_path.into(), status);
    }

    pub fn set_missing(&self, cache_path: impl Into<PathBuf>) {
        self.missing.lock().unwrap().insert(cache_path.into());
    }

    /// Make every following render fail with `error` (or succeed on `None`).
    pub fn fail_renders(&self, error: Option<EngineError>) {
        *self.render_error.lock().unwrap() = error;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageEngine for MockEngine {
    type Handle = MockHandle;

    async fn sniff(&self, path: &Path) -> Result<Option<ImageFormat>, EngineError> {
        if path.to_string_lossy().contains("unreadable") {
            return Err(EngineError::Io {
                path: path.to_path_buf(),
                message: "permission denied".to_string(),
            });
        }
        Ok(match path.extension().and_then(|e| e.to_str()) {
            Some("png") => Some(ImageFormat::Png),
            Some("cache") => Some(ImageFormat::Cache),
            _ => None,
        })
    }

    fn cache_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        if path.extension().is_none() {
            return Err(EngineError::InvalidPath {
                path: path.to_path_buf(),
                reason: "no file extension".to_string(),
            });
        }
        Ok(path.with_extension("cache"))
    }

    async fn open(&self, cache_path: &Path) -> Result<MockHandle, EngineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(MockHandle {
            path: cache_path.to_path_buf(),
            attached: false,
            updated_from: None,
        })
    }

    async fn status(
        &self,
        handle: &MockHandle,
        _sources: &PartGrid,
    ) -> Result<CacheStatus, EngineError> {
        if self.status_errors.lock().unwrap().contains(&handle.path) {
            return Err(EngineError::Io {
                path: handle.path.clone(),
                message: "stat failed".to_string(),
            });
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&handle.path)
            .copied()
            .unwrap_or(CacheStatus::None))
    }

    async fn attach(&self, handle: &mut MockHandle) -> Result<(), EngineError> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().unwrap().contains(&handle.path) {
            return Err(EngineError::NotFound(handle.path.clone()));
        }
        handle.attached = true;
        Ok(())
    }

    async fn update(
        &self,
        handle: &mut MockHandle,
        sources: &PartGrid,
        _params: &ImageParams,
    ) -> Result<(), EngineError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        handle.updated_from = Some(sources.clone());
        handle.attached = true;
        Ok(())
    }

    async fn info(&self, handle: &MockHandle) -> Result<ImageInfo, EngineError> {
        if !handle.attached {
            return Err(EngineError::NotAttached(handle.path.clone()));
        }
        Ok(ImageInfo {
            format: ImageFormat::Png,
            width: 1000,
            height: 800,
            bits_per_pixel: 24,
            cache: CacheInfo {
                version: 1,
                modified_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
                bytes: 3_204_096,
                blocks: 783,
            },
            source: None,
        })
    }

    async fn render_tile(
        &self,
        handle: &MockHandle,
        region: PixelRegion,
        zoom: i32,
    ) -> Result<Bytes, EngineError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.render_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Bytes::from(format!(
            "{}:{},{}:{}x{}@{}",
            handle.path.display(),
            region.x,
            region.y,
            region.width,
            region.height,
            zoom
        )))
    }

    async fn close(&self, _handle: MockHandle) -> Result<(), EngineError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
