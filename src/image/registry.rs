//! Registry of opened images.
//!
//! The registry provides:
//! - One live engine handle per logical name for the process lifetime
//! - Singleflight opens, so concurrent first requests share one open
//! - Discarding of handles whose reads fail, so the next request reopens
//!
//! Handles are only ever attached read-only; artifacts are built offline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::engine::{ImageEngine, ImageInfo};
use crate::error::{EngineError, ImageError};
use crate::tile::PixelRegion;

use super::resolve::NameResolver;

/// Default extension of artifacts looked up by name.
pub const DEFAULT_CACHE_EXTENSION: &str = "cache";

// =============================================================================
// ImageHandle
// =============================================================================

/// An attached image and a snapshot of its info.
pub struct ImageHandle<H> {
    name: String,
    path: PathBuf,
    handle: H,
    info: ImageInfo,
}

impl<H> ImageHandle<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the cache artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Info captured when the image was opened.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

// =============================================================================
// ImageRegistry
// =============================================================================

/// Registry mapping logical names to attached engine handles.
pub struct ImageRegistry<E: ImageEngine> {
    engine: Arc<E>,

    resolver: NameResolver,

    /// Extension appended to names to find their artifacts
    extension: String,

    /// Opened images indexed by name
    images: RwLock<HashMap<String, Arc<ImageHandle<E::Handle>>>>,

    /// In-flight opens for singleflight pattern
    in_flight: Mutex<HashMap<String, Arc<InFlightState<E::Handle>>>>,
}

type OpenResult<H> = Result<Arc<ImageHandle<H>>, ImageError>;

/// State for an in-flight open operation.
struct InFlightState<H> {
    notify: Notify,

    /// Set once the leader is gone, with or without a result
    finished: AtomicBool,
    result: Mutex<Option<OpenResult<H>>>,
}

impl<H> InFlightState<H> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            finished: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    /// `None` while the open is running; `Some(None)` if the leader was
    /// dropped before finishing.
    fn outcome(&self) -> Option<Option<OpenResult<H>>> {
        if !self.finished.load(Ordering::Acquire) {
            return None;
        }
        let result = lock(&self.result).clone();
        Some(result)
    }
}

/// Held by the leader of an open. Dropping it, on completion or when the
/// leader's future is cancelled, clears the in-flight entry and wakes waiters.
struct InFlightGuard<'a, H> {
    in_flight: &'a Mutex<HashMap<String, Arc<InFlightState<H>>>>,
    name: &'a str,
    state: Arc<InFlightState<H>>,
}

impl<H> InFlightGuard<'_, H> {
    fn complete(&self, result: OpenResult<H>) {
        *lock(&self.state.result) = Some(result);
    }
}

impl<H> Drop for InFlightGuard<'_, H> {
    fn drop(&mut self) {
        {
            let mut in_flight = lock(self.in_flight);
            if in_flight
                .get(self.name)
                .is_some_and(|current| Arc::ptr_eq(current, &self.state))
            {
                in_flight.remove(self.name);
            }
        }
        self.state.finished.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: ImageEngine> ImageRegistry<E> {
    pub fn new(engine: Arc<E>, resolver: NameResolver) -> Self {
        Self::with_extension(engine, resolver, DEFAULT_CACHE_EXTENSION)
    }

    pub fn with_extension(
        engine: Arc<E>,
        resolver: NameResolver,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            resolver,
            extension: extension.into(),
            images: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Get an image, opening it on first access.
    ///
    /// `name` is a cleaned, root-relative name without extension. If the
    /// request leading an open is cancelled, one of its waiters takes over.
    pub async fn get(&self, name: &str) -> Result<Arc<ImageHandle<E::Handle>>, ImageError> {
        loop {
            if let Some(image) = self.images.read().await.get(name) {
                return Ok(image.clone());
            }

            let (state, leader) = {
                let mut in_flight = lock(&self.in_flight);
                let existing = in_flight.get(name).cloned();
                match existing {
                    Some(state) => (state, false),
                    None => {
                        let state = Arc::new(InFlightState::new());
                        in_flight.insert(name.to_string(), Arc::clone(&state));
                        (state, true)
                    }
                }
            };

            if leader {
                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    name,
                    state,
                };

                // Another leader may have finished between the lookup above
                // and registering this open.
                let opened = self.images.read().await.get(name).cloned();
                let result = match opened {
                    Some(image) => Ok(image),
                    None => self.open_image(name).await,
                };

                if let Ok(ref image) = result {
                    self.images
                        .write()
                        .await
                        .insert(name.to_string(), image.clone());
                }
                guard.complete(result.clone());
                return result;
            }

            // Register interest before checking, so a notify between the
            // check and the wait is not lost.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = match state.outcome() {
                Some(outcome) => outcome,
                None => {
                    notified.await;
                    state.outcome().flatten()
                }
            };
            if let Some(result) = outcome {
                return result;
            }
            debug!(name, "open abandoned by its leader, retrying");
        }
    }

    async fn open_image(&self, name: &str) -> Result<Arc<ImageHandle<E::Handle>>, ImageError> {
        let path = self.resolver.path(name, &self.extension)?;
        let mut handle = self.engine.open(&path).await?;

        if let Err(e) = self.engine.attach(&mut handle).await {
            self.close_quietly(handle, name).await;
            return Err(match e {
                EngineError::NotFound(_) => ImageError::NotFound(name.to_string()),
                other => other.into(),
            });
        }

        let info = match self.engine.info(&handle).await {
            Ok(info) => info,
            Err(e) => {
                self.close_quietly(handle, name).await;
                return Err(e.into());
            }
        };

        info!(
            name,
            path = %path.display(),
            width = info.width,
            height = info.height,
            "opened image"
        );

        Ok(Arc::new(ImageHandle {
            name: name.to_string(),
            path,
            handle,
            info,
        }))
    }

    /// Info snapshot of an image.
    pub async fn info(&self, name: &str) -> Result<ImageInfo, ImageError> {
        Ok(self.get(name).await?.info().clone())
    }

    /// Render a region of an image.
    ///
    /// A read failure discards the handle; the next access reopens it.
    /// Request-level failures (origin outside the image, zoom, encoding)
    /// keep it.
    pub async fn render(
        &self,
        name: &str,
        region: PixelRegion,
        zoom: i32,
    ) -> Result<Bytes, ImageError> {
        let image = self.get(name).await?;

        match self.engine.render_tile(image.handle(), region, zoom).await {
            Ok(data) => Ok(data),
            Err(e) if !e.is_handle_failure() => Err(e.into()),
            Err(e) => {
                warn!(name, error = %e, "render failed, discarding handle");
                self.discard(name, image).await;
                Err(e.into())
            }
        }
    }

    /// Drop the handle for `name` if it is still the registered one.
    async fn discard(&self, name: &str, image: Arc<ImageHandle<E::Handle>>) {
        {
            let mut images = self.images.write().await;
            if images
                .get(name)
                .is_some_and(|current| Arc::ptr_eq(current, &image))
            {
                images.remove(name);
            }
        }
        self.release(image).await;
    }

    /// Close a handle once no request holds it any more.
    async fn release(&self, image: Arc<ImageHandle<E::Handle>>) -> bool {
        match Arc::try_unwrap(image) {
            Ok(image) => {
                self.close_quietly(image.handle, &image.name).await;
                true
            }
            // Still referenced by an in-flight request; dropped with the last one.
            Err(_) => false,
        }
    }

    async fn close_quietly(&self, handle: E::Handle, name: &str) {
        if let Err(e) = self.engine.close(handle).await {
            warn!(name, error = %e, "failed to close image handle");
        }
    }

    /// Number of open images.
    pub async fn cached_count(&self) -> usize {
        self.images.read().await.len()
    }

    /// Close every open image.
    ///
    /// Returns the number of images removed.
    pub async fn close_all(&self) -> usize {
        let images: Vec<_> = self.images.write().await.drain().map(|(_, v)| v).collect();
        let count = images.len();
        for image in images {
            self.release(image).await;
        }
        debug!(count, "closed all images");
        count
    }
}

// =============================================================================
// Tests
// =============================================================================
