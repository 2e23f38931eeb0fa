use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::engine::{CacheStatus, ImageEngine, ImageInfo, ImageParams};
use crate::error::CacheError;
use crate::source::{SourceImage, SourceKind};
use crate::tile::PixelRegion;

/// What to do with an existing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Attach the artifact as-is
    Open,
    /// Rebuild the artifact from its sources
    Update,
}

/// Pick an action from the artifact's freshness.
pub fn decide(status: CacheStatus, force: bool) -> CacheAction {
    match status {
        CacheStatus::Fresh if !force => CacheAction::Open,
        _ => CacheAction::Update,
    }
}

/// Options for [`refresh`].
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Rebuild even when the artifact is fresh
    pub force: bool,

    pub params: ImageParams,

    /// Render one region from the refreshed artifact
    pub tile: Option<(PixelRegion, i32)>,
}

/// Result of refreshing one source.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub name: String,
    pub cache_path: PathBuf,

    /// Freshness before the refresh (not checked for artifact inputs)
    pub status: Option<CacheStatus>,

    pub action: CacheAction,
    pub info: ImageInfo,

    /// Encoded region, when one was requested
    pub tile: Option<Bytes>,
}

/// Bring the cache artifact of `source` up to date.
///
/// Artifact inputs are only attached. The handle is always closed, also
/// when a step fails.
pub async fn refresh<E>(
    engine: &E,
    source: &SourceImage,
    options: &RefreshOptions,
) -> Result<RefreshOutcome, CacheError>
where
    E: ImageEngine + ?Sized,
{
    let mut handle = engine.open(&source.cache_path).await?;
    let result = refresh_handle(engine, &mut handle, source, options).await;

    if let Err(e) = engine.close(handle).await {
        warn!(path = %source.cache_path.display(), error = %e, "failed to close cache handle");
    }
    result
}

async fn refresh_handle<E>(
    engine: &E,
    handle: &mut E::Handle,
    source: &SourceImage,
    options: &RefreshOptions,
) -> Result<RefreshOutcome, CacheError>
where
    E: ImageEngine + ?Sized,
{
    let (status, action) = match source.kind {
        SourceKind::CacheArtifact => (None, CacheAction::Open),
        SourceKind::RawSource => {
            let status = engine.status(handle, &source.parts).await.map_err(|e| {
                CacheError::Status {
                    path: source.cache_path.clone(),
                    source: e,
                }
            })?;
            (Some(status), decide(status, options.force))
        }
    };

    match action {
        CacheAction::Open => {
            debug!(name = %source.name, ?status, "opening cache");
            engine.attach(handle).await?;
        }
        CacheAction::Update => {
            info!(
                name = %source.name,
                status = %status.map_or("unknown".to_string(), |s| s.to_string()),
                force = options.force,
                "updating cache"
            );
            engine
                .update(handle, &source.parts, &options.params)
                .await?;
        }
    }

    let info = engine.info(handle).await?;

    let tile = match options.tile {
        Some((region, zoom)) => Some(engine.render_tile(handle, region, zoom).await?),
        None => None,
    };

    Ok(RefreshOutcome {
        name: source.name.clone(),
        cache_path: source.cache_path.clone(),
        status,
        action,
        info,
        tile,
    })
}
