//! zoomtile - A tile server for very large PNG images.
//!
//! This binary runs either the HTTP server or the cache maintenance tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zoomtile::{
    cache::{refresh, RefreshOptions, RefreshOutcome},
    config::{CacheConfig, Cli, Command, ServeConfig},
    engine::PngEngine,
    image::{ImageRegistry, NameResolver},
    server::create_router,
    source::{assemble_parts, scan, scan_file, SourceImage},
    tile::{TileCache, TileService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Cache(config) => run_cache(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    let limits = config.tile_limits();
    info!("Configuration:");
    info!("  Root: {}", config.root.display());
    info!(
        "  Tiles: {}px, zoom {}..={}, max area {}px",
        limits.tile_size, limits.zoom_min, limits.zoom_max, limits.max_area
    );
    info!(
        "  Tile cache: {}MB",
        config.tile_cache_bytes / (1024 * 1024)
    );

    let engine = Arc::new(PngEngine::new());
    let registry = Arc::new(ImageRegistry::new(
        engine,
        NameResolver::new(config.root.clone()),
    ));
    let tile_service = TileService::with_options(
        Arc::clone(&registry),
        limits,
        TileCache::with_capacity(config.tile_cache_bytes),
    );

    let router = create_router(tile_service, config.router_config());

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Browse images:");
    info!("    open http://{}/", addr);
    info!("");
    info!("  Fetch a tile directly:");
    info!("    curl http://{}/<name>.png?tile-x=0&tile-y=0&zoom=0", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let closed = registry.close_all().await;
    info!("Closed {} image(s)", closed);

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("zoomtile v{}", version);
}

/// Initialize logging with the appropriate level.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "zoomtile=debug,tower_http=debug"
    } else {
        "zoomtile=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Cache Command
// =============================================================================

async fn run_cache(config: CacheConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let options = match config.refresh_options() {
        Ok(options) => options,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = PngEngine::new();
    let sources = match collect_sources(&engine, &config).await {
        Ok(sources) => sources,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut failures = 0usize;
    for source in &sources {
        if let Err(e) = process_source(&engine, source, &options, &config).await {
            error!("{}: {}", source.name, e);
            failures += 1;
        }
    }

    info!(
        "Processed {} image(s), {} failed",
        sources.len(),
        failures
    );

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Turn the command line paths into sources.
///
/// Errors for individual paths are logged and counted; the command fails
/// only when nothing usable remains.
async fn collect_sources(
    engine: &PngEngine,
    config: &CacheConfig,
) -> Result<Vec<SourceImage>, String> {
    if let Some(pattern) = config.multipart_regex()? {
        let source = assemble_parts(engine, &config.paths, &pattern)
            .await
            .map_err(|e| format!("multipart: {}", e))?;
        info!(
            "Load multipart image {} from {} part(s) ({}x{} grid)",
            source.cache_path.display(),
            source.parts.parts().count(),
            source.parts.rows(),
            source.parts.cols()
        );
        return Ok(vec![source]);
    }

    let mut sources = Vec::new();
    let mut errors = 0usize;
    for path in &config.paths {
        if config.recursive && path.is_dir() {
            info!("{}...", path.display());
            match scan(engine, path, config.artifacts.into()).await {
                Ok(found) => sources.extend(found),
                Err(e) => {
                    error!("scan {}: {}", path.display(), e);
                    errors += 1;
                }
            }
            continue;
        }

        match scan_file(engine, path).await {
            Ok(Some(source)) => sources.push(source),
            Ok(None) => {
                error!("scan {}: not a recognized image", path.display());
                errors += 1;
            }
            Err(e) => {
                error!("scan {}: {}", path.display(), e);
                errors += 1;
            }
        }
    }

    if sources.is_empty() && errors > 0 {
        return Err(format!("no images to process ({} path error(s))", errors));
    }
    Ok(sources)
}

async fn process_source(
    engine: &PngEngine,
    source: &SourceImage,
    options: &RefreshOptions,
    config: &CacheConfig,
) -> Result<(), String> {
    debug!(name = %source.name, cache = %source.cache_path.display(), "processing");

    let outcome = refresh(engine, source, options)
        .await
        .map_err(|e| e.to_string())?;

    match outcome.status {
        Some(status) => info!(
            "{}: cache {:?} (status {})",
            source.name, outcome.action, status
        ),
        None => info!("{}: cache artifact", source.name),
    }
    print_summary(&outcome);

    if let (Some(path), Some(tile)) = (&config.tile_out, &outcome.tile) {
        write_tile(path, tile).await?;
        info!(
            "{}: render {}x{} tile at {}x{}@{} to {}",
            source.name,
            config.tile_width,
            config.tile_height,
            config.tile_x,
            config.tile_y,
            config.tile_zoom,
            path.display()
        );
    }

    Ok(())
}

fn print_summary(outcome: &RefreshOutcome) {
    let info = &outcome.info;
    println!("{}:", outcome.name);
    println!(
        "\tImage: {}x{}@{}",
        info.width, info.height, info.bits_per_pixel
    );
    println!(
        "\tCache {}: mtime={} bytes={} version={} blocks={}",
        outcome.cache_path.display(),
        info.cache.modified_time.to_rfc3339(),
        info.cache.bytes,
        info.cache.version,
        info.cache.blocks
    );
}

async fn write_tile(path: &Path, data: &[u8]) -> Result<(), String> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| format!("Write --tile-out={}: {}", path.display(), e))
}
