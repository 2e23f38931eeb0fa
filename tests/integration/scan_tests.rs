//! Source discovery and multipart assembly tests.
//!
//! Tests verify:
//! - Recursive scans skip hidden entries and non-images
//! - Artifact filtering
//! - Multipart mosaics build into one artifact that serves tiles

use axum::http::StatusCode;
use regex::Regex;

use zoomtile::cache::{refresh, RefreshOptions};
use zoomtile::engine::{parse_background, ImageFormat, ImageParams, PngEngine};
use zoomtile::error::AssemblyError;
use zoomtile::source::{assemble_parts, scan, CacheFilter, SourceKind};

use super::test_utils::{
    build_cache, coordinate_pixel, decode_png, write_png, write_solid_png, TestServer,
};

const PARTS: &str = r"^(.+)_(\d+)_(\d+)\.(png)$";

fn names(images: &[zoomtile::SourceImage], root: &std::path::Path) -> Vec<String> {
    images
        .iter()
        .map(|image| {
            std::path::Path::new(&image.name)
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

#[tokio::test]
async fn test_scan_tree() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path();
    write_png(&root.join("a.png"), 8, 8, coordinate_pixel);
    write_png(&root.join("sub/b.png"), 8, 8, coordinate_pixel);
    write_png(&root.join("sub/deeper/c.png"), 8, 8, coordinate_pixel);
    write_png(&root.join(".hidden/d.png"), 8, 8, coordinate_pixel);
    write_png(&root.join("sub/.e.png"), 8, 8, coordinate_pixel);
    std::fs::write(root.join("notes.txt"), b"hello").unwrap();
    build_cache(&root.join("sub/b.png")).await;

    let engine = PngEngine::new();

    let sources = scan(&engine, root, CacheFilter::Exclude).await.unwrap();
    assert_eq!(
        names(&sources, root),
        vec!["a.png", "sub/b.png", "sub/deeper/c.png"]
    );
    assert!(sources.iter().all(|s| s.kind == SourceKind::RawSource));
    assert_eq!(sources[1].cache_path, root.join("sub/b.cache"));

    let artifacts = scan(&engine, root, CacheFilter::Only).await.unwrap();
    assert_eq!(names(&artifacts, root), vec!["sub/b.cache"]);
    assert_eq!(artifacts[0].format, ImageFormat::Cache);

    let all = scan(&engine, root, CacheFilter::Include).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_scan_missing_root() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = scan(&PngEngine::new(), &dir.path().join("nope"), CacheFilter::Exclude).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_multipart_mosaic_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path();
    let red = [255, 0, 0, 255];
    let blue = [0, 0, 255, 255];
    let green = [0, 255, 0, 255];
    write_solid_png(&root.join("mosaic_1_1.png"), 10, 10, red);
    write_solid_png(&root.join("mosaic_1_2.png"), 10, 10, blue);
    write_solid_png(&root.join("mosaic_2_2.png"), 10, 10, green);

    let engine = PngEngine::new();
    let paths = vec![
        root.join("mosaic_2_2.png"),
        root.join("mosaic_1_1.png"),
        root.join("mosaic_1_2.png"),
        root.join("unrelated.png"),
    ];
    let source = assemble_parts(&engine, &paths, &Regex::new(PARTS).unwrap())
        .await
        .unwrap();

    assert_eq!((source.parts.rows(), source.parts.cols()), (2, 2));
    assert!(source.parts.get(1, 0).is_none());
    assert_eq!(source.cache_path, root.join("mosaic.cache"));

    let background = parse_background("010203ff").unwrap();
    let options = RefreshOptions {
        params: ImageParams {
            background: Some(background),
        },
        ..RefreshOptions::default()
    };
    let outcome = refresh(&engine, &source, &options).await.unwrap();
    assert_eq!((outcome.info.width, outcome.info.height), (20, 20));

    let server = TestServer::new(root);
    let response = server.get("/mosaic.png?tile-x=0&tile-y=0").await;
    assert_eq!(response.status, StatusCode::OK);

    let tile = decode_png(&response.body);
    assert_eq!(tile.get_pixel(5, 5).0, red);
    assert_eq!(tile.get_pixel(15, 5).0, blue);
    assert_eq!(tile.get_pixel(5, 15).0, background);
    assert_eq!(tile.get_pixel(15, 15).0, green);
    assert_eq!(tile.get_pixel(25, 5).0, [0, 0, 0, 0]);

    // A second pass finds the mosaic fresh
    let again = refresh(&engine, &source, &options).await.unwrap();
    assert_eq!(again.action, zoomtile::CacheAction::Open);
}

#[tokio::test]
async fn test_multipart_errors() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path();
    write_solid_png(&root.join("a_1_1.png"), 4, 4, [0, 0, 0, 255]);
    write_solid_png(&root.join("b_1_2.png"), 4, 4, [0, 0, 0, 255]);
    std::fs::write(root.join("c_1_1.png"), b"not a png").unwrap();

    let engine = PngEngine::new();
    let pattern = Regex::new(PARTS).unwrap();

    let err = assemble_parts(
        &engine,
        &[root.join("a_1_1.png"), root.join("b_1_2.png")],
        &pattern,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AssemblyError::MixedNames { .. }));

    // Same base name, but the second part cannot be read.
    let missing = root.join("a_1_2.png");
    let err = assemble_parts(&engine, &[root.join("a_1_1.png"), missing.clone()], &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Sniff { ref path, .. } if *path == missing));

    let err = assemble_parts(&engine, &[root.join("c_1_1.png")], &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, AssemblyError::NotAnImage { .. }));

    let err = assemble_parts(&engine, &[root.join("plain.png")], &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Empty));

    let err = assemble_parts(
        &engine,
        &[root.join("a_1_1.png")],
        &Regex::new(r"(.+)_(\d+)").unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AssemblyError::InvalidPattern(2)));
}
