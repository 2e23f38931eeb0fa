//! API integration tests for listing, metadata and tile retrieval.
//!
//! Tests verify:
//! - Tiles are only served once a cache artifact exists
//! - Tile and viewport addressing at zoom 0, out and in
//! - Listing and metadata in JSON and HTML
//! - HTTP response codes and headers

use axum::body::Body;
use axum::http::{Request, StatusCode};

use zoomtile::tile::TileLimits;

use super::test_utils::{
    build_cache, coordinate_pixel, decode_png, write_png, write_solid_png, TestServer,
};

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_tile_requires_cache_artifact() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("maps/world.png");
    write_png(&source, 300, 200, coordinate_pixel);

    let server = TestServer::new(dir.path());

    let response = server.get("/maps/world.png?tile-x=0&tile-y=0&zoom=0").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "not_found");

    build_cache(&source).await;

    let response = server.get_json("/maps/world").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["config"]["image_width"], 300);

    let response = server.get("/maps/world.png?tile-x=0&tile-y=0&zoom=0").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(response.header("cache-control"), Some("public, max-age=3600"));
    assert_eq!(response.header("x-tile-cache-hit"), Some("false"));

    let tile = decode_png(&response.body);
    assert_eq!(tile.dimensions(), (256, 256));
    assert_eq!(tile.get_pixel(10, 20).0, coordinate_pixel(10, 20));
    assert_eq!(tile.get_pixel(255, 199).0, coordinate_pixel(255, 199));
    assert_eq!(tile.get_pixel(0, 200).0, TRANSPARENT);
}

#[tokio::test]
async fn test_tile_cache_hit() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let uri = "/world.png?t=1700000000&tile-x=0&tile-y=0&zoom=0";

    let first = server.get(uri).await;
    let second = server.get(uri).await;
    assert_eq!(first.header("x-tile-cache-hit"), Some("false"));
    assert_eq!(second.header("x-tile-cache-hit"), Some("true"));
    assert_eq!(first.body, second.body);
    assert_eq!(server.registry.cached_count().await, 1);
}

#[tokio::test]
async fn test_tile_grid_offset() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get("/world.png?tile-x=1&tile-y=0").await;
    assert_eq!(response.status, StatusCode::OK);

    let tile = decode_png(&response.body);
    assert_eq!(tile.get_pixel(0, 0).0, coordinate_pixel(256, 0));
    assert_eq!(tile.get_pixel(43, 5).0, coordinate_pixel(299, 5));
    assert_eq!(tile.get_pixel(44, 5).0, TRANSPARENT);
}

#[tokio::test]
async fn test_tile_zoom_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("big.png");
    write_solid_png(&source, 600, 400, [10, 200, 30, 255]);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get("/big.png?tile-x=0&tile-y=0&zoom=1").await;
    assert_eq!(response.status, StatusCode::OK);

    let tile = decode_png(&response.body);
    assert_eq!(tile.dimensions(), (256, 256));
    assert_eq!(tile.get_pixel(10, 10).0, [10, 200, 30, 255]);
    assert_eq!(tile.get_pixel(255, 199).0, [10, 200, 30, 255]);
    assert_eq!(tile.get_pixel(10, 200).0, TRANSPARENT);
}

#[tokio::test]
async fn test_viewport_centered() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get("/world.png?w=100&h=50&x=150&y=100&zoom=0").await;
    assert_eq!(response.status, StatusCode::OK);

    let view = decode_png(&response.body);
    assert_eq!(view.dimensions(), (100, 50));
    assert_eq!(view.get_pixel(0, 0).0, coordinate_pixel(100, 75));
    assert_eq!(view.get_pixel(99, 49).0, coordinate_pixel(199, 124));
}

#[tokio::test]
async fn test_viewport_zoom_in() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let limits = TileLimits {
        zoom_min: -2,
        ..TileLimits::default()
    };
    let server = TestServer::with_limits(dir.path(), limits);
    let response = server.get("/world.png?w=4&h=4&x=10&y=10&zoom=-1").await;
    assert_eq!(response.status, StatusCode::OK);

    let view = decode_png(&response.body);
    assert_eq!(view.dimensions(), (4, 4));
    assert_eq!(view.get_pixel(0, 0).0, coordinate_pixel(4, 4));
    assert_eq!(view.get_pixel(1, 1).0, coordinate_pixel(4, 4));
    assert_eq!(view.get_pixel(2, 0).0, coordinate_pixel(5, 4));
    assert_eq!(view.get_pixel(3, 3).0, coordinate_pixel(5, 5));
}

#[tokio::test]
async fn test_tile_outside_image_is_server_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get("/world.png?tile-x=5&tile-y=0").await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "engine_error");

    // The handle stays usable
    let response = server.get("/world.png?tile-x=0&tile-y=0").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(server.registry.cached_count().await, 1);
}

#[tokio::test]
async fn test_encoded_names() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("my maps/a b.png");
    write_png(&source, 64, 64, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get("/my%20maps/a%20b.png?tile-x=0&tile-y=0").await;
    assert_eq!(response.status, StatusCode::OK);
}

// =============================================================================
// Parameter Validation
// =============================================================================

#[tokio::test]
async fn test_invalid_tile_parameters() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let cases = [
        "/world.png?tile-x=abc",
        "/world.png?zoom=0",
        "/world.png",
        "/world.png?tile-x=0&w=10&h=10",
        "/world.png?w=10",
        "/world.png?w=4000&h=4000",
        "/world.png?tile-x=0&zoom=9",
        "/world.png?tile-x=0&zoom=-1",
        "/world.png?zoom=1&zoom=2&tile-x=0",
    ];

    for uri in cases {
        let response = server.get(uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(response.json()["error"], "invalid_request", "{}", uri);
    }
}

#[tokio::test]
async fn test_empty_viewport_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    assert_eq!(
        server.get("/world.png?tile-x=0&tile-y=0").await.status,
        StatusCode::OK
    );

    for uri in [
        "/world.png?w=0&h=0&x=1&y=1",
        "/world.png?w=0&h=100",
        "/world.png?w=100&h=0&zoom=2",
    ] {
        let response = server.get(uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(response.json()["error"], "invalid_request", "{}", uri);
    }

    // The open image is untouched
    assert_eq!(server.registry.cached_count().await, 1);
    let response = server.get("/world.png?w=10&h=10&x=5&y=5").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_area_limit_at_every_zoom() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let limits = TileLimits {
        zoom_min: -2,
        zoom_max: 6,
        max_area: 100 * 100,
        ..TileLimits::default()
    };
    let server = TestServer::with_limits(dir.path(), limits);

    for zoom in -2..=6 {
        let uri = format!("/world.png?w=101&h=100&x=50&y=50&zoom={}", zoom);
        let response = server.get(&uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
    }
    assert_eq!(server.registry.cached_count().await, 0);
}

// =============================================================================
// Listing and Metadata
// =============================================================================

#[tokio::test]
async fn test_listing_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("maps/world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    write_png(&dir.path().join("maps/raw.png"), 10, 10, coordinate_pixel);
    std::fs::create_dir_all(dir.path().join("maps/.hidden")).unwrap();
    std::fs::create_dir_all(dir.path().join("maps/nested")).unwrap();
    build_cache(&source).await;

    let server = TestServer::new(dir.path());

    let root = server.get_json("/").await;
    assert_eq!(root.status, StatusCode::OK);
    let root = root.json();
    assert_eq!(root["name"], "");
    assert_eq!(root["title"], "/");
    assert_eq!(root["directories"][0]["name"], "maps/");
    assert_eq!(root["directories"][0]["url"], "/maps/");
    assert_eq!(root["images"].as_array().unwrap().len(), 0);

    let maps = server.get_json("/maps/").await.json();
    assert_eq!(maps["title"], "maps");
    let directories: Vec<_> = maps["directories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(directories, vec!["maps/nested/"]);

    let images = maps["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["name"], "maps/world");
    assert_eq!(images[0]["url"], "/maps/world");
    assert_eq!(
        images[0]["preview_url"],
        "/maps/world.png?w=640&h=320&x=150&y=100&zoom=0"
    );
    assert_eq!(images[0]["info"]["width"], 300);

    let crumbs: Vec<_> = maps["breadcrumb"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["url"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(crumbs, vec!["/", "/maps/"]);

    // Without the trailing slash the directory is still listed
    let maps = server.get_json("/maps").await;
    assert_eq!(maps.status, StatusCode::OK);
    assert_eq!(maps.json()["images"][0]["name"], "maps/world");
}

#[tokio::test]
async fn test_listing_html_by_default() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("maps")).unwrap();

    let server = TestServer::new(dir.path());
    let response = server.get("/").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .header("content-type")
        .unwrap()
        .starts_with("text/html"));
    assert!(response.text().contains(r#"<a href="/maps/">maps</a>"#));

    let response = server
        .request(
            Request::builder()
                .uri("/")
                .header("accept", "text/html,application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(response
        .header("content-type")
        .unwrap()
        .starts_with("text/html"));
}

#[tokio::test]
async fn test_missing_directory_listing() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(dir.path());

    let response = server.get_json("/nowhere/").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_image_metadata() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("maps/world.png");
    write_png(&source, 300, 200, coordinate_pixel);
    build_cache(&source).await;

    let server = TestServer::new(dir.path());
    let response = server.get_json("/maps/world").await;
    assert_eq!(response.status, StatusCode::OK);

    let json = response.json();
    assert_eq!(json["name"], "maps/world");
    assert_eq!(json["title"], "world");
    assert_eq!(json["config"]["tiles_url"], "/maps/world.png");
    assert_eq!(json["config"]["tile_size"], 256);
    assert_eq!(json["config"]["zoom_min"], 0);
    assert_eq!(json["config"]["zoom_max"], 4);
    assert_eq!(json["config"]["image_height"], 200);
    assert!(json["config"]["tile_url"]
        .as_str()
        .unwrap()
        .contains("tile-x={x}"));
    assert_eq!(json["info"]["format"], "png");
    assert_eq!(json["info"]["bits_per_pixel"], 32);
    assert_eq!(json["info"]["cache"]["version"], 1);
    assert!(json["info"]["cache"]["blocks"].as_u64().unwrap() > 0);
    assert!(json["info"]["source"]["bytes"].as_u64().unwrap() > 0);

    let html = server.get("/maps/world").await;
    assert_eq!(html.status, StatusCode::OK);
    assert!(html.text().contains("300 &times; 200 pixels"));
    assert!(html.text().contains("image-config"));
}

#[tokio::test]
async fn test_metadata_without_source() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("world.png");
    write_png(&source, 30, 20, coordinate_pixel);
    build_cache(&source).await;
    std::fs::remove_file(&source).unwrap();

    let server = TestServer::new(dir.path());
    let json = server.get_json("/world").await.json();
    assert_eq!(json["info"]["width"], 30);
    assert!(json["info"].get("source").is_none());
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_image() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(dir.path());

    assert_eq!(server.get_json("/nothing").await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        server.get("/nothing.png?tile-x=0&tile-y=0").await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(server.get("/world.jpg").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_path_escape_forbidden() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(dir.path());

    let response = server.get("/maps/../../secret").await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json()["error"], "forbidden");
    assert_eq!(response.json()["status"], 403);

    let response = server.get("/%2e%2e/secret.png?tile-x=0").await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_non_get_not_implemented() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(dir.path());

    for method in ["POST", "PUT", "DELETE"] {
        let response = server
            .request(
                Request::builder()
                    .method(method)
                    .uri("/world.png?tile-x=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED, "{}", method);
    }

    // Method is checked before the query string is parsed
    let response = server
        .request(
            Request::builder()
                .method("POST")
                .uri("/world.png?zoom=1&zoom=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
}
