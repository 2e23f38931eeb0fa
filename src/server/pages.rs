//! HTML pages for directory listings and image metadata.
//!
//! Pages are plain server-rendered HTML. The image page embeds its viewer
//! configuration as JSON so a client-side viewer can pick it up.

use super::handlers::{ImageResponse, IndexItem, IndexResponse, PREVIEW_HEIGHT, PREVIEW_WIDTH};

/// Escape HTML special characters to prevent XSS attacks.
fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

fn link(item: &IndexItem) -> String {
    format!(
        r#"<a href="{}">{}</a>"#,
        html_escape(&item.url),
        html_escape(&item.title)
    )
}

fn page(title: &str, breadcrumb: &[IndexItem], body: &str) -> String {
    let crumbs: Vec<String> = breadcrumb.iter().map(link).collect();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 2em; background: #1a1a2e; color: #eee; }}
        a {{ color: #8ab4f8; }}
        nav {{ margin-bottom: 1em; }}
        ul.images {{ list-style: none; padding: 0; display: flex; flex-wrap: wrap; gap: 1em; }}
        ul.images img {{ display: block; max-width: {pw}px; background: #000; }}
    </style>
</head>
<body>
<nav>{crumbs}</nav>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = html_escape(title),
        pw = PREVIEW_WIDTH,
        crumbs = crumbs.join(" / "),
        body = body,
    )
}

/// Render a directory listing.
pub fn index_html(index: &IndexResponse) -> String {
    let mut body = String::new();

    if !index.directories.is_empty() {
        body.push_str("<h2>Directories</h2>\n<ul>\n");
        for dir in &index.directories {
            body.push_str(&format!("<li>{}</li>\n", link(dir)));
        }
        body.push_str("</ul>\n");
    }

    if !index.images.is_empty() {
        body.push_str("<h2>Images</h2>\n<ul class=\"images\">\n");
        for image in &index.images {
            let preview = match &image.preview_url {
                Some(url) => format!(
                    r#"<img src="{}" width="{}" height="{}" alt="{}" loading="lazy">"#,
                    html_escape(url),
                    PREVIEW_WIDTH,
                    PREVIEW_HEIGHT,
                    html_escape(&image.item.title)
                ),
                None => String::new(),
            };
            body.push_str(&format!(
                "<li><a href=\"{}\">{}{}</a></li>\n",
                html_escape(&image.item.url),
                preview,
                html_escape(&image.item.title)
            ));
        }
        body.push_str("</ul>\n");
    }

    if index.directories.is_empty() && index.images.is_empty() {
        body.push_str("<p>No images.</p>\n");
    }

    page(&index.title, &index.breadcrumb, &body)
}

/// Render the metadata page of one image.
pub fn image_html(image: &ImageResponse) -> String {
    // Keep `</script>` sequences out of the embedded JSON
    let config = serde_json::to_string(&image.config)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/");

    let preview = format!(
        "{}?w={}&h={}&x={}&y={}&zoom=0",
        image.config.tiles_url,
        PREVIEW_WIDTH,
        PREVIEW_HEIGHT,
        image.config.image_width / 2,
        image.config.image_height / 2
    );

    let body = format!(
        r#"<p>{width} &times; {height} pixels, {bpp} bits per pixel, {format}</p>
<img src="{preview}" width="{pw}" height="{ph}" alt="{title}">
<script type="application/json" id="image-config">{config}</script>
"#,
        width = image.info.width,
        height = image.info.height,
        bpp = image.info.bits_per_pixel,
        format = image.info.format,
        preview = html_escape(&preview),
        pw = PREVIEW_WIDTH,
        ph = PREVIEW_HEIGHT,
        title = html_escape(&image.title),
        config = config,
    );

    let mut breadcrumb = super::handlers::breadcrumb(&image.name);
    breadcrumb.pop();
    page(&image.title, &breadcrumb, &body)
}
