//! Static file short-circuit.
//!
//! GET and HEAD requests whose path names an existing file under the static
//! root are answered directly; everything else goes to a worker.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::path_resolver::resolve_request_path;

/// Outcome of looking a request path up under the static root.
#[derive(Debug)]
pub enum StaticLookup {
    Found(StaticFile),
    /// The path tried to leave the root.
    Rejected,
    /// Not a file under the root; hand the request to a worker.
    Missing,
}

/// An opened file, streamed to the client in chunks.
#[derive(Debug)]
pub struct StaticFile {
    pub path: PathBuf,
    pub file: File,
    pub len: u64,
    pub content_type: &'static str,
}

impl StaticFile {
    pub fn into_response(self, head_only: bool) -> Response {
        let length = self.len;
        let body = if head_only {
            Body::empty()
        } else {
            Body::from_stream(ReaderStream::new(self.file))
        };
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, self.content_type.to_string()),
                (header::CONTENT_LENGTH, length.to_string()),
            ],
            body,
        )
            .into_response()
    }
}

/// Look `uri_path` (still percent-encoded) up under `root`.
pub async fn lookup(root: &Path, uri_path: &str) -> StaticLookup {
    // Undecodable paths are the application's problem
    let Ok(decoded) = urlencoding::decode(uri_path) else {
        return StaticLookup::Missing;
    };
    let Ok(relative) = resolve_request_path(&decoded) else {
        tracing::debug!(path = uri_path, "Rejected path outside static root");
        return StaticLookup::Rejected;
    };
    if relative == "/" {
        return StaticLookup::Missing;
    }

    let full = root.join(relative.trim_start_matches('/'));
    let file = match File::open(&full).await {
        Ok(file) => file,
        Err(_) => return StaticLookup::Missing,
    };
    // Metadata of the open handle, not of the path
    match file.metadata().await {
        Ok(meta) if meta.is_file() => StaticLookup::Found(StaticFile {
            content_type: content_type_for(&full),
            path: full,
            file,
            len: meta.len(),
        }),
        Ok(_) => StaticLookup::Missing,
        Err(e) => {
            tracing::debug!(path = %full.display(), error = %e, "Static file unreadable");
            StaticLookup::Missing
        }
    }
}

/// MIME type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/logo.png"), b"\x89PNG").unwrap();
        std::fs::write(dir.path().join("hello world.txt"), b"hi").unwrap();
        dir
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_existing_file_is_found() {
        let dir = site();
        let StaticLookup::Found(file) = lookup(dir.path(), "/images/logo.png").await else {
            panic!("expected file");
        };
        assert_eq!(file.len, 4);
        assert_eq!(file.content_type, "image/png");
        assert_eq!(body_of(file.into_response(false)).await, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_large_file_streams_in_full() {
        let dir = site();
        let contents: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("big.bin"), &contents).unwrap();

        let StaticLookup::Found(file) = lookup(dir.path(), "/big.bin").await else {
            panic!("expected file");
        };
        let response = file.into_response(false);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "300000");
        assert_eq!(body_of(response).await, contents);
    }

    #[tokio::test]
    async fn test_head_sends_length_without_body() {
        let dir = site();
        let StaticLookup::Found(file) = lookup(dir.path(), "/hello%20world.txt").await else {
            panic!("expected file");
        };
        let response = file.into_response(true);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "2");
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_percent_encoded_path_is_decoded() {
        let dir = site();
        assert!(matches!(
            lookup(dir.path(), "/hello%20world.txt").await,
            StaticLookup::Found(_)
        ));
    }

    #[tokio::test]
    async fn test_escape_is_rejected() {
        let dir = site();
        assert!(matches!(
            lookup(dir.path(), "/../secret").await,
            StaticLookup::Rejected
        ));
        assert!(matches!(
            lookup(dir.path(), "/images/%2e%2e/%2e%2e/secret").await,
            StaticLookup::Rejected
        ));
    }

    #[tokio::test]
    async fn test_missing_and_directories_fall_through() {
        let dir = site();
        assert!(matches!(
            lookup(dir.path(), "/nope.css").await,
            StaticLookup::Missing
        ));
        assert!(matches!(
            lookup(dir.path(), "/images").await,
            StaticLookup::Missing
        ));
        assert!(matches!(lookup(dir.path(), "/").await, StaticLookup::Missing));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            content_type_for(Path::new("a/INDEX.HTML")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for(Path::new("a.woff2")), "font/woff2");
        assert_eq!(
            content_type_for(Path::new("Makefile")),
            "application/octet-stream"
        );
    }
}
