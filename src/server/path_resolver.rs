//! Lexical normalization of request paths for static file lookup.
//!
//! Works purely on the string: no filesystem access, no symlink resolution.
//! The result is either a rooted path that cannot climb above `/`, or a
//! rejection.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathRejection {
    #[error("path escapes the document root")]
    EscapesRoot,
}

/// Normalize a decoded request path.
///
/// Control characters (including NUL) are removed from every segment, empty
/// segments and `.` are dropped, and `..` removes the previous segment. A
/// `..` with nothing left to remove is rejected.
pub fn resolve_request_path(path: &str) -> Result<String, PathRejection> {
    let mut stack: Vec<String> = Vec::new();

    for raw in path.split('/') {
        let segment: String = raw.chars().filter(|c| !c.is_ascii_control()).collect();
        match segment.as_str() {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(PathRejection::EscapesRoot);
                }
            }
            _ => stack.push(segment),
        }
    }

    Ok(format!("/{}", stack.join("/")))
}
