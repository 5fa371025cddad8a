//! The single catch-all handler: static files first, then a worker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use super::AppState;
use super::error::ApiError;
use super::static_files::{self, StaticLookup};
use crate::control::{RequestHead, WorkerRequest, WorkerResponse};

/// Headers that describe the proxy hop rather than the response.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

pub async fn forward(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method().clone();

    if let Some(root) = state.static_root.as_deref()
        && (method == Method::GET || method == Method::HEAD)
    {
        match static_files::lookup(root, request.uri().path()).await {
            StaticLookup::Found(file) => return file.into_response(method == Method::HEAD),
            StaticLookup::Rejected => {
                return ApiError::forbidden("path escapes the document root").into_response();
            }
            StaticLookup::Missing => {}
        }
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Request body rejected");
            return ApiError::payload_too_large(format!(
                "request body exceeds {} bytes or could not be read",
                state.max_body_size
            ))
            .into_response();
        }
    };

    let request = WorkerRequest::new(request_head(&parts), body.to_vec());
    match state.supervisor.dispatch(request).await {
        Ok(response) => worker_response(response),
        Err(e) => {
            tracing::warn!(error = %e, "Request failed");
            ApiError::from(e).into_response()
        }
    }
}

fn request_head(parts: &Parts) -> RequestHead {
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut head = RequestHead::new(parts.method.as_str(), uri);
    head.version = format!("{:?}", parts.version);
    head.headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            let value = value
                .to_str()
                .map(String::from)
                .unwrap_or_else(|_| String::from_utf8_lossy(value.as_bytes()).into_owned());
            (name.as_str().to_string(), value)
        })
        .collect();
    head.remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    head
}

fn worker_response(response: WorkerResponse) -> Response {
    let Ok(status) = StatusCode::from_u16(response.head.status) else {
        return ApiError::bad_gateway(format!(
            "worker returned invalid status {}",
            response.head.status
        ))
        .into_response();
    };

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in response.head.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "Dropping invalid header from worker"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ResponseHead;

    #[test]
    fn test_request_head_from_parts() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("http://localhost/search?q=rust")
            .header("accept", "text/html")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .body(())
            .unwrap();
        let (parts, ()) = request.into_parts();

        let head = request_head(&parts);
        assert_eq!(head.method, "POST");
        assert_eq!(head.uri, "/search?q=rust");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("Accept"), Some("text/html"));
        assert_eq!(
            head.headers.iter().filter(|(k, _)| k == "x-multi").count(),
            2
        );
        assert_eq!(head.remote_addr, None);
    }

    #[test]
    fn test_worker_response_filters_hop_headers() {
        let response = worker_response(WorkerResponse {
            head: ResponseHead::new(201)
                .with_header("Content-Type", "text/plain")
                .with_header("Connection", "close")
                .with_header("Set-Cookie", "a=1")
                .with_header("Set-Cookie", "b=2"),
            body: b"made".to_vec(),
        });
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_invalid_worker_status_is_bad_gateway() {
        let response = worker_response(WorkerResponse {
            head: ResponseHead::new(42),
            body: Vec::new(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
