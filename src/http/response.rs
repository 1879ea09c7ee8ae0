//! Renderable results.
//!
//! # Responsibilities
//! - Define the `Render` capability invoked for successful dispatches
//! - Provide `View`, a buffered body or a 301/302 redirect
//! - Map file extensions to content types for file-backed views

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::request::RequestHead;

/// Extension to content type, for static and file-backed bodies.
pub const CONTENT_TYPES: &[(&str, &str)] = &[
    (".bz", "application/x-bzip"),
    (".bz2", "application/x-bzip2"),
    (".css", "text/css"),
    (".csv", "text/csv"),
    (".doc", "application/msword"),
    (".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    (".gif", "image/gif"),
    (".htm", "text/html"),
    (".html", "text/html"),
    (".ico", "image/x-icon"),
    (".jar", "application/java-archive"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".js", "application/javascript"),
    (".json", "application/json"),
    (".odp", "application/vnd.oasis.opendocument.presentation"),
    (".ods", "application/vnd.oasis.opendocument.spreadsheet"),
    (".odt", "application/vnd.oasis.opendocument.text"),
    (".otf", "font/otf"),
    (".png", "image/png"),
    (".pdf", "application/pdf"),
    (".ppt", "application/vnd.ms-powerpoint"),
    (".pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    (".rar", "application/x-rar-compressed"),
    (".rtf", "application/rtf"),
    (".sh", "application/x-sh"),
    (".svg", "image/svg+xml"),
    (".tar", "application/x-tar"),
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    (".ts", "application/typescript"),
    (".ttf", "font/ttf"),
    (".txt", "text/plain"),
    (".text", "text/plain"),
    (".log", "text/plain"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".xhtml", "application/xhtml+xml"),
    (".xls", "application/vnd.ms-excel"),
    (".xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    (".xml", "application/xml"),
    (".zip", "application/zip"),
    (".7z", "application/x-7z-compressed"),
];

/// Content type for a file extension, with or without the leading dot.
pub fn content_type_for(ext: &str) -> Option<&'static str> {
    let ext = ext.strip_prefix('.').unwrap_or(ext);
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| known[1..].eq_ignore_ascii_case(ext))
        .map(|(_, content_type)| *content_type)
}

/// A successful dispatch result that knows how to write itself.
pub trait Render: Send {
    fn render(&self, request: &RequestHead) -> Response;
}

/// Buffered response body, or a redirect when the status is 301 or 302.
#[derive(Debug, Clone)]
pub struct View {
    pub buffer: Vec<u8>,
    pub status: StatusCode,
    pub content_type: String,
    /// Redirect target for 301/302.
    pub path: String,
}

impl View {
    pub fn new(status: StatusCode, content_type: impl Into<String>, buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: buffer.into(),
            status,
            content_type: content_type.into(),
            path: String::new(),
        }
    }

    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::OK, "text/html; charset=UTF-8", body)
    }

    pub fn text(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::OK, "text/plain; charset=UTF-8", body)
    }

    /// 200 view of a file's bytes, typed by the file name's extension.
    pub fn file(name: &str, body: impl Into<Vec<u8>>) -> Self {
        let content_type = std::path::Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(content_type_for)
            .unwrap_or("application/octet-stream");
        Self::new(StatusCode::OK, content_type, body)
    }

    /// 301 Moved Permanently.
    pub fn permanent_redirect(path: impl Into<String>) -> Self {
        Self::redirect(StatusCode::MOVED_PERMANENTLY, path)
    }

    /// 302 Found.
    pub fn temporary_redirect(path: impl Into<String>) -> Self {
        Self::redirect(StatusCode::FOUND, path)
    }

    fn redirect(status: StatusCode, path: impl Into<String>) -> Self {
        Self {
            buffer: Vec::new(),
            status,
            content_type: String::new(),
            path: path.into(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
    }

    pub fn boxed(self) -> Box<dyn Render> {
        Box::new(self)
    }
}

impl Render for View {
    fn render(&self, request: &RequestHead) -> Response {
        if self.is_redirect() {
            return match HeaderValue::from_str(&self.path) {
                Ok(location) => (self.status, [(header::LOCATION, location)]).into_response(),
                Err(_) => {
                    tracing::warn!(request_id = %request.request_id(), target = %self.path, "Invalid redirect target");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            };
        }

        let mut response = Response::new(Body::from(self.buffer.clone()));
        *response.status_mut() = self.status;
        if let Ok(content_type) = HeaderValue::from_str(&self.content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}
