//! Request model handed to domain handlers.
//!
//! # Responsibilities
//! - Split the inbound request into an immutable head and a consumable body
//! - Normalise the path (`/a/b/` → `/a/b`, empty → `/`)
//! - Carry parsed form fields and uploads
//! - Apply the method-override form field
//!
//! # Design Decisions
//! - The head is cloned for the supervisor so error and render paths never
//!   wait on the dispatch task that owns the body

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, HeaderName, Method, Uri};
use std::borrow::Cow;
use std::net::SocketAddr;

/// Header carrying the request id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Everything about a request except its body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    /// Normalised path.
    pub path: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub request_id: Option<String>,
}

impl RequestHead {
    /// First value of a query-string parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or("unknown")
    }
}

/// Ordered form fields; a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, String)>,
}

impl Form {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(Cow<'a, str>, Cow<'a, str>)> for Form {
    fn from_iter<I: IntoIterator<Item = (Cow<'a, str>, Cow<'a, str>)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }
}

/// A file part of a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// The request as seen by [`Handler::main`](crate::mux::Handler::main).
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    body: Option<Body>,
    extensions: Extensions,
    pub(crate) form: Form,
    pub(crate) uploads: Vec<Upload>,
}

impl Request {
    pub fn from_http(request: axum::extract::Request) -> Self {
        let (parts, body) = request.into_parts();
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            head: RequestHead {
                path: normalize_path(parts.uri.path()),
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                remote_addr,
                request_id,
            },
            body: Some(body),
            extensions: parts.extensions,
            form: Form::default(),
            uploads: Vec::new(),
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn path(&self) -> &str {
        &self.head.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.head.query(name)
    }

    /// Fields parsed from an urlencoded or multipart body.
    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.get(name)
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    /// Raw body, when it was not consumed by form parsing.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Replace the method with a non-empty override field, if the form carries one.
    pub(crate) fn apply_method_override(&mut self, field: &str) -> bool {
        let Some(value) = self.form.get(field).map(str::trim) else {
            return false;
        };
        if value.is_empty() {
            return false;
        }
        match Method::from_bytes(value.to_ascii_uppercase().as_bytes()) {
            Ok(method) => {
                tracing::debug!(
                    request_id = %self.head.request_id(),
                    from = %self.head.method,
                    to = %method,
                    "Method overridden by form field"
                );
                self.head.method = method;
                true
            }
            Err(_) => {
                tracing::warn!(request_id = %self.head.request_id(), value, "Ignoring invalid method override");
                false
            }
        }
    }
}

/// Trim trailing slashes; an empty result becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, uri: &str) -> Request {
        Request::from_http(
            axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .header("x-request-id", "req-1")
                .body(Body::empty())
                .unwrap(),
        )
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/path/to/url/"), "/path/to/url");
        assert_eq!(normalize_path("/path//"), "/path");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_head_fields() {
        let req = request("GET", "/items/?page=2&q=a%20b");
        assert_eq!(req.path(), "/items");
        assert_eq!(req.query("page").as_deref(), Some("2"));
        assert_eq!(req.query("q").as_deref(), Some("a b"));
        assert!(req.query("missing").is_none());
        assert_eq!(req.head().request_id(), "req-1");
        assert!(req.head().remote_addr.is_none());
    }

    #[test]
    fn test_method_override() {
        let mut req = request("POST", "/items/1");
        req.form.push("_method", "delete");
        assert_eq!(req.form_value("_method"), Some("delete"));
        assert!(req.apply_method_override("_method"));
        assert_eq!(req.method(), Method::DELETE);
    }

    #[test]
    fn test_empty_or_missing_override_keeps_method() {
        let mut req = request("POST", "/items/1");
        assert!(!req.apply_method_override("_method"));
        req.form.push("_method", "");
        assert!(!req.apply_method_override("_method"));
        assert_eq!(req.method(), Method::POST);
    }

    #[test]
    fn test_form_lookup() {
        let form: Form = url::form_urlencoded::parse(b"a=1&b=2&a=3").collect();
        assert_eq!(form.get("a"), Some("1"));
        assert_eq!(form.get_all("a"), vec!["1", "3"]);
        assert_eq!(form.len(), 3);
        assert!(form.get("c").is_none());
    }
}
