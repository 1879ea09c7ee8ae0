//! Body parsing for non-read-only requests.
//!
//! # Responsibilities
//! - Detect multipart bodies and collect their fields and file parts
//! - Parse urlencoded bodies into form fields
//! - Enforce the upload memory ceiling on both
//!
//! # Design Decisions
//! - Parse failures are logged and leave the form empty; the handler still runs
//! - Other content types keep their body for the handler to consume

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, Method};

use crate::http::request::{Form, Request, Upload};

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("multipart body rejected: {0}")]
    Rejected(#[from] MultipartRejection),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("failed to read body: {0}")]
    Body(#[from] axum::Error),
}

/// GET and HEAD carry no form body.
pub fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

/// Parse the request body into form fields and uploads when its content type calls for it.
pub async fn parse_body(request: &mut Request, max_memory: usize) {
    let multipart = request
        .headers()
        .get_all(header::CONTENT_TYPE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("multipart/form-data"));
    let urlencoded = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

    let result = if multipart {
        parse_multipart(request).await
    } else if urlencoded {
        parse_urlencoded(request, max_memory).await
    } else {
        Ok(())
    };

    if let Err(e) = result {
        tracing::warn!(
            request_id = %request.head().request_id(),
            path = %request.path(),
            error = %e,
            "Failed to parse request body"
        );
    }
}

async fn parse_urlencoded(request: &mut Request, max_memory: usize) -> Result<(), FormError> {
    let Some(body) = request.take_body() else {
        return Ok(());
    };
    let bytes = axum::body::to_bytes(body, max_memory).await?;
    request.form = url::form_urlencoded::parse(&bytes).collect();
    Ok(())
}

async fn parse_multipart(request: &mut Request) -> Result<(), FormError> {
    let Some(body) = request.take_body() else {
        return Ok(());
    };

    // The router's DefaultBodyLimit travels in the extensions and caps the
    // multipart stream at the upload memory ceiling.
    let mut inner = axum::http::Request::new(body);
    *inner.headers_mut() = request.headers().clone();
    *inner.extensions_mut() = request.extensions().clone();

    let mut multipart = Multipart::from_request(inner, &()).await?;
    let mut form = Form::default();
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?;

        match file_name {
            Some(file_name) => uploads.push(Upload {
                field: name,
                file_name,
                content_type,
                data,
            }),
            None => form.push(name, String::from_utf8_lossy(&data)),
        }
    }

    request.form = form;
    request.uploads = uploads;
    Ok(())
}
