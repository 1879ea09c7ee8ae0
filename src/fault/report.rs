//! Conversion of recovered panics into structured errors.

use axum::http::StatusCode;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};

use crate::fault::hook::take_panic_backtrace;

/// Frames belonging to the unwinding machinery rather than to the faulting code.
const MACHINERY_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "<alloc::",
    "alloc::",
    "rust_begin_unwind",
    "request_mux::fault::hook::",
];

/// A recovered runtime fault.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct FaultError {
    /// One `function @ file:line` entry per frame, innermost first.
    pub stack_trace: Vec<String>,
    pub title: String,
    pub message: String,
    pub status: StatusCode,
}

impl FaultError {
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Emit the fault and its trace at error level.
    pub fn log(&self, boundary: &str) {
        tracing::error!(boundary, message = %self.message, frames = self.stack_trace.len(), "Recovered fault");
        for frame in &self.stack_trace {
            tracing::error!(boundary, "  {}", frame);
        }
    }
}

/// Build a [`FaultError`] from a recovered panic payload.
///
/// The trace starts `skip_frames` frames past the panic site and stops at the
/// first frame whose symbol cannot be resolved.
pub fn capture_fault(skip_frames: usize, payload: &(dyn Any + Send)) -> FaultError {
    let backtrace = take_panic_backtrace().unwrap_or_else(Backtrace::force_capture);
    let stack_trace = match backtrace.status() {
        BacktraceStatus::Captured => trace_lines(&backtrace.to_string(), skip_frames),
        _ => Vec::new(),
    };

    FaultError {
        stack_trace,
        title: "500 Internal Server Error".to_string(),
        message: format!("runtime error. {}", panic_message(payload)),
        status: StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The text a panic was raised with.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[derive(Debug)]
struct Frame {
    function: String,
    location: Option<String>,
}

/// Parse the rendered backtrace into `function @ file:line` lines.
fn trace_lines(rendered: &str, skip_frames: usize) -> Vec<String> {
    let frames = parse_frames(rendered);
    let first_own = frames
        .iter()
        .position(|f| !is_machinery(&f.function))
        .unwrap_or(0);

    frames
        .into_iter()
        .skip(first_own + skip_frames)
        .take_while(|f| f.function != "<unknown>")
        .map(|f| match f.location {
            Some(location) => format!("{} @ {}", f.function, location),
            None => format!("{} @ <unknown>", f.function),
        })
        .collect()
}

fn parse_frames(rendered: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in rendered.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                frame.location = Some(strip_column(location).to_string());
            }
            continue;
        }
        let Some((index, function)) = line.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // Full-format traces prefix the instruction pointer: `0x1234 - name`.
        let function = function.trim();
        let function = match function.split_once(" - ") {
            Some((ip, name)) if ip.starts_with("0x") => name,
            _ => function,
        };
        frames.push(Frame {
            function: function.trim().to_string(),
            location: None,
        });
    }
    frames
}

/// `src/lib.rs:10:5` → `src/lib.rs:10`
fn strip_column(location: &str) -> &str {
    match location.rsplit_once(':') {
        Some((head, column)) if head.contains(':') && column.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => location,
    }
}

fn is_machinery(function: &str) -> bool {
    MACHINERY_PREFIXES.iter().any(|prefix| function.starts_with(prefix))
}
