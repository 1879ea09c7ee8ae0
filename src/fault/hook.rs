//! Panic hook recording where a panic happened.
//!
//! By the time `catch_unwind` returns the panicking frames are gone, so the
//! backtrace is taken inside the hook and parked in a thread-local until the
//! recovery boundary on the same thread picks it up. Only panics raised while
//! a [`record_panics`] future is being polled are recorded; panics anywhere
//! else in the process leave the slot untouched.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::{poll_fn, Future};
use std::panic;
use std::pin::pin;
use std::sync::Once;

thread_local! {
    static LAST_PANIC: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
    static RECORDING: Cell<usize> = const { Cell::new(0) };
}

static INSTALL: Once = Once::new();

/// Install the recording hook once per process, chained in front of the previous hook.
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if RECORDING.with(Cell::get) > 0 {
                let backtrace = Backtrace::force_capture();
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
}

/// Take the backtrace of the most recent recorded panic on this thread.
pub fn take_panic_backtrace() -> Option<Backtrace> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

/// Marks the current thread as inside a recovery boundary until dropped.
///
/// Entering the outermost scope discards any stale backtrace.
pub(crate) struct RecordingScope(());

impl RecordingScope {
    pub(crate) fn enter() -> Self {
        let depth = RECORDING.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth
        });
        if depth == 0 {
            let _ = take_panic_backtrace();
        }
        RecordingScope(())
    }
}

impl Drop for RecordingScope {
    fn drop(&mut self) {
        RECORDING.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Record panics raised while `future` is polled.
///
/// The scope is entered per poll, so a task moving between worker threads is
/// recorded on whichever thread polls it.
pub async fn record_panics<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    poll_fn(|cx| {
        let _scope = RecordingScope::enter();
        future.as_mut().poll(cx)
    })
    .await
}
