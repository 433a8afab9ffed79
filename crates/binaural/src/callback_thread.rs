//! Which device callback, if any, the current thread is running.
//!
//! Drivers own their threads and never tell us when one stops being a callback thread, so the mark is never cleared.
use std::cell::Cell;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub(crate) enum CallbackKind {
    #[display(fmt = "capture callback")]
    Capture,
    #[display(fmt = "output callback")]
    Output,
    #[display(fmt = "device error callback")]
    DeviceError,
}

thread_local! {
    static CURRENT: Cell<Option<CallbackKind>> = const { Cell::new(None) };
}

/// The callback this thread was last marked with.  `None` on threads we own.
pub(crate) fn current_callback() -> Option<CallbackKind> {
    CURRENT.get()
}

/// Called by device layers at the top of every callback.  Such a thread must not block, allocate, or do I/O.
#[inline(always)]
pub(crate) fn mark_callback_thread(kind: CallbackKind) {
    CURRENT.set(Some(kind));
}
