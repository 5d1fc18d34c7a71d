//! Exception values and error-continuation unwinding
//!
//! An error builds an exception cell (message, optional payload, stack
//! trace walked off the continuation chain) and unwinds to the innermost
//! error continuation installed by `on-err`. Each entry on a thread's
//! `econt` chain is `(handler . continuation)`: raising restores the
//! continuation (rolling the thread back to where `on-err` ran) and
//! arranges for the handler to be applied to the exception, so the
//! handler's result flows wherever the protected body's result would
//! have. With no handler installed, the interpreter's top-level handler
//! reports the exception and finishes the thread.
//!
//! Unwinding runs no finalizers; all cleanup is collector-mediated.
//! Errors inside a collector slice are impossible by construction — the
//! collector neither allocates nor signals.

use arcueid_core::error::{exc_mut, mkexception};
use arcueid_core::pprint::write_value;
use arcueid_core::string::mkstring;
use arcueid_core::thread::{cont_mut, restore_cont, thr_push, thread_mut, ThreadState};
use arcueid_core::value::{car, cdr, has_tag, Tag, Value};
use arcueid_core::Interp;

/// Where a raise landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raise {
    /// A handler was installed; the thread is set up to apply it.
    Handled,
    /// No handler; the top-level handler ran and the thread is finished.
    TopLevel,
}

/// Build an exception value carrying `msg`, `payload`, and a trace walked
/// from the thread's continuation chain.
pub fn mkerr(c: &mut Interp, thr: Value, msg: &str, payload: Value) -> Value {
    let msgv = mkstring(c, msg);
    let trace = backtrace(c, thr);
    mkexception(c, msgv, payload, trace)
}

/// One frame per continuation: the printable name of the function that
/// will be resumed.
fn backtrace(c: &mut Interp, thr: Value) -> Value {
    let mut frames = Vec::new();
    let mut k = thread_mut(thr).conr;
    while has_tag(k, Tag::Cont) {
        let fun = cont_mut(k).fun;
        let name = write_value(c, fun, false);
        frames.push(mkstring(c, &name));
        k = cont_mut(k).prev;
    }
    c.list(&frames)
}

/// Raise `exc` on `thr`: unwind to the innermost error continuation, or
/// fall back to the top-level handler.
pub fn raise(c: &mut Interp, thr: Value, exc: Value) -> Raise {
    thread_mut(thr).exc = exc;
    let econt = thread_mut(thr).econt;
    if econt.is_nil() {
        let text = write_value(c, exc, false);
        tracing::error!(tid = thread_mut(thr).tid, "unhandled error: {}", text);
        eprintln!("Error: {}", text);
        thread_mut(thr).state = ThreadState::Finished;
        return Raise::TopLevel;
    }
    let entry = car(econt);
    let (handler, k) = (car(entry), cdr(entry));
    thread_mut(thr).econt = cdr(econt);
    restore_cont(thr, k);
    if !thr_push(thr, exc) {
        // the restored stack is below its high-water mark, so this push
        // cannot actually fail unless the stack was sized zero
        thread_mut(thr).state = ThreadState::Finished;
        return Raise::TopLevel;
    }
    let t = thread_mut(thr);
    t.valr = handler;
    t.argc = 1;
    t.exc = Value::Nil;
    Raise::Handled
}

/// Message text of an exception, for hosts and tests.
pub fn exc_message(exc: Value) -> Value {
    exc_mut(exc).msg
}

/// Host-side failures surfaced through the CLI rather than an interpreted
/// thread.
#[derive(Debug)]
pub enum RuntimeError {
    Core(arcueid_core::CoreError),
    /// An unhandled interpreted-code error, rendered.
    Unhandled(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Core(e) => write!(f, "{}", e),
            RuntimeError::Unhandled(s) => write!(f, "unhandled error: {}", s),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<arcueid_core::CoreError> for RuntimeError {
    fn from(e: arcueid_core::CoreError) -> Self {
        RuntimeError::Core(e)
    }
}
