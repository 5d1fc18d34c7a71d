//! Arcueid compiler library
//!
//! Source text to running code: the reader produces in-heap
//! s-expressions, the compiler lowers them to code objects, and
//! `eval_source` closes the loop by handing each compiled closure to the
//! scheduler and collecting the final value register.

pub mod compile;
pub mod reader;

pub use compile::{compile_expr, macex, CompileError};
pub use reader::{ReadError, Reader};

use arcueid_core::thread::thread_mut;
use arcueid_core::value::Value;
use arcueid_core::Interp;
use arcueid_runtime::sched;

#[derive(Debug)]
pub enum EvalError {
    Read(ReadError),
    Compile(CompileError),
    Runtime(arcueid_runtime::RuntimeError),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Read(e) => write!(f, "{}", e),
            EvalError::Compile(e) => write!(f, "{}", e),
            EvalError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ReadError> for EvalError {
    fn from(e: ReadError) -> Self {
        EvalError::Read(e)
    }
}

impl From<CompileError> for EvalError {
    fn from(e: CompileError) -> Self {
        EvalError::Compile(e)
    }
}

/// Read, compile, and run every top-level expression in `source`,
/// returning the last one's value. Each expression gets its own thread;
/// the scheduler drains it (and anything it spawned) before the next one
/// compiles, so macros defined earlier in the text are visible later.
pub fn eval_source(c: &mut Interp, source: &str) -> Result<Value, EvalError> {
    let mut reader = Reader::new(source);
    // one pinned slot keeps the running result safe across collector
    // slices triggered by later expressions
    let base = c.protect(Value::Nil);
    loop {
        let next = reader.read_expr(c);
        let Some((expr, line)) = (match next {
            Ok(v) => v,
            Err(e) => {
                c.unprotect_to(base);
                return Err(e.into());
            }
        }) else {
            break;
        };
        let code = match compile_expr(c, expr, Some(line)) {
            Ok(v) => v,
            Err(e) => {
                c.unprotect_to(base);
                return Err(e.into());
            }
        };
        tracing::trace!(line, "toplevel compiled");
        let clos = c.closure(code, Value::Nil);
        let thr = sched::spawn(c, clos);
        let mark = c.protect(thr);
        sched::run(c);
        let exc = thread_mut(thr).exc;
        if !exc.is_nil() {
            let text = arcueid_core::pprint::write_value(c, exc, false);
            c.unprotect_to(base);
            return Err(EvalError::Runtime(arcueid_runtime::RuntimeError::Unhandled(text)));
        }
        c.protected[base] = thread_mut(thr).valr;
        c.unprotect_to(mark);
    }
    let last = c.protected[base];
    c.unprotect_to(base);
    Ok(last)
}
