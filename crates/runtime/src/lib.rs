//! Arcueid runtime: execution machinery over the core data layer
//!
//! - `vm`: the bytecode dispatch engine with continuation-passing calls
//! - `sched`: the cooperative round-robin scheduler, I/O-wait wheel, and
//!   the trampoline joining bytecode and foreign functions
//! - `aff`: the foreign-function coroutine verbs (call/yield/iowait/return)
//! - `builtins`: the primitive and builtin-macro registry
//! - `io`: ports (string and process-fd backends)
//! - `error`: exception values and error-continuation unwinding
//! - `config`: TOML-backed tunables

pub mod aff;
pub mod builtins;
pub mod config;
pub mod error;
pub mod io;
pub mod sched;
pub mod vm;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use sched::{apply_to, run, spawn};
pub use vm::{vmengine, VmEvent};

use arcueid_core::Interp;

/// A fully initialized interpreter: core state plus ports, primitives,
/// macros, and compiler tables.
pub fn boot() -> Interp {
    let mut c = Interp::new();
    builtins::init(&mut c);
    c
}

/// Boot with explicit configuration.
pub fn boot_with(config: &RuntimeConfig) -> Interp {
    let mut c = Interp::new();
    config.apply(&mut c);
    builtins::init(&mut c);
    c
}
