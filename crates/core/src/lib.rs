//! Arcueid core: the interpreter's data layer
//!
//! Everything the virtual machine, compiler, and scheduler build on:
//! tagged values, the chunked free-list heap, the incremental tri-color
//! collector, the container types, symbol interning, the numeric tower,
//! and the per-type dispatch registry.
//!
//! Key design points:
//! - `Value`: one `Copy` word-class datum; immediates inline, heap cells
//!   by pointer
//! - The collector's color lives in the block header; the mutator never
//!   pays a write-barrier cost
//! - An `Interp` owns all of it and is single-OS-thread by construction

pub mod code;
pub mod coerce;
pub mod error;
pub mod gc;
pub mod heap;
pub mod interp;
pub mod numeric;
pub mod pprint;
pub mod string;
pub mod symbol;
pub mod table;
pub mod thread;
pub mod types;
pub mod value;

pub use error::CoreError;
pub use interp::{Builtin, Interp, DEFAULT_STACK_SIZE};
pub use types::AffStep;
pub use value::{Tag, Type, Value};
