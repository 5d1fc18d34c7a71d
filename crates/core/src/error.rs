//! Core error types
//!
//! These cover the operations that can fail before a thread exists to carry
//! an exception value: arithmetic, coercion, and symbol plumbing. The
//! runtime converts them into in-heap exception values when they surface
//! inside interpreted code.

use crate::interp::Interp;
use crate::value::{has_tag, CellHdr, Tag, Value};

/// In-heap exception cell: message string, optional payload, and a stack
/// trace derived from the continuation chain at raise time.
#[repr(C)]
pub struct ExcCell {
    pub hdr: CellHdr,
    pub msg: Value,
    pub payload: Value,
    pub trace: Value,
}

pub fn mkexception(c: &mut Interp, msg: Value, payload: Value, trace: Value) -> Value {
    let v = c.alloc_cell(Tag::Exception, std::mem::size_of::<ExcCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let e = r.cell::<ExcCell>();
            e.msg = msg;
            e.payload = payload;
            e.trace = trace;
        }
    }
    v
}

pub fn exc_mut<'a>(v: Value) -> &'a mut ExcCell {
    debug_assert!(has_tag(v, Tag::Exception));
    unsafe { v.obj().cell::<ExcCell>() }
}

/// Error type for arithmetic and coercion operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Division of an exact number by exact zero.
    DivByZero,
    /// Operand type not supported by the operation.
    TypeMismatch {
        op: &'static str,
        found: &'static str,
    },
    /// A conversion the coercion matrix does not define.
    InvalidCoercion {
        from: &'static str,
        to: String,
    },
    /// String did not parse as a number in the requested base.
    BadNumberSyntax { text: String, base: u32 },
    /// Numeric base outside 2..=36.
    BadBase(i64),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::DivByZero => write!(f, "division by zero"),
            CoreError::TypeMismatch { op, found } => {
                write!(f, "{}: invalid operand of type {}", op, found)
            }
            CoreError::InvalidCoercion { from, to } => {
                write!(f, "cannot coerce {} to {}", from, to)
            }
            CoreError::BadNumberSyntax { text, base } => {
                write!(f, "invalid number syntax {:?} in base {}", text, base)
            }
            CoreError::BadBase(b) => write!(f, "out of range base {}", b),
        }
    }
}

impl std::error::Error for CoreError {}
