//! Interpreter instance state
//!
//! One `Interp` owns everything: the heap, the collector's bookkeeping, the
//! symbol tables, the global environment, the builtin symbol vector, the
//! compiler's special-form and inline-function tables, the thread ring, and
//! the I/O-wait table. A single instance is single-OS-thread by
//! construction (it is full of raw heap pointers); separate instances share
//! nothing.

use crate::gc::Gc;
use crate::heap::{Heap, DEFAULT_MIN_EXPANSION, DEFAULT_OVER_PERCENT};
use crate::table;
use crate::types::TypeFn;
use crate::value::{CellHdr, ConsCell, ObjRef, Tag, Value, VectorCell, TAG_COUNT};

/// Default interpreter thread stack size, in value slots.
pub const DEFAULT_STACK_SIZE: usize = 2048;

/// Default instruction quantum between scheduler turns.
pub const DEFAULT_QUANTUM: i64 = 1024;

/// Symbols the core and compiler need at fixed indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Builtin {
    If = 0,
    Fn,
    Quote,
    QQuote,
    Unquote,
    UnquoteSp,
    Assign,
    T,
    Nil,
    Mac,
    /// Marks optional parameters inside `fn` argument lists.
    O,
    SInt,
    SNum,
    SChar,
    SString,
    SSym,
    SCons,
    SVector,
    STable,
}

const BUILTIN_NAMES: [&str; 19] = [
    "if",
    "fn",
    "quote",
    "quasiquote",
    "unquote",
    "unquote-splicing",
    "assign",
    "t",
    "nil",
    "mac",
    "o",
    "int",
    "num",
    "char",
    "string",
    "sym",
    "cons",
    "vector",
    "table",
];

pub struct Interp {
    pub heap: Heap,
    pub gc: Gc,
    pub typefns: [Option<TypeFn>; TAG_COUNT],

    /// name string -> fixnum symbol index
    pub symtable: Value,
    /// fixnum symbol index -> name string
    pub rsymtable: Value,
    pub lastsym: u32,

    /// global environment: symbol -> binding
    pub genv: Value,
    /// vector of pre-interned symbols, indexed by [`Builtin`]
    pub builtins: Value,
    /// special-form table: symbol -> fixnum discriminant
    pub splforms: Value,
    /// inline-function table: symbol -> fixnum opcode
    pub inlfuncs: Value,

    /// cons list of all live interpreter threads
    pub vmthreads: Value,
    pub curthread: Value,
    /// fd -> waiting thread
    pub iowaittbl: Value,
    pub tid_nonce: i32,
    pub stksize: usize,
    /// Instructions per scheduler turn.
    pub quantum: i64,

    /// Shadow stack: values pinned as GC roots while only reachable from
    /// Rust locals (compilation contexts, macro-expansion arguments).
    pub protected: Vec<Value>,
}

impl Interp {
    pub fn new() -> Interp {
        let mut c = Interp {
            heap: Heap::new(DEFAULT_MIN_EXPANSION, DEFAULT_OVER_PERCENT),
            gc: Gc::new(),
            typefns: [None; TAG_COUNT],
            symtable: Value::Nil,
            rsymtable: Value::Nil,
            lastsym: 0,
            genv: Value::Nil,
            builtins: Value::Nil,
            splforms: Value::Nil,
            inlfuncs: Value::Nil,
            vmthreads: Value::Nil,
            curthread: Value::Nil,
            iowaittbl: Value::Nil,
            tid_nonce: 0,
            stksize: DEFAULT_STACK_SIZE,
            quantum: DEFAULT_QUANTUM,
            protected: Vec::new(),
        };
        c.symtable = table::mktable(&mut c, 10);
        c.rsymtable = table::mktable(&mut c, 10);
        c.genv = table::mktable(&mut c, 8);
        c.splforms = table::mktable(&mut c, 4);
        c.inlfuncs = table::mktable(&mut c, 4);
        c.iowaittbl = table::mktable(&mut c, 4);
        c.builtins = c.mkvector(BUILTIN_NAMES.len());
        for (i, &name) in BUILTIN_NAMES.iter().enumerate() {
            let sym = crate::symbol::intern(&mut c, name);
            crate::value::vec_set(c.builtins, i, sym);
        }
        c
    }

    /// The pre-interned symbol for `b`.
    pub fn builtin(&self, b: Builtin) -> Value {
        crate::value::vec_ref(self.builtins, b as usize)
    }

    /// Allocate a heap cell of `size` payload bytes (including the cell
    /// header), tagged `tag` and colored with the current mutator color.
    /// Returns nil when the OS refuses more memory.
    pub fn alloc_cell(&mut self, tag: Tag, size: usize) -> Value {
        let color = self.gc.mutator;
        let p = self.heap.alloc(size, color);
        if p.is_null() {
            tracing::error!(?tag, size, "out of memory allocating cell");
            return Value::Nil;
        }
        let cell = p.cast::<CellHdr>();
        unsafe {
            cell.write(CellHdr::new(tag));
            Value::Obj(ObjRef::from_ptr(cell))
        }
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        self.cons_cell(Tag::Cons, car, cdr)
    }

    /// Tagged (annotated) cell: car is the type symbol, cdr the
    /// representation.
    pub fn tagged(&mut self, tag_sym: Value, rep: Value) -> Value {
        self.cons_cell(Tag::Tagged, tag_sym, rep)
    }

    /// Closure cell: car is the code object, cdr the captured environment.
    pub fn closure(&mut self, code: Value, env: Value) -> Value {
        self.cons_cell(Tag::Clos, code, env)
    }

    fn cons_cell(&mut self, tag: Tag, car: Value, cdr: Value) -> Value {
        let v = self.alloc_cell(tag, std::mem::size_of::<ConsCell>());
        if let Value::Obj(r) = v {
            unsafe {
                let cell = r.cell::<ConsCell>();
                cell.car = car;
                cell.cdr = cdr;
            }
        }
        v
    }

    /// Vector of `len` slots, all nil.
    pub fn mkvector(&mut self, len: usize) -> Value {
        self.mkvector_tagged(Tag::Vector, len)
    }

    pub fn mkvector_tagged(&mut self, tag: Tag, len: usize) -> Value {
        let v = self.alloc_cell(tag, crate::value::vector_size(len));
        if let Value::Obj(r) = v {
            unsafe {
                let cell = r.cell::<VectorCell>();
                cell.len = len;
                for i in 0..len {
                    *cell.slot_ptr(i) = Value::Nil;
                }
            }
        }
        v
    }

    /// Build a cons list from a slice, preserving order.
    pub fn list(&mut self, items: &[Value]) -> Value {
        let mut acc = Value::Nil;
        for &v in items.iter().rev() {
            acc = self.cons(v, acc);
        }
        acc
    }

    /// Pin a value as a GC root while it is only reachable from Rust
    /// locals. Returns the mark to pass to [`Interp::unprotect_to`].
    pub fn protect(&mut self, v: Value) -> usize {
        self.protected.push(v);
        self.protected.len() - 1
    }

    /// Drop every protection at or above `mark`.
    pub fn unprotect_to(&mut self, mark: usize) {
        self.protected.truncate(mark);
    }
}

impl Default for Interp {
    fn default() -> Interp {
        Interp::new()
    }
}

impl Drop for Interp {
    fn drop(&mut self) {
        // Release auxiliary resources (big integers, port backends) held
        // inside still-allocated cells; the chunks themselves are unmapped
        // by the heap's Drop.
        crate::gc::release_all(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{car, cdr, vec_len, vec_ref};

    #[test]
    fn cons_holds_both_slots() {
        let mut c = Interp::new();
        let v = c.cons(Value::Fixnum(1), Value::True);
        assert_eq!(car(v), Value::Fixnum(1));
        assert_eq!(cdr(v), Value::True);
    }

    #[test]
    fn vectors_start_nil() {
        let mut c = Interp::new();
        let v = c.mkvector(5);
        assert_eq!(vec_len(v), 5);
        for i in 0..5 {
            assert_eq!(vec_ref(v, i), Value::Nil);
        }
    }

    #[test]
    fn builtins_are_interned_once() {
        let mut c = Interp::new();
        let s = crate::symbol::intern(&mut c, "fn");
        assert_eq!(s, c.builtin(Builtin::Fn));
    }

    #[test]
    fn list_preserves_order() {
        let mut c = Interp::new();
        let l = c.list(&[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]);
        assert_eq!(car(l), Value::Fixnum(1));
        assert_eq!(car(cdr(l)), Value::Fixnum(2));
        assert_eq!(crate::value::list_len(l), 3);
    }
}
