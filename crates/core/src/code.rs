//! Bytecode model: opcodes, code objects, compilation contexts
//!
//! A code object is the unit the VM executes: an instruction vector of
//! fixnum-encoded opcodes and operands, an optional offset -> line table,
//! and a literal pool. The opcode numbering is stable; changing it is a
//! wire-format version bump.
//!
//! A compilation context is an ordinary vector cell conforming to a fixed
//! shape — the compiler grows it, then seals it into a code object. It is
//! not a distinct type; the compiler pins it against collection while it
//! is only reachable from Rust locals.

use crate::interp::Interp;
use crate::table;
use crate::types::AffStep;
use crate::value::{has_tag, vec_len, vec_ref, vec_set, CellHdr, Tag, Value};

/// VM instruction set. Operand counts are fixed per opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Op {
    Nop = 0,
    Ldi,
    Ldl,
    Ldg,
    Lde,
    Ste,
    Stg,
    True,
    Nil,
    Push,
    Pop,
    Dup,
    Jmp,
    Jt,
    Jf,
    Cont,
    Apply,
    Ret,
    Cls,
    Env,
    Mvarg,
    Mvoarg,
    Mvrarg,
    Add,
    Sub,
    Mul,
    Div,
    Cons,
    Car,
    Cdr,
    Is,
    Hlt,
}

impl Op {
    pub fn from_i64(n: i64) -> Option<Op> {
        if (0..=Op::Hlt as i64).contains(&n) {
            // transmute is sound: repr(i64), contiguous discriminants
            Some(unsafe { std::mem::transmute::<i64, Op>(n) })
        } else {
            None
        }
    }

    /// Number of operand slots following the opcode.
    pub fn operands(self) -> usize {
        match self {
            Op::Ldi
            | Op::Ldl
            | Op::Ldg
            | Op::Stg
            | Op::Jmp
            | Op::Jt
            | Op::Jf
            | Op::Cont
            | Op::Apply
            | Op::Env
            | Op::Mvarg
            | Op::Mvoarg
            | Op::Mvrarg => 1,
            Op::Lde | Op::Ste => 2,
            _ => 0,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Ldi => "ldi",
            Op::Ldl => "ldl",
            Op::Ldg => "ldg",
            Op::Lde => "lde",
            Op::Ste => "ste",
            Op::Stg => "stg",
            Op::True => "true",
            Op::Nil => "nil",
            Op::Push => "push",
            Op::Pop => "pop",
            Op::Dup => "dup",
            Op::Jmp => "jmp",
            Op::Jt => "jt",
            Op::Jf => "jf",
            Op::Cont => "cont",
            Op::Apply => "apply",
            Op::Ret => "ret",
            Op::Cls => "cls",
            Op::Env => "env",
            Op::Mvarg => "mvarg",
            Op::Mvoarg => "mvoarg",
            Op::Mvrarg => "mvrarg",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Cons => "cons",
            Op::Car => "car",
            Op::Cdr => "cdr",
            Op::Is => "is",
            Op::Hlt => "hlt",
        }
    }
}

// =============================================================================
// Code objects
// =============================================================================

#[repr(C)]
pub struct CodeCell {
    pub hdr: CellHdr,
    /// Vector of fixnum-encoded instructions.
    pub instrs: Value,
    /// Offset -> line table, or nil when not instrumented.
    pub src: Value,
    pub nlits: usize,
    lits: [Value; 0],
}

impl CodeCell {
    fn lit_ptr(&mut self, i: usize) -> *mut Value {
        debug_assert!(i < self.nlits);
        unsafe { self.lits.as_mut_ptr().add(i) }
    }
}

pub fn mkcode(c: &mut Interp, ninstrs: usize, nlits: usize) -> Value {
    let instrs = c.mkvector(ninstrs);
    let bytes = std::mem::size_of::<CodeCell>() + nlits * std::mem::size_of::<Value>();
    let v = c.alloc_cell(Tag::Code, bytes);
    if let Value::Obj(r) = v {
        unsafe {
            let code = r.cell::<CodeCell>();
            code.instrs = instrs;
            code.src = Value::Nil;
            code.nlits = nlits;
            for i in 0..nlits {
                *code.lit_ptr(i) = Value::Nil;
            }
        }
    }
    v
}

pub fn code_mut<'a>(v: Value) -> &'a mut CodeCell {
    debug_assert!(has_tag(v, Tag::Code));
    unsafe { v.obj().cell::<CodeCell>() }
}

pub fn code_lit(v: Value, i: usize) -> Value {
    unsafe { *code_mut(v).lit_ptr(i) }
}

pub fn code_set_lit(v: Value, i: usize, lit: Value) {
    unsafe { *code_mut(v).lit_ptr(i) = lit }
}

/// Fetch the instruction word at `ip` as a raw fixnum.
pub fn code_word(v: Value, ip: usize) -> i64 {
    vec_ref(code_mut(v).instrs, ip).fixnum()
}

pub fn code_len(v: Value) -> usize {
    vec_len(code_mut(v).instrs)
}

/// Human-readable disassembly, one instruction per line.
pub fn disassemble(v: Value) -> String {
    let mut out = String::new();
    let len = code_len(v);
    let mut ip = 0;
    while ip < len {
        let word = code_word(v, ip);
        match Op::from_i64(word) {
            Some(op) => {
                out.push_str(&format!("{:4}  {}", ip, op.mnemonic()));
                for k in 0..op.operands() {
                    out.push_str(&format!(" {}", code_word(v, ip + 1 + k)));
                }
                out.push('\n');
                ip += 1 + op.operands();
            }
            None => {
                out.push_str(&format!("{:4}  ??? {}\n", ip, word));
                ip += 1;
            }
        }
    }
    out
}

// =============================================================================
// Foreign function cells
// =============================================================================

/// A foreign primitive: a resumable state machine. It reads its state
/// label from the thread's ip, keeps locals in the thread's environment,
/// and reports back through [`AffStep`].
pub type AffFn = fn(&mut Interp, Value) -> AffStep;

#[repr(C)]
pub struct CCodeCell {
    pub hdr: CellHdr,
    pub name: Value,
    /// Declared minimum argument count; negative means variadic with
    /// `-(argc + 1)` required.
    pub argc: i32,
    pub f: AffFn,
}

pub fn mkccode(c: &mut Interp, argc: i32, f: AffFn, name: Value) -> Value {
    let v = c.alloc_cell(Tag::CCode, std::mem::size_of::<CCodeCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let cell = r.cell::<CCodeCell>();
            cell.name = name;
            cell.argc = argc;
            cell.f = f;
        }
    }
    v
}

pub fn ccode_mut<'a>(v: Value) -> &'a mut CCodeCell {
    debug_assert!(has_tag(v, Tag::CCode));
    unsafe { v.obj().cell::<CCodeCell>() }
}

// =============================================================================
// Compilation contexts
// =============================================================================

const CCTX_SIZE: usize = 5;
const CCTX_VCPTR: usize = 0;
const CCTX_VCODE: usize = 1;
const CCTX_LPTR: usize = 2;
const CCTX_LITS: usize = 3;
const CCTX_SRC: usize = 4;

/// Empty code generation context: a plain vector of the fixed shape.
pub fn mkcctx(c: &mut Interp) -> Value {
    let cctx = c.mkvector(CCTX_SIZE);
    vec_set(cctx, CCTX_VCPTR, Value::Fixnum(0));
    vec_set(cctx, CCTX_VCODE, Value::Nil);
    vec_set(cctx, CCTX_LPTR, Value::Fixnum(0));
    vec_set(cctx, CCTX_LITS, Value::Nil);
    vec_set(cctx, CCTX_SRC, Value::Nil);
    cctx
}

/// Attach a source-line table; emission records lines from here on.
pub fn cctx_mksrc(c: &mut Interp, cctx: Value) {
    let src = table::mktable(c, 4);
    vec_set(cctx, CCTX_SRC, src);
}

/// Next instruction offset (the fill pointer).
pub fn cctx_vcptr(cctx: Value) -> usize {
    vec_ref(cctx, CCTX_VCPTR).fixnum() as usize
}

fn add_lninfo(c: &mut Interp, cctx: Value, line: Value) {
    let src = vec_ref(cctx, CCTX_SRC);
    if src.is_nil() || line.is_nil() {
        return;
    }
    let at = vec_ref(cctx, CCTX_VCPTR);
    table::insert(c, src, at, line);
}

fn grow(c: &mut Interp, cctx: Value, which: usize, fill: usize) -> Value {
    let old = vec_ref(cctx, which);
    let size = if old.is_nil() { 16 } else { 2 * vec_len(old) };
    let new = c.mkvector(size);
    for i in 0..fill {
        let v = vec_ref(old, i);
        vec_set(new, i, v);
    }
    vec_set(cctx, which, new);
    new
}

fn emit_words(c: &mut Interp, cctx: Value, words: &[Value], line: Value) {
    add_lninfo(c, cctx, line);
    let mut vptr = cctx_vcptr(cctx);
    let mut vcode = vec_ref(cctx, CCTX_VCODE);
    while vcode.is_nil() || vptr + words.len() > vec_len(vcode) {
        vcode = grow(c, cctx, CCTX_VCODE, vptr);
    }
    for &w in words {
        vec_set(vcode, vptr, w);
        vptr += 1;
    }
    vec_set(cctx, CCTX_VCPTR, Value::Fixnum(vptr as i64));
}

pub fn emit(c: &mut Interp, cctx: Value, op: Op, line: Value) {
    emit_words(c, cctx, &[Value::Fixnum(op as i64)], line);
}

pub fn emit1(c: &mut Interp, cctx: Value, op: Op, arg: Value, line: Value) {
    emit_words(c, cctx, &[Value::Fixnum(op as i64), arg], line);
}

pub fn emit2(c: &mut Interp, cctx: Value, op: Op, a1: Value, a2: Value, line: Value) {
    emit_words(c, cctx, &[Value::Fixnum(op as i64), a1, a2], line);
}

/// Patch the operand of the jump or continuation instruction at `at` so
/// it lands on `dest`. Offsets are relative to the opcode's own position.
pub fn patch_offset(cctx: Value, at: usize, dest: usize) {
    let vcode = vec_ref(cctx, CCTX_VCODE);
    vec_set(vcode, at + 1, Value::Fixnum(dest as i64 - at as i64));
}

/// Overwrite an already-emitted operand (argument-count backpatching).
pub fn patch_operand(cctx: Value, at: usize, arg: Value) {
    let vcode = vec_ref(cctx, CCTX_VCODE);
    vec_set(vcode, at + 1, arg);
}

/// Append to the literal pool, growing as needed. Returns the new index.
pub fn cctx_literal(c: &mut Interp, cctx: Value, lit: Value) -> usize {
    let lptr = vec_ref(cctx, CCTX_LPTR).fixnum() as usize;
    let mut lits = vec_ref(cctx, CCTX_LITS);
    if lits.is_nil() || lptr >= vec_len(lits) {
        lits = grow(c, cctx, CCTX_LITS, lptr);
    }
    vec_set(lits, lptr, lit);
    vec_set(cctx, CCTX_LPTR, Value::Fixnum(lptr as i64 + 1));
    lptr
}

pub fn cctx_nlits(cctx: Value) -> usize {
    vec_ref(cctx, CCTX_LPTR).fixnum() as usize
}

pub fn cctx_lit(cctx: Value, i: usize) -> Value {
    vec_ref(vec_ref(cctx, CCTX_LITS), i)
}

/// Seal a compilation context into a code object.
pub fn cctx2code(c: &mut Interp, cctx: Value) -> Value {
    let ninstrs = cctx_vcptr(cctx);
    let nlits = cctx_nlits(cctx);
    let code = mkcode(c, ninstrs, nlits);
    let vcode = vec_ref(cctx, CCTX_VCODE);
    let instrs = code_mut(code).instrs;
    for i in 0..ninstrs {
        let w = vec_ref(vcode, i);
        vec_set(instrs, i, w);
    }
    for i in 0..nlits {
        code_set_lit(code, i, cctx_lit(cctx, i));
    }
    code_mut(code).src = vec_ref(cctx, CCTX_SRC);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_grows_and_seals() {
        let mut c = Interp::new();
        let cctx = mkcctx(&mut c);
        for i in 0..40 {
            emit1(&mut c, cctx, Op::Ldi, Value::Fixnum(i), Value::Nil);
        }
        emit(&mut c, cctx, Op::Hlt, Value::Nil);
        let code = cctx2code(&mut c, cctx);
        assert_eq!(code_len(code), 81);
        assert_eq!(code_word(code, 0), Op::Ldi as i64);
        assert_eq!(code_word(code, 79), 39);
        assert_eq!(code_word(code, 80), Op::Hlt as i64);
    }

    #[test]
    fn literal_pool_round_trip() {
        let mut c = Interp::new();
        let cctx = mkcctx(&mut c);
        let s = crate::string::mkstring(&mut c, "lit");
        let idx = cctx_literal(&mut c, cctx, s);
        assert_eq!(idx, 0);
        emit1(&mut c, cctx, Op::Ldl, Value::Fixnum(idx as i64), Value::Nil);
        let code = cctx2code(&mut c, cctx);
        assert_eq!(code_lit(code, 0), s);
    }

    #[test]
    fn jump_offsets_are_relative_to_the_opcode() {
        let mut c = Interp::new();
        let cctx = mkcctx(&mut c);
        let at = cctx_vcptr(cctx);
        emit1(&mut c, cctx, Op::Jmp, Value::Fixnum(0), Value::Nil);
        emit(&mut c, cctx, Op::Nop, Value::Nil);
        let dest = cctx_vcptr(cctx);
        patch_offset(cctx, at, dest);
        let code = cctx2code(&mut c, cctx);
        assert_eq!(code_word(code, at + 1), 3);
    }

    #[test]
    fn opcode_numbering_is_stable() {
        assert_eq!(Op::Nop as i64, 0);
        assert_eq!(Op::True as i64, 7);
        assert_eq!(Op::Apply as i64, 16);
        assert_eq!(Op::Hlt as i64, 31);
        assert_eq!(Op::from_i64(16), Some(Op::Apply));
        assert_eq!(Op::from_i64(99), None);
        assert_eq!(Op::Lde.operands(), 2);
        assert_eq!(Op::Apply.operands(), 1);
        assert_eq!(Op::Ret.operands(), 0);
    }
}
