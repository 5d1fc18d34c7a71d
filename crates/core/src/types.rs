//! Per-type dispatch: vtable registry, shallow/deep equality, hashing
//!
//! Built-in composite types are handled by direct matches (the collector
//! and printer know their layouts); the registry exists for ports, custom
//! types, and anything an embedder adds. Marker and sweeper are mandatory
//! for registered types; the rest default to identity equality and opaque
//! printing.

use std::hash::{Hash, Hasher};

use crate::interp::Interp;
use crate::numeric::{BignumCell, ComplexCell, FlonumCell, RationalCell};
use crate::string::{self, CharCell};
use crate::value::{car, cdr, has_tag, type_of, vec_len, vec_ref, ObjRef, Tag, Value};

/// Status codes a foreign function or applicator hands back to the VM
/// trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffStep {
    /// Yield to the thread dispatcher; the thread stays runnable.
    Return,
    /// Finished: restore the continuation, result already in VALR.
    RestoreCont,
    /// Apply the value register; a resume continuation has been installed.
    FnApp,
    /// Block the thread on its recorded file descriptor.
    IoWait,
}

pub type MarkFn = fn(&mut Interp, Value, u32);
pub type SweepFn = fn(&mut Interp, Value);
pub type PprintFn = fn(&mut Interp, Value, &mut String, &mut Vec<ObjRef>, bool);
pub type HashFn = fn(&mut Interp, Value, &mut dyn Hasher);
pub type IsCmpFn = fn(&mut Interp, Value, Value) -> bool;
pub type IsoCmpFn = fn(&mut Interp, Value, Value, &mut Vec<(ObjRef, ObjRef)>) -> bool;
pub type ApplyFn = fn(&mut Interp, Value, Value) -> AffStep;

/// Per-type operation record.
#[derive(Clone, Copy, Default)]
pub struct TypeFn {
    pub marker: Option<MarkFn>,
    pub sweeper: Option<SweepFn>,
    pub pprint: Option<PprintFn>,
    pub hash: Option<HashFn>,
    pub iscmp: Option<IsCmpFn>,
    pub isocmp: Option<IsoCmpFn>,
    pub apply: Option<ApplyFn>,
}

pub fn register_typefn(c: &mut Interp, tag: Tag, tf: TypeFn) {
    c.typefns[tag as usize] = Some(tf);
}

pub fn typefn(c: &Interp, tag: Tag) -> Option<&TypeFn> {
    c.typefns[tag as usize].as_ref()
}

// =============================================================================
// Shallow equality (`is`)
// =============================================================================

/// `is`: identity for immediates, fixnums, symbols, and heap cells, with
/// content comparison for the numeric and textual leaf types.
pub fn is(c: &mut Interp, a: Value, b: Value) -> bool {
    if a == b {
        return true;
    }
    let (ra, rb) = match (a, b) {
        (Value::Obj(ra), Value::Obj(rb)) => (ra, rb),
        _ => return false,
    };
    if ra.tag() != rb.tag() {
        return false;
    }
    unsafe {
        match ra.tag() {
            Tag::Flonum => {
                ra.cell::<FlonumCell>().f == rb.cell::<FlonumCell>().f
            }
            Tag::Complex => {
                let (x, y) = (ra.cell::<ComplexCell>(), rb.cell::<ComplexCell>());
                x.re == y.re && x.im == y.im
            }
            Tag::Bignum => ra.cell::<BignumCell>().n == rb.cell::<BignumCell>().n,
            Tag::Rational => ra.cell::<RationalCell>().q == rb.cell::<RationalCell>().q,
            Tag::Char => ra.cell::<CharCell>().ch == rb.cell::<CharCell>().ch,
            Tag::Str => string::str_eq(a, b),
            tag => match typefn(c, tag).and_then(|tf| tf.iscmp) {
                Some(f) => f(c, a, b),
                None => false,
            },
        }
    }
}

// =============================================================================
// Deep equality (`iso`)
// =============================================================================

/// `iso`: structural isomorphism. The visit set pairs cells already
/// compared so cyclic structures terminate.
pub fn iso(c: &mut Interp, a: Value, b: Value, visit: &mut Vec<(ObjRef, ObjRef)>) -> bool {
    if is(c, a, b) {
        return true;
    }
    let (ra, rb) = match (a, b) {
        (Value::Obj(ra), Value::Obj(rb)) => (ra, rb),
        _ => return false,
    };
    if ra.tag() != rb.tag() {
        return false;
    }
    if visit.iter().any(|&(x, y)| x == ra && y == rb) {
        return true;
    }
    visit.push((ra, rb));
    match ra.tag() {
        Tag::Cons => iso(c, car(a), car(b), visit) && iso(c, cdr(a), cdr(b), visit),
        Tag::Vector => {
            let n = vec_len(a);
            if n != vec_len(b) {
                return false;
            }
            (0..n).all(|i| {
                let (x, y) = (vec_ref(a, i), vec_ref(b, i));
                iso(c, x, y, visit)
            })
        }
        Tag::Code => {
            let (na, nb) = (crate::code::code_mut(a).nlits, crate::code::code_mut(b).nlits);
            if na != nb {
                return false;
            }
            let (ia, ib) = (crate::code::code_mut(a).instrs, crate::code::code_mut(b).instrs);
            if !iso(c, ia, ib, visit) {
                return false;
            }
            (0..na).all(|i| {
                let (x, y) = (crate::code::code_lit(a, i), crate::code::code_lit(b, i));
                iso(c, x, y, visit)
            })
        }
        tag => match typefn(c, tag).and_then(|tf| tf.isocmp) {
            Some(f) => f(c, a, b, visit),
            None => false,
        },
    }
}

// =============================================================================
// Hashing
// =============================================================================

/// Feed `v`'s structure into a hasher. Composite types recurse with a
/// visit set so cyclic data terminates; aggregate identity types hash
/// their address.
pub fn hash_value(c: &mut Interp, v: Value, state: &mut dyn Hasher) {
    let mut visit = Vec::new();
    hash_rec(c, state, v, &mut visit);
}

fn hash_rec(c: &mut Interp, state: &mut dyn Hasher, v: Value, visit: &mut Vec<ObjRef>) {
    // Hash::hash wants a Sized hasher; the reborrowed &mut dyn is one
    let mut state = state;
    match v {
        Value::Nil => 0x6e_u8.hash(&mut state),
        Value::True => 0x74_u8.hash(&mut state),
        Value::Undef | Value::Unbound | Value::LastArg => 0x75_u8.hash(&mut state),
        Value::Fixnum(n) => n.hash(&mut state),
        Value::Sym(i) => {
            0x73_u8.hash(&mut state);
            i.hash(&mut state);
        }
        Value::Obj(r) => unsafe {
            (r.tag() as u8).hash(&mut state);
            match r.tag() {
                Tag::Flonum => r.cell::<FlonumCell>().f.to_bits().hash(&mut state),
                Tag::Complex => {
                    let z = r.cell::<ComplexCell>();
                    z.re.to_bits().hash(&mut state);
                    z.im.to_bits().hash(&mut state);
                }
                Tag::Bignum => r.cell::<BignumCell>().n.hash(&mut state),
                Tag::Rational => {
                    let q = &r.cell::<RationalCell>().q;
                    q.numer().hash(&mut state);
                    q.denom().hash(&mut state);
                }
                Tag::Char => r.cell::<CharCell>().ch.hash(&mut state),
                Tag::Str => {
                    for ch in string::str_chars(v) {
                        ch.hash(&mut state);
                    }
                }
                Tag::Cons => {
                    if visit.contains(&r) {
                        return;
                    }
                    visit.push(r);
                    hash_rec(c, state, car(v), visit);
                    hash_rec(c, state, cdr(v), visit);
                }
                Tag::Vector => {
                    if visit.contains(&r) {
                        return;
                    }
                    visit.push(r);
                    for i in 0..vec_len(v) {
                        let x = vec_ref(v, i);
                        hash_rec(c, state, x, visit);
                    }
                }
                tag => match typefn(c, tag).and_then(|tf| tf.hash) {
                    Some(f) => f(c, v, state),
                    None => (r.as_ptr() as usize).hash(&mut state),
                },
            }
        },
    }
}

/// Reflective `type`: tagged cells report their annotation symbol.
pub fn type_sym(c: &mut Interp, v: Value) -> Value {
    if has_tag(v, Tag::Tagged) {
        return car(v);
    }
    let name = crate::value::type_name(type_of(v));
    crate::symbol::intern(c, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;

    #[test]
    fn is_compares_identity_and_leaf_content() {
        let mut c = Interp::new();
        let a = c.cons(Value::Fixnum(1), Value::Nil);
        let b = c.cons(Value::Fixnum(1), Value::Nil);
        assert!(is(&mut c, a, a));
        assert!(!is(&mut c, a, b));
        let f1 = crate::numeric::mkflonum(&mut c, 2.5);
        let f2 = crate::numeric::mkflonum(&mut c, 2.5);
        assert!(is(&mut c, f1, f2));
    }

    #[test]
    fn iso_follows_structure_and_cycles() {
        let mut c = Interp::new();
        let a = c.cons(Value::Fixnum(1), Value::Nil);
        let a = c.cons(Value::Fixnum(0), a);
        let b = c.cons(Value::Fixnum(1), Value::Nil);
        let b = c.cons(Value::Fixnum(0), b);
        let mut visit = Vec::new();
        assert!(iso(&mut c, a, b, &mut visit));

        // self-referential cdr on both sides still terminates
        crate::value::scdr(a, a);
        crate::value::scdr(b, b);
        let mut visit = Vec::new();
        assert!(iso(&mut c, a, b, &mut visit));
    }
}
