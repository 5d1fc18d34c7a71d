//! Numeric tower: fixnum < bignum < rational < flonum < complex
//!
//! Binary operations coerce both operands up to the higher type, compute,
//! then demote the result when it is exactly representable lower down: a
//! rational with unit denominator collapses to an integer, a big integer
//! inside the fixnum range collapses to a fixnum. Fixnum overflow promotes
//! to bignum. Exact division that does not divide evenly yields a rational.
//!
//! `+` additionally concatenates cons lists and builds strings from
//! char/string operands; nil is the identity.

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::Ratio;
use num_traits::{One, ToPrimitive, Zero};

use crate::error::CoreError;
use crate::interp::Interp;
use crate::string::{self, CharCell};
use crate::value::{
    car, cdr, has_tag, is_cons, type_name, type_of, CellHdr, Tag, Value, FIXNUM_MAX, FIXNUM_MIN,
};

#[repr(C)]
pub struct FlonumCell {
    pub hdr: CellHdr,
    pub f: f64,
}

#[repr(C)]
pub struct ComplexCell {
    pub hdr: CellHdr,
    pub re: f64,
    pub im: f64,
}

#[repr(C)]
pub struct BignumCell {
    pub hdr: CellHdr,
    pub n: BigInt,
}

#[repr(C)]
pub struct RationalCell {
    pub hdr: CellHdr,
    pub q: Ratio<BigInt>,
}

// =============================================================================
// Constructors (with demotion)
// =============================================================================

pub fn mkflonum(c: &mut Interp, f: f64) -> Value {
    let v = c.alloc_cell(Tag::Flonum, std::mem::size_of::<FlonumCell>());
    if let Value::Obj(r) = v {
        unsafe { r.cell::<FlonumCell>().f = f }
    }
    v
}

pub fn mkcomplex(c: &mut Interp, re: f64, im: f64) -> Value {
    let v = c.alloc_cell(Tag::Complex, std::mem::size_of::<ComplexCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let cell = r.cell::<ComplexCell>();
            cell.re = re;
            cell.im = im;
        }
    }
    v
}

/// Fixnum when in range, bignum cell otherwise.
pub fn mkint(c: &mut Interp, n: BigInt) -> Value {
    if let Some(i) = fits_fixnum(&n) {
        return Value::Fixnum(i);
    }
    let v = c.alloc_cell(Tag::Bignum, std::mem::size_of::<BignumCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let p = r.as_ptr().cast::<BignumCell>();
            (&raw mut (*p).n).write(n);
        }
    }
    v
}

/// Integer when the denominator reduces to one, rational cell otherwise.
pub fn mkrational(c: &mut Interp, q: Ratio<BigInt>) -> Value {
    if q.denom().is_one() {
        return mkint(c, q.numer().clone());
    }
    let v = c.alloc_cell(Tag::Rational, std::mem::size_of::<RationalCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let p = r.as_ptr().cast::<RationalCell>();
            (&raw mut (*p).q).write(q);
        }
    }
    v
}

fn fits_fixnum(n: &BigInt) -> Option<i64> {
    let i = n.to_i64()?;
    (FIXNUM_MIN..=FIXNUM_MAX).contains(&i).then_some(i)
}

// =============================================================================
// Classification and coercion up the tower
// =============================================================================

/// Position in the promotion order, or None for non-numbers.
fn rank(v: Value) -> Option<u8> {
    match v {
        Value::Fixnum(_) => Some(0),
        Value::Obj(r) => match r.tag() {
            Tag::Bignum => Some(1),
            Tag::Rational => Some(2),
            Tag::Flonum => Some(3),
            Tag::Complex => Some(4),
            _ => None,
        },
        _ => None,
    }
}

pub fn is_numeric(v: Value) -> bool {
    rank(v).is_some()
}

pub fn to_bigint(v: Value) -> BigInt {
    match v {
        Value::Fixnum(n) => BigInt::from(n),
        Value::Obj(r) if r.tag() == Tag::Bignum => unsafe { r.cell::<BignumCell>().n.clone() },
        _ => unreachable!("integer expected"),
    }
}

fn to_ratio(v: Value) -> Ratio<BigInt> {
    match v {
        Value::Obj(r) if r.tag() == Tag::Rational => unsafe { r.cell::<RationalCell>().q.clone() },
        _ => Ratio::from_integer(to_bigint(v)),
    }
}

pub fn to_f64(v: Value) -> f64 {
    match v {
        Value::Fixnum(n) => n as f64,
        Value::Obj(r) => unsafe {
            match r.tag() {
                Tag::Bignum => r.cell::<BignumCell>().n.to_f64().unwrap_or(f64::INFINITY),
                Tag::Rational => {
                    let q = &r.cell::<RationalCell>().q;
                    q.to_f64().unwrap_or(f64::INFINITY)
                }
                Tag::Flonum => r.cell::<FlonumCell>().f,
                _ => unreachable!("real number expected"),
            }
        },
        _ => unreachable!("real number expected"),
    }
}

fn to_complex(v: Value) -> (f64, f64) {
    match v {
        Value::Obj(r) if r.tag() == Tag::Complex => unsafe {
            let z = r.cell::<ComplexCell>();
            (z.re, z.im)
        },
        _ => (to_f64(v), 0.0),
    }
}

pub fn flonum_of(v: Value) -> f64 {
    debug_assert!(has_tag(v, Tag::Flonum));
    unsafe { v.obj().cell::<FlonumCell>().f }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// `+`: numeric addition, list concatenation, string building.
pub fn add(c: &mut Interp, a: Value, b: Value) -> Result<Value, CoreError> {
    // nil is the identity for whatever the other operand is
    if a.is_nil() {
        return Ok(b);
    }
    if b.is_nil() {
        return Ok(a);
    }
    if is_cons(a) && is_cons(b) {
        return Ok(list_append(c, a, b));
    }
    if is_textual(a) && is_textual(b) {
        return Ok(text_append(c, a, b));
    }
    numeric_binop(c, "+", a, b, |x, y| x.checked_add(y), |x, y| x + y, |x, y| x + y, |x, y| x + y, |x, y| {
        (x.0 + y.0, x.1 + y.1)
    })
}

pub fn sub(c: &mut Interp, a: Value, b: Value) -> Result<Value, CoreError> {
    numeric_binop(c, "-", a, b, |x, y| x.checked_sub(y), |x, y| x - y, |x, y| x - y, |x, y| x - y, |x, y| {
        (x.0 - y.0, x.1 - y.1)
    })
}

pub fn mul(c: &mut Interp, a: Value, b: Value) -> Result<Value, CoreError> {
    numeric_binop(c, "*", a, b, |x, y| x.checked_mul(y), |x, y| x * y, |x, y| x * y, |x, y| x * y, |x, y| {
        (x.0 * y.0 - x.1 * y.1, x.0 * y.1 + x.1 * y.0)
    })
}

/// `/`: exact integer division yields an integer when it divides evenly,
/// otherwise a rational. Exact division by zero is an error; flonum
/// division follows IEEE.
pub fn div(c: &mut Interp, a: Value, b: Value) -> Result<Value, CoreError> {
    let (ra, rb) = match (rank(a), rank(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(type_error("/", a, b)),
    };
    match ra.max(rb) {
        0 | 1 => {
            let (na, nb) = (to_bigint(a), to_bigint(b));
            if nb.is_zero() {
                return Err(CoreError::DivByZero);
            }
            let (q, r) = na.div_rem(&nb);
            if r.is_zero() {
                Ok(mkint(c, q))
            } else {
                Ok(mkrational(c, Ratio::new(na, nb)))
            }
        }
        2 => {
            let (qa, qb) = (to_ratio(a), to_ratio(b));
            if qb.is_zero() {
                return Err(CoreError::DivByZero);
            }
            Ok(mkrational(c, qa / qb))
        }
        3 => Ok(mkflonum(c, to_f64(a) / to_f64(b))),
        _ => {
            let ((ar, ai), (br, bi)) = (to_complex(a), to_complex(b));
            let d = br * br + bi * bi;
            Ok(mkcomplex(c, (ar * br + ai * bi) / d, (ai * br - ar * bi) / d))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn numeric_binop(
    c: &mut Interp,
    op: &'static str,
    a: Value,
    b: Value,
    fixop: fn(i64, i64) -> Option<i64>,
    bigop: fn(BigInt, BigInt) -> BigInt,
    ratop: fn(Ratio<BigInt>, Ratio<BigInt>) -> Ratio<BigInt>,
    floop: fn(f64, f64) -> f64,
    cpxop: fn((f64, f64), (f64, f64)) -> (f64, f64),
) -> Result<Value, CoreError> {
    let (ra, rb) = match (rank(a), rank(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(type_error(op, a, b)),
    };
    match ra.max(rb) {
        0 => {
            let (x, y) = (a.fixnum(), b.fixnum());
            match fixop(x, y) {
                Some(n) if (FIXNUM_MIN..=FIXNUM_MAX).contains(&n) => Ok(Value::Fixnum(n)),
                // overflow beyond the fixnum range promotes
                _ => Ok(mkint(c, bigop(BigInt::from(x), BigInt::from(y)))),
            }
        }
        1 => Ok(mkint(c, bigop(to_bigint(a), to_bigint(b)))),
        2 => Ok(mkrational(c, ratop(to_ratio(a), to_ratio(b)))),
        3 => Ok(mkflonum(c, floop(to_f64(a), to_f64(b)))),
        _ => {
            let (re, im) = cpxop(to_complex(a), to_complex(b));
            Ok(mkcomplex(c, re, im))
        }
    }
}

fn type_error(op: &'static str, a: Value, b: Value) -> CoreError {
    let found = if is_numeric(a) { b } else { a };
    CoreError::TypeMismatch {
        op,
        found: type_name(type_of(found)),
    }
}

fn is_textual(v: Value) -> bool {
    has_tag(v, Tag::Str) || has_tag(v, Tag::Char)
}

fn text_append(c: &mut Interp, a: Value, b: Value) -> Value {
    let mut runes = Vec::new();
    push_text(&mut runes, a);
    push_text(&mut runes, b);
    string::mkstring_runes(c, &runes)
}

fn push_text(runes: &mut Vec<char>, v: Value) {
    if has_tag(v, Tag::Str) {
        runes.extend_from_slice(string::str_chars(v));
    } else {
        runes.push(unsafe { v.obj().cell::<CharCell>().ch });
    }
}

/// Copying list concatenation; `b` becomes the shared tail.
pub fn list_append(c: &mut Interp, a: Value, b: Value) -> Value {
    let mut items = Vec::new();
    let mut p = a;
    while is_cons(p) {
        items.push(car(p));
        p = cdr(p);
    }
    let mut acc = b;
    for &v in items.iter().rev() {
        acc = c.cons(v, acc);
    }
    acc
}

// =============================================================================
// Printing
// =============================================================================

/// Textual form of a number in the given base. Inexact types only support
/// base 10.
pub fn num_to_string(v: Value, base: u32) -> String {
    match v {
        Value::Fixnum(n) => BigInt::from(n).to_str_radix(base),
        Value::Obj(r) => unsafe {
            match r.tag() {
                Tag::Bignum => r.cell::<BignumCell>().n.to_str_radix(base),
                Tag::Rational => {
                    let q = &r.cell::<RationalCell>().q;
                    format!("{}/{}", q.numer().to_str_radix(base), q.denom().to_str_radix(base))
                }
                Tag::Flonum => fmt_flonum(r.cell::<FlonumCell>().f),
                Tag::Complex => {
                    let z = r.cell::<ComplexCell>();
                    if z.im.is_sign_negative() {
                        format!("{}-{}i", fmt_flonum(z.re), fmt_flonum(z.im.abs()))
                    } else {
                        format!("{}+{}i", fmt_flonum(z.re), fmt_flonum(z.im))
                    }
                }
                _ => unreachable!("number expected"),
            }
        },
        _ => unreachable!("number expected"),
    }
}

fn fmt_flonum(f: f64) -> String {
    format!("{}", f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Type;

    fn fix(n: i64) -> Value {
        Value::Fixnum(n)
    }

    #[test]
    fn in_range_addition_stays_fixnum() {
        let mut c = Interp::new();
        let r = add(&mut c, fix(2), fix(3)).unwrap();
        assert_eq!(r, fix(5));
    }

    #[test]
    fn overflow_promotes_to_bignum() {
        let mut c = Interp::new();
        let r = add(&mut c, fix(FIXNUM_MAX), fix(1)).unwrap();
        assert_eq!(type_of(r), Type::Heap(Tag::Bignum));
        let back = sub(&mut c, r, fix(1)).unwrap();
        assert_eq!(back, fix(FIXNUM_MAX));
    }

    #[test]
    fn rational_arithmetic_demotes() {
        let mut c = Interp::new();
        // 1/2 * 2 = 1, returned as a fixnum
        let half = div(&mut c, fix(1), fix(2)).unwrap();
        assert_eq!(type_of(half), Type::Heap(Tag::Rational));
        let one = mul(&mut c, half, fix(2)).unwrap();
        assert_eq!(one, fix(1));
        // even division never builds a rational
        assert_eq!(div(&mut c, fix(-8), fix(2)).unwrap(), fix(-4));
        assert_eq!(div(&mut c, fix(6), fix(-3)).unwrap(), fix(-2));
    }

    #[test]
    fn rational_addition_cross_multiplies() {
        let mut c = Interp::new();
        let a = div(&mut c, fix(1), fix(3)).unwrap();
        let b = div(&mut c, fix(1), fix(6)).unwrap();
        let s = add(&mut c, a, b).unwrap();
        // 1/3 + 1/6 = 1/2
        let half = div(&mut c, fix(1), fix(2)).unwrap();
        assert!(crate::types::is(&mut c, s, half));
    }

    #[test]
    fn self_division_is_one() {
        let mut c = Interp::new();
        for v in [fix(7), fix(-3)] {
            assert_eq!(div(&mut c, v, v).unwrap(), fix(1));
        }
        let f = mkflonum(&mut c, 2.5);
        let q = div(&mut c, f, f).unwrap();
        assert_eq!(flonum_of(q), 1.0);
    }

    #[test]
    fn exact_division_by_zero_is_an_error() {
        let mut c = Interp::new();
        assert_eq!(div(&mut c, fix(1), fix(0)), Err(CoreError::DivByZero));
    }

    #[test]
    fn mixed_rank_promotes_to_flonum() {
        let mut c = Interp::new();
        let f = mkflonum(&mut c, 0.5);
        let r = add(&mut c, fix(1), f).unwrap();
        assert_eq!(flonum_of(r), 1.5);
    }

    #[test]
    fn complex_multiplication() {
        let mut c = Interp::new();
        // (1+2i)(3+4i) = -5+10i
        let a = mkcomplex(&mut c, 1.0, 2.0);
        let b = mkcomplex(&mut c, 3.0, 4.0);
        let z = mul(&mut c, a, b).unwrap();
        unsafe {
            let cell = z.obj().cell::<ComplexCell>();
            assert_eq!((cell.re, cell.im), (-5.0, 10.0));
        }
    }

    #[test]
    fn plus_concatenates_lists_and_keeps_nil_identity() {
        let mut c = Interp::new();
        let a = c.list(&[fix(1), fix(2)]);
        let b = c.list(&[fix(3)]);
        let ab = add(&mut c, a, b).unwrap();
        assert_eq!(crate::value::list_len(ab), 3);
        assert_eq!(add(&mut c, a, Value::Nil).unwrap(), a);
        assert_eq!(add(&mut c, Value::Nil, b).unwrap(), b);
    }

    #[test]
    fn plus_builds_strings_from_chars() {
        let mut c = Interp::new();
        let s = string::mkstring(&mut c, "ab");
        let ch = string::mkchar(&mut c, 'c');
        let r = add(&mut c, s, ch).unwrap();
        assert_eq!(string::to_rust_string(r), "abc");
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut c = Interp::new();
        let t = crate::table::mktable(&mut c, 2);
        assert!(matches!(
            add(&mut c, fix(1), t),
            Err(CoreError::TypeMismatch { op: "+", .. })
        ));
    }
}
