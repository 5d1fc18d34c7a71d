//! Type coercion and numeric string parsing
//!
//! The string-to-number grammar follows the interpreter's reader: a
//! trailing `i`/`j` means complex; a decimal point means flonum; `e`/`E`
//! is an exponent marker only when it cannot be a digit (base < 14), as is
//! `p`/`P` (base < 25) and `&` always; a `/` means rational; anything else
//! is an integer in the requested base (2..=36).

use num_bigint::BigInt;
use num_rational::Ratio;
use num_traits::{FromPrimitive, Num, ToPrimitive, Zero};

use crate::error::CoreError;
use crate::interp::{Builtin, Interp};
use crate::numeric::{
    self, mkcomplex, mkflonum, mkint, mkrational, ComplexCell, FlonumCell, RationalCell,
};
use crate::string::{self, char_of, mkchar, mkstring, mkstring_runes};
use crate::symbol;
use crate::value::{car, cdr, is_cons, type_name, type_of, vec_len, vec_ref, Tag, Type, Value};

// =============================================================================
// String -> number
// =============================================================================

/// Parse `s` as a number in `base`, per the reader's grammar.
pub fn str_to_num(c: &mut Interp, s: &str, base: u32) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.ends_with('i') || s.ends_with('j') {
        return parse_complex(c, &s[..s.len() - 1]);
    }
    if is_flonum_text(s, base) {
        return parse_flonum(s).map(|f| mkflonum(c, f));
    }
    if s.contains('/') {
        return parse_rational(c, s, base);
    }
    parse_int(s, base).map(|n| mkint(c, n))
}

fn is_flonum_text(s: &str, base: u32) -> bool {
    s.contains('.')
        || s.contains('&')
        || (base < 14 && s.chars().any(|ch| ch == 'e' || ch == 'E'))
        || (base < 25 && s.chars().any(|ch| ch == 'p' || ch == 'P'))
}

fn parse_flonum(s: &str) -> Option<f64> {
    let norm: String = s
        .chars()
        .map(|ch| match ch {
            '&' | 'p' | 'P' | 'E' => 'e',
            other => other,
        })
        .collect();
    norm.parse::<f64>().ok()
}

fn parse_int(s: &str, base: u32) -> Option<BigInt> {
    BigInt::from_str_radix(&s.to_lowercase(), base).ok()
}

fn parse_rational(c: &mut Interp, s: &str, base: u32) -> Option<Value> {
    let (num, den) = s.split_once('/')?;
    let n = parse_int(num, base)?;
    let d = parse_int(den, base)?;
    if d.is_zero() {
        return None;
    }
    Some(mkrational(c, Ratio::new(n, d)))
}

/// `a+bi` with the split at the last sign that is not an exponent sign.
fn parse_complex(c: &mut Interp, s: &str) -> Option<Value> {
    let chars: Vec<char> = s.chars().collect();
    let mut split = None;
    for i in (1..chars.len()).rev() {
        if (chars[i] == '+' || chars[i] == '-')
            && !matches!(chars[i - 1], 'e' | 'E' | 'p' | 'P' | '&')
        {
            split = Some(i);
            break;
        }
    }
    match split {
        Some(i) => {
            let re = parse_real(&s[..i])?;
            let imtext = &s[i..];
            let im = match imtext {
                "+" => 1.0,
                "-" => -1.0,
                _ => parse_real(imtext)?,
            };
            Some(mkcomplex(c, re, im))
        }
        None => {
            let im = if s.is_empty() { 1.0 } else { parse_real(s)? };
            Some(mkcomplex(c, 0.0, im))
        }
    }
}

fn parse_real(s: &str) -> Option<f64> {
    if is_flonum_text(s, 10) {
        parse_flonum(s)
    } else {
        parse_int(s, 10).and_then(|n| n.to_f64())
    }
}

// =============================================================================
// Coercion matrix
// =============================================================================

/// `coerce(obj, target, base)`. The target is a type symbol; the optional
/// base applies to string<->number conversions.
pub fn coerce(
    c: &mut Interp,
    obj: Value,
    target: Value,
    base: Option<i64>,
) -> Result<Value, CoreError> {
    let base = match base {
        None => 10,
        Some(b @ 2..=36) => b as u32,
        Some(b) => return Err(CoreError::BadBase(b)),
    };

    if target == c.builtin(Builtin::SInt) {
        return to_int(c, obj, base);
    }
    if target == c.builtin(Builtin::SNum) {
        return to_num(c, obj, base);
    }
    if target == c.builtin(Builtin::SChar) {
        return to_char(c, obj);
    }
    if target == c.builtin(Builtin::SString) {
        return to_string_val(c, obj, base);
    }
    if target == c.builtin(Builtin::SSym) {
        return to_sym(c, obj);
    }
    if target == c.builtin(Builtin::SCons) {
        return to_cons(c, obj);
    }
    if target == c.builtin(Builtin::SVector) {
        return to_vector(c, obj);
    }
    if target == c.builtin(Builtin::STable) {
        if crate::table::is_table(obj) {
            return Ok(obj);
        }
        return Err(bad(obj, "table"));
    }
    Err(CoreError::InvalidCoercion {
        from: type_name(type_of(obj)),
        to: match target {
            Value::Sym(_) => symbol::sym_str(c, target),
            _ => "non-symbol".to_string(),
        },
    })
}

fn bad(obj: Value, to: &str) -> CoreError {
    CoreError::InvalidCoercion {
        from: type_name(type_of(obj)),
        to: to.to_string(),
    }
}

fn to_int(c: &mut Interp, obj: Value, base: u32) -> Result<Value, CoreError> {
    match type_of(obj) {
        Type::Fixnum | Type::Heap(Tag::Bignum) => Ok(obj),
        Type::Heap(Tag::Rational) => {
            let q = unsafe { &obj.obj().cell::<RationalCell>().q };
            Ok(mkint(c, q.trunc().to_integer()))
        }
        Type::Heap(Tag::Flonum) => {
            let f = unsafe { obj.obj().cell::<FlonumCell>().f };
            match BigInt::from_f64(f.trunc()) {
                Some(n) => Ok(mkint(c, n)),
                None => Err(bad(obj, "int")),
            }
        }
        Type::Heap(Tag::Char) => Ok(Value::Fixnum(char_of(obj) as u32 as i64)),
        Type::Heap(Tag::Str) => {
            let text = string::to_rust_string(obj);
            match str_to_num(c, &text, base) {
                Some(n) => to_int(c, n, base),
                None => Err(CoreError::BadNumberSyntax { text, base }),
            }
        }
        _ => Err(bad(obj, "int")),
    }
}

fn to_num(c: &mut Interp, obj: Value, base: u32) -> Result<Value, CoreError> {
    if numeric::is_numeric(obj) {
        return Ok(obj);
    }
    match type_of(obj) {
        Type::Heap(Tag::Str) => {
            let text = string::to_rust_string(obj);
            str_to_num(c, &text, base).ok_or(CoreError::BadNumberSyntax { text, base })
        }
        Type::Heap(Tag::Char) => Ok(Value::Fixnum(char_of(obj) as u32 as i64)),
        _ => Err(bad(obj, "num")),
    }
}

fn to_char(c: &mut Interp, obj: Value) -> Result<Value, CoreError> {
    match type_of(obj) {
        Type::Heap(Tag::Char) => Ok(obj),
        Type::Fixnum => match char::from_u32(obj.fixnum() as u32) {
            Some(ch) => Ok(mkchar(c, ch)),
            None => Err(bad(obj, "char")),
        },
        _ => Err(bad(obj, "char")),
    }
}

fn to_string_val(c: &mut Interp, obj: Value, base: u32) -> Result<Value, CoreError> {
    if numeric::is_numeric(obj) {
        let text = numeric::num_to_string(obj, base);
        return Ok(mkstring(c, &text));
    }
    match type_of(obj) {
        Type::Heap(Tag::Str) => Ok(obj),
        Type::Heap(Tag::Char) => Ok(mkstring_runes(c, &[char_of(obj)])),
        Type::Sym => {
            let name = symbol::sym_str(c, obj);
            Ok(mkstring(c, &name))
        }
        Type::Nil => Ok(mkstring(c, "")),
        Type::Heap(Tag::Cons) => {
            let mut runes = Vec::new();
            let mut p = obj;
            while is_cons(p) {
                let e = car(p);
                match type_of(e) {
                    Type::Heap(Tag::Char) => runes.push(char_of(e)),
                    Type::Heap(Tag::Str) => runes.extend_from_slice(string::str_chars(e)),
                    _ => return Err(bad(e, "string")),
                }
                p = cdr(p);
            }
            Ok(mkstring_runes(c, &runes))
        }
        _ => Err(bad(obj, "string")),
    }
}

fn to_sym(c: &mut Interp, obj: Value) -> Result<Value, CoreError> {
    match type_of(obj) {
        Type::Sym => Ok(obj),
        Type::Heap(Tag::Str) => Ok(symbol::intern_string(c, obj)),
        _ => Err(bad(obj, "sym")),
    }
}

fn to_cons(c: &mut Interp, obj: Value) -> Result<Value, CoreError> {
    match type_of(obj) {
        Type::Nil | Type::Heap(Tag::Cons) => Ok(obj),
        Type::Heap(Tag::Str) => {
            let items: Vec<Value> = string::str_chars(obj)
                .to_vec()
                .into_iter()
                .map(|ch| mkchar(c, ch))
                .collect();
            Ok(c.list(&items))
        }
        Type::Heap(Tag::Vector) => {
            let items: Vec<Value> = (0..vec_len(obj)).map(|i| vec_ref(obj, i)).collect();
            Ok(c.list(&items))
        }
        // component selection: a complex splits into its (re . im) parts
        Type::Heap(Tag::Complex) => {
            let (re, im) = unsafe {
                let z = obj.obj().cell::<ComplexCell>();
                (z.re, z.im)
            };
            let rv = mkflonum(c, re);
            let iv = mkflonum(c, im);
            Ok(c.cons(rv, iv))
        }
        _ => Err(bad(obj, "cons")),
    }
}

fn to_vector(c: &mut Interp, obj: Value) -> Result<Value, CoreError> {
    match type_of(obj) {
        Type::Heap(Tag::Vector) => Ok(obj),
        Type::Nil => Ok(c.mkvector(0)),
        Type::Heap(Tag::Cons) => {
            let mut items = Vec::new();
            let mut p = obj;
            while is_cons(p) {
                items.push(car(p));
                p = cdr(p);
            }
            let v = c.mkvector(items.len());
            for (i, x) in items.into_iter().enumerate() {
                crate::value::vec_set(v, i, x);
            }
            Ok(v)
        }
        _ => Err(bad(obj, "vector")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::flonum_of;
    use crate::string::to_rust_string;

    fn target(c: &Interp, b: Builtin) -> Value {
        c.builtin(b)
    }

    #[test]
    fn base_two_string_to_int() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "100");
        let t = target(&c, Builtin::SInt);
        let r = coerce(&mut c, s, t, Some(2)).unwrap();
        assert_eq!(r, Value::Fixnum(4));
    }

    #[test]
    fn number_string_round_trip() {
        let mut c = Interp::new();
        for n in [0i64, 42, -17, 1 << 40] {
            let t = target(&c, Builtin::SString);
            let s = coerce(&mut c, Value::Fixnum(n), t, None).unwrap();
            let t = target(&c, Builtin::SNum);
            let back = coerce(&mut c, s, t, None).unwrap();
            assert_eq!(back, Value::Fixnum(n));
        }
    }

    #[test]
    fn parse_dispatch_rules() {
        let mut c = Interp::new();
        let f = str_to_num(&mut c, "3.25", 10).unwrap();
        assert_eq!(flonum_of(f), 3.25);
        let e = str_to_num(&mut c, "2e3", 10).unwrap();
        assert_eq!(flonum_of(e), 2000.0);
        let q = str_to_num(&mut c, "6/4", 10).unwrap();
        assert_eq!(type_of(q), Type::Heap(Tag::Rational));
        let z = str_to_num(&mut c, "1+2i", 10).unwrap();
        assert_eq!(type_of(z), Type::Heap(Tag::Complex));
        let n = str_to_num(&mut c, "ff", 16).unwrap();
        assert_eq!(n, Value::Fixnum(255));
        // e is a digit in base 16, not an exponent marker
        let he = str_to_num(&mut c, "1e", 16).unwrap();
        assert_eq!(he, Value::Fixnum(0x1e));
    }

    #[test]
    fn char_fixnum_round_trip() {
        let mut c = Interp::new();
        let ch = mkchar(&mut c, 'A');
        let t = target(&c, Builtin::SInt);
        let n = coerce(&mut c, ch, t, None).unwrap();
        assert_eq!(n, Value::Fixnum(65));
        let t = target(&c, Builtin::SChar);
        let back = coerce(&mut c, n, t, None).unwrap();
        assert_eq!(char_of(back), 'A');
    }

    #[test]
    fn string_sym_cons_conversions() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "abc");
        let t = target(&c, Builtin::SSym);
        let sym = coerce(&mut c, s, t, None).unwrap();
        assert_eq!(sym, crate::symbol::intern(&mut c, "abc"));

        let t = target(&c, Builtin::SCons);
        let l = coerce(&mut c, s, t, None).unwrap();
        assert_eq!(crate::value::list_len(l), 3);
        let t = target(&c, Builtin::SString);
        let back = coerce(&mut c, l, t, None).unwrap();
        assert_eq!(to_rust_string(back), "abc");
    }

    #[test]
    fn out_of_range_base_is_rejected() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "10");
        let t = target(&c, Builtin::SInt);
        assert_eq!(
            coerce(&mut c, s, t, Some(40)),
            Err(CoreError::BadBase(40))
        );
    }
}
