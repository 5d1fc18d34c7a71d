//! Writer: readable (`write`) and display (`disp`) renditions
//!
//! Recursion carries a visit set; a cell seen twice prints as `(...)`, so
//! cyclic structure terminates.

use crate::interp::Interp;
use crate::numeric::num_to_string;
use crate::string::{char_of, str_chars};
use crate::symbol::sym_str;
use crate::table;
use crate::value::{car, cdr, is_cons, vec_len, vec_ref, ObjRef, Tag, Value};

/// Render `v`. `write_mode` quotes strings and names characters; display
/// mode emits raw text.
pub fn write_value(c: &mut Interp, v: Value, write_mode: bool) -> String {
    let mut out = String::new();
    let mut visit = Vec::new();
    write_rec(c, v, &mut out, &mut visit, write_mode);
    out
}

fn write_rec(c: &mut Interp, v: Value, out: &mut String, visit: &mut Vec<ObjRef>, wm: bool) {
    match v {
        Value::Nil => out.push_str("nil"),
        Value::True => out.push_str("t"),
        Value::Undef => out.push_str("#<undef>"),
        Value::Unbound => out.push_str("#<unbound>"),
        Value::LastArg => out.push_str("#<last-arg>"),
        Value::Fixnum(_) => out.push_str(&num_to_string(v, 10)),
        Value::Sym(_) => out.push_str(&sym_str(c, v)),
        Value::Obj(r) => write_obj(c, r, out, visit, wm),
    }
}

fn write_obj(c: &mut Interp, r: ObjRef, out: &mut String, visit: &mut Vec<ObjRef>, wm: bool) {
    let v = Value::Obj(r);
    match r.tag() {
        Tag::Bignum | Tag::Rational | Tag::Flonum | Tag::Complex => {
            out.push_str(&num_to_string(v, 10));
        }
        Tag::Char => {
            let ch = char_of(v);
            if wm {
                out.push_str(&write_char(ch));
            } else {
                out.push(ch);
            }
        }
        Tag::Str => {
            if wm {
                out.push('"');
                for &ch in str_chars(v) {
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        other => out.push(other),
                    }
                }
                out.push('"');
            } else {
                out.extend(str_chars(v).iter());
            }
        }
        Tag::Cons => {
            if visit.contains(&r) {
                out.push_str("(...)");
                return;
            }
            visit.push(r);
            out.push('(');
            let mut p = v;
            loop {
                let a = car(p);
                write_rec(c, a, out, visit, wm);
                let d = cdr(p);
                if d.is_nil() {
                    break;
                }
                if is_cons(d) {
                    if let Value::Obj(dr) = d {
                        if visit.contains(&dr) {
                            out.push_str(" (...)");
                            break;
                        }
                        visit.push(dr);
                    }
                    out.push(' ');
                    p = d;
                } else {
                    out.push_str(" . ");
                    write_rec(c, d, out, visit, wm);
                    break;
                }
            }
            out.push(')');
        }
        Tag::Vector => {
            if visit.contains(&r) {
                out.push_str("(...)");
                return;
            }
            visit.push(r);
            out.push_str("#(");
            for i in 0..vec_len(v) {
                if i > 0 {
                    out.push(' ');
                }
                let x = vec_ref(v, i);
                write_rec(c, x, out, visit, wm);
            }
            out.push(')');
        }
        Tag::Tagged => {
            out.push_str("#(tagged ");
            let t = car(v);
            write_rec(c, t, out, visit, wm);
            out.push(' ');
            let rep = cdr(v);
            write_rec(c, rep, out, visit, wm);
            out.push(')');
        }
        Tag::Table | Tag::WTable => {
            out.push_str(&format!("#<table n={}>", table::count(v)));
        }
        Tag::Exception => {
            let msg = unsafe { r.cell::<crate::error::ExcCell>() }.msg;
            out.push_str("#<exception: ");
            write_rec(c, msg, out, visit, false);
            out.push('>');
        }
        Tag::Clos => out.push_str("#<procedure>"),
        Tag::Code => out.push_str("#<code>"),
        Tag::CCode => {
            let name = crate::code::ccode_mut(v).name;
            out.push_str("#<procedure:");
            write_rec(c, name, out, visit, false);
            out.push('>');
        }
        Tag::Cont => out.push_str("#<continuation>"),
        Tag::Env => out.push_str("#<env>"),
        Tag::Thread => {
            let tid = crate::thread::thread_mut(v).tid;
            out.push_str(&format!("#<thread:{}>", tid));
        }
        Tag::InPort => write_via_typefn(c, v, out, visit, wm, "#<input-port>"),
        Tag::OutPort => write_via_typefn(c, v, out, visit, wm, "#<output-port>"),
        Tag::Custom | Tag::Chan | Tag::TypeDesc => {
            write_via_typefn(c, v, out, visit, wm, "#<custom>")
        }
        Tag::TBucket => out.push_str("#<tbucket>"),
    }
}

fn write_via_typefn(
    c: &mut Interp,
    v: Value,
    out: &mut String,
    visit: &mut Vec<ObjRef>,
    wm: bool,
    fallback: &str,
) {
    let pp = crate::types::typefn(c, v.obj().tag()).and_then(|tf| tf.pprint);
    match pp {
        Some(f) => f(c, v, out, visit, wm),
        None => out.push_str(fallback),
    }
}

fn write_char(ch: char) -> String {
    match ch {
        ' ' => "#\\space".to_string(),
        '\n' => "#\\newline".to_string(),
        '\t' => "#\\tab".to_string(),
        '\r' => "#\\return".to_string(),
        '\0' => "#\\nul".to_string(),
        other => format!("#\\{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::mkflonum;
    use crate::string::mkstring;
    use crate::symbol::intern;

    #[test]
    fn atoms_render() {
        let mut c = Interp::new();
        assert_eq!(write_value(&mut c, Value::Nil, true), "nil");
        assert_eq!(write_value(&mut c, Value::True, true), "t");
        assert_eq!(write_value(&mut c, Value::Fixnum(-42), true), "-42");
        let f = mkflonum(&mut c, 2.5);
        assert_eq!(write_value(&mut c, f, true), "2.5");
        let s = intern(&mut c, "foo");
        assert_eq!(write_value(&mut c, s, true), "foo");
    }

    #[test]
    fn write_quotes_strings_disp_does_not() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "a\"b");
        assert_eq!(write_value(&mut c, s, true), "\"a\\\"b\"");
        assert_eq!(write_value(&mut c, s, false), "a\"b");
    }

    #[test]
    fn lists_and_dotted_pairs() {
        let mut c = Interp::new();
        let l = c.list(&[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]);
        assert_eq!(write_value(&mut c, l, true), "(1 2 3)");
        let p = c.cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(write_value(&mut c, p, true), "(1 . 2)");
    }

    #[test]
    fn cycles_print_finitely() {
        let mut c = Interp::new();
        let a = c.cons(Value::Fixnum(1), Value::Nil);
        crate::value::scdr(a, a);
        let s = write_value(&mut c, a, true);
        assert!(s.contains("(...)"), "unexpected rendition: {s}");
    }
}
