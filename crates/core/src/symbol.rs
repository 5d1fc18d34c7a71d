//! Symbol interning
//!
//! Two tables: name string -> symbol value, and symbol value -> name
//! string. Indices come from the monotonically increasing `lastsym`
//! counter and are never recycled. Neither table is a GC root — a symbol
//! survives collection only while some live value references it, via the
//! collector's symbol-bucket marking.

use crate::interp::Interp;
use crate::string::{mkstring, to_rust_string};
use crate::table;
use crate::value::Value;

/// Intern `name`, creating a fresh symbol index on first sight.
///
/// Invariant: `reverse[intern(n)]` is `n`, and `forward[reverse[s]]` is `s`.
pub fn intern(c: &mut Interp, name: &str) -> Value {
    let namestr = mkstring(c, name);
    let symtable = c.symtable;
    let found = table::lookup(c, symtable, namestr);
    if let Value::Sym(_) = found {
        return found;
    }
    let sym = Value::Sym(c.lastsym);
    c.lastsym += 1;
    let symtable = c.symtable;
    let rsymtable = c.rsymtable;
    table::insert(c, symtable, namestr, sym);
    table::insert(c, rsymtable, sym, namestr);
    sym
}

/// Intern an in-heap string value.
pub fn intern_string(c: &mut Interp, namestr: Value) -> Value {
    intern(c, &to_rust_string(namestr))
}

/// The name string of a symbol, or `Unbound` if it was never interned
/// (or has been collected).
pub fn sym_name(c: &mut Interp, sym: Value) -> Value {
    debug_assert!(matches!(sym, Value::Sym(_)));
    let rsymtable = c.rsymtable;
    table::lookup(c, rsymtable, sym)
}

/// Printable name, for diagnostics and the writer.
pub fn sym_str(c: &mut Interp, sym: Value) -> String {
    match sym_name(c, sym) {
        Value::Unbound => match sym {
            Value::Sym(i) => format!("#<sym:{}>", i),
            _ => "#<sym:?>".to_string(),
        },
        name => to_rust_string(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut c = Interp::new();
        let a = intern(&mut c, "foo");
        let b = intern(&mut c, "foo");
        let d = intern(&mut c, "bar");
        assert_eq!(a, b);
        assert_ne!(a, d);
    }

    #[test]
    fn forward_and_reverse_agree() {
        let mut c = Interp::new();
        let s = intern(&mut c, "roundtrip");
        let name = sym_name(&mut c, s);
        assert_eq!(to_rust_string(name), "roundtrip");
        let again = intern_string(&mut c, name);
        assert_eq!(again, s);
    }

    #[test]
    fn indices_increase_monotonically() {
        let mut c = Interp::new();
        let before = c.lastsym;
        intern(&mut c, "fresh-one");
        intern(&mut c, "fresh-two");
        assert_eq!(c.lastsym, before + 2);
    }
}
