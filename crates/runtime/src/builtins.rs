//! Built-in primitives
//!
//! Registration of the foreign functions and builtin macros that populate
//! the global environment, plus the compiler's special-form and
//! inline-function tables. Most primitives run to completion in one step;
//! the ones that call back into interpreted code (`apply`, `on-err`) or
//! wait on descriptors (`readc`) are written as resumable state machines
//! over the foreign-function verbs.

use arcueid_core::code::{mkccode, Op};
use arcueid_core::coerce::coerce;
use arcueid_core::pprint::write_value;
use arcueid_core::string::{mkchar, mkstring, str_chars, str_len, str_set_index, to_rust_string};
use arcueid_core::symbol::intern;
use arcueid_core::table;
use arcueid_core::thread::{env_ref, env_set, thread_mut};
use arcueid_core::types::{is, iso, type_sym, AffStep};
use arcueid_core::value::{
    car, cdr, has_tag, is_cons, list_len, scar, scdr, type_name, type_of, vec_len, vec_ref,
    vec_set, Tag, Type, Value,
};
use arcueid_core::{numeric, Builtin, Interp};

use crate::aff::{aff_args, aff_call, aff_env, aff_iowait, aff_label, aff_return, aff_yield};
use crate::error::{mkerr, raise, Raise};
use crate::io;
use crate::sched;

/// Install ports, primitives, macros, and the compiler tables.
pub fn init(c: &mut Interp) {
    io::init(c);

    defprim(c, "+", -1, prim_add);
    defprim(c, "-", -2, prim_sub);
    defprim(c, "*", -1, prim_mul);
    defprim(c, "/", -2, prim_div);
    defprim(c, "is", 2, prim_is);
    defprim(c, "iso", 2, prim_iso);
    defprim(c, "cons", 2, prim_cons);
    defprim(c, "car", 1, prim_car);
    defprim(c, "cdr", 1, prim_cdr);
    defprim(c, "scar", 2, prim_scar);
    defprim(c, "scdr", 2, prim_scdr);
    defprim(c, "list", -1, prim_list);
    defprim(c, "len", 1, prim_len);
    defprim(c, "coerce", -3, prim_coerce);
    defprim(c, "type", 1, prim_type);
    defprim(c, "annotate", 2, prim_annotate);
    defprim(c, "rep", 1, prim_rep);
    defprim(c, "sref", 3, prim_sref);
    defprim(c, "table", 0, prim_table);
    defprim(c, "string", -1, prim_string);
    defprim(c, "sym", 1, prim_sym);
    defprim(c, "err", -2, prim_err);
    defprim(c, "on-err", 2, prim_on_err);
    defprim(c, "apply", 2, prim_apply);
    defprim(c, "spawn", 1, prim_spawn);
    defprim(c, "yield", 0, prim_yield);
    defprim(c, "write", -2, prim_write);
    defprim(c, "disp", -2, prim_disp);
    defprim(c, "readc", -1, prim_readc);
    defprim(c, "instring", 1, prim_instring);
    defprim(c, "outstring", 0, prim_outstring);
    defprim(c, "inside", 1, prim_inside);
    defprim(c, "close", 1, prim_close);
    defprim(c, "quit", -1, prim_quit);

    defmac(c, "let", mac_let);
    defmac(c, "do", mac_do);
    defmac(c, "def", mac_def);
    defmac(c, "when", mac_when);

    init_splforms(c);
    init_inlfuncs(c);
}

fn defprim(c: &mut Interp, name: &str, argc: i32, f: arcueid_core::code::AffFn) -> Value {
    let namev = mkstring(c, name);
    let prim = mkccode(c, argc, f, namev);
    let sym = intern(c, name);
    let genv = c.genv;
    table::insert(c, genv, sym, prim);
    prim
}

fn defmac(c: &mut Interp, name: &str, f: arcueid_core::code::AffFn) {
    let namev = mkstring(c, name);
    let prim = mkccode(c, -1, f, namev);
    let mac_sym = c.builtin(Builtin::Mac);
    let mac = c.tagged(mac_sym, prim);
    let sym = intern(c, name);
    let genv = c.genv;
    table::insert(c, genv, sym, mac);
}

/// Symbol -> special-form discriminant, in the compiler's order.
fn init_splforms(c: &mut Interp) {
    let forms = [
        Builtin::If,
        Builtin::Fn,
        Builtin::Quote,
        Builtin::QQuote,
        Builtin::Assign,
    ];
    for (i, b) in forms.into_iter().enumerate() {
        let sym = c.builtin(b);
        let splforms = c.splforms;
        table::insert(c, splforms, sym, Value::Fixnum(i as i64));
    }
}

/// Symbol -> (opcode . pristine-primitive): the compiler emits the opcode
/// only while the global binding is still the registered primitive.
fn init_inlfuncs(c: &mut Interp) {
    let pairs = [
        ("+", Op::Add),
        ("-", Op::Sub),
        ("*", Op::Mul),
        ("/", Op::Div),
        ("cons", Op::Cons),
        ("car", Op::Car),
        ("cdr", Op::Cdr),
        ("is", Op::Is),
    ];
    for (name, op) in pairs {
        let sym = intern(c, name);
        let genv = c.genv;
        let prim = table::lookup(c, genv, sym);
        let entry = c.cons(Value::Fixnum(op as i64), prim);
        let inlfuncs = c.inlfuncs;
        table::insert(c, inlfuncs, sym, entry);
    }
}

/// Raise an error from inside a primitive; the returned step continues
/// into the handler or parks the finished thread.
fn err_step(c: &mut Interp, thr: Value, msg: &str, payload: Value) -> AffStep {
    let exc = mkerr(c, thr, msg, payload);
    match raise(c, thr, exc) {
        Raise::Handled => AffStep::FnApp,
        Raise::TopLevel => AffStep::Return,
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

fn fold_arith(
    c: &mut Interp,
    thr: Value,
    op: fn(&mut Interp, Value, Value) -> Result<Value, arcueid_core::CoreError>,
    unit: Value,
    invert_single: bool,
) -> AffStep {
    let args = aff_args(thr);
    let mut acc = match args.len() {
        0 => return aff_return(thr, unit),
        1 if invert_single => unit,
        _ => args[0],
    };
    let rest = if args.len() == 1 && invert_single { &args[..] } else { &args[1..] };
    for &a in rest {
        match op(c, acc, a) {
            Ok(v) => acc = v,
            Err(e) => return err_step(c, thr, &e.to_string(), Value::Nil),
        }
    }
    aff_return(thr, acc)
}

fn prim_add(c: &mut Interp, thr: Value) -> AffStep {
    fold_arith(c, thr, numeric::add, Value::Fixnum(0), false)
}

fn prim_sub(c: &mut Interp, thr: Value) -> AffStep {
    fold_arith(c, thr, numeric::sub, Value::Fixnum(0), true)
}

fn prim_mul(c: &mut Interp, thr: Value) -> AffStep {
    fold_arith(c, thr, numeric::mul, Value::Fixnum(1), false)
}

fn prim_div(c: &mut Interp, thr: Value) -> AffStep {
    fold_arith(c, thr, numeric::div, Value::Fixnum(1), true)
}

// =============================================================================
// Predicates and pairs
// =============================================================================

fn bool_val(b: bool) -> Value {
    if b { Value::True } else { Value::Nil }
}

fn prim_is(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let r = is(c, args[0], args[1]);
    aff_return(thr, bool_val(r))
}

fn prim_iso(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let mut visit = Vec::new();
    let r = iso(c, args[0], args[1], &mut visit);
    aff_return(thr, bool_val(r))
}

fn prim_cons(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let v = c.cons(args[0], args[1]);
    aff_return(thr, v)
}

fn prim_car(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    match args[0] {
        Value::Nil => aff_return(thr, Value::Nil),
        v if is_cons(v) => aff_return(thr, car(v)),
        v => err_step(c, thr, &format!("car: invalid operand of type {}", type_name(type_of(v))), v),
    }
}

fn prim_cdr(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    match args[0] {
        Value::Nil => aff_return(thr, Value::Nil),
        v if is_cons(v) => aff_return(thr, cdr(v)),
        v => err_step(c, thr, &format!("cdr: invalid operand of type {}", type_name(type_of(v))), v),
    }
}

fn prim_scar(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !is_cons(args[0]) {
        return err_step(c, thr, "scar: not a cons", args[0]);
    }
    scar(args[0], args[1]);
    aff_return(thr, args[1])
}

fn prim_scdr(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !is_cons(args[0]) {
        return err_step(c, thr, "scdr: not a cons", args[0]);
    }
    scdr(args[0], args[1]);
    aff_return(thr, args[1])
}

fn prim_list(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let l = c.list(&args);
    aff_return(thr, l)
}

fn prim_len(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let n = match type_of(args[0]) {
        Type::Nil => 0,
        Type::Heap(Tag::Cons) => list_len(args[0]),
        Type::Heap(Tag::Str) => str_len(args[0]),
        Type::Heap(Tag::Vector) => vec_len(args[0]),
        Type::Heap(Tag::Table) | Type::Heap(Tag::WTable) => table::count(args[0]),
        _ => return err_step(c, thr, "len: invalid operand", args[0]),
    };
    aff_return(thr, Value::Fixnum(n as i64))
}

// =============================================================================
// Types and coercion
// =============================================================================

fn prim_coerce(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let base = args.get(2).map(|v| match v {
        Value::Fixnum(n) => *n,
        _ => -1,
    });
    match coerce(c, args[0], args[1], base) {
        Ok(v) => aff_return(thr, v),
        Err(e) => err_step(c, thr, &e.to_string(), args[0]),
    }
}

fn prim_type(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let t = type_sym(c, args[0]);
    aff_return(thr, t)
}

fn prim_annotate(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !matches!(args[0], Value::Sym(_)) {
        return err_step(c, thr, "annotate: type must be a symbol", args[0]);
    }
    if has_tag(args[1], Tag::Tagged) && car(args[1]) == args[0] {
        return aff_return(thr, args[1]);
    }
    let v = c.tagged(args[0], args[1]);
    aff_return(thr, v)
}

fn prim_rep(c: &mut Interp, thr: Value) -> AffStep {
    let _ = c;
    let args = aff_args(thr);
    let v = if has_tag(args[0], Tag::Tagged) { cdr(args[0]) } else { args[0] };
    aff_return(thr, v)
}

/// `(sref g v k)`: structure assignment for tables, strings, vectors, and
/// list cells.
fn prim_sref(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let (g, v, k) = (args[0], args[1], args[2]);
    match type_of(g) {
        Type::Heap(Tag::Table) | Type::Heap(Tag::WTable) => {
            if v.is_nil() {
                table::delete(c, g, k);
            } else {
                table::insert(c, g, k, v);
            }
            aff_return(thr, v)
        }
        Type::Heap(Tag::Str) => {
            let (Value::Fixnum(i), Type::Heap(Tag::Char)) = (k, type_of(v)) else {
                return err_step(c, thr, "sref: string wants index and char", g);
            };
            if i < 0 || i as usize >= str_len(g) {
                return err_step(c, thr, "sref: index out of range", k);
            }
            str_set_index(g, i as usize, arcueid_core::string::char_of(v));
            aff_return(thr, v)
        }
        Type::Heap(Tag::Vector) => {
            let Value::Fixnum(i) = k else {
                return err_step(c, thr, "sref: vector wants a fixnum index", k);
            };
            if i < 0 || i as usize >= vec_len(g) {
                return err_step(c, thr, "sref: index out of range", k);
            }
            vec_set(g, i as usize, v);
            aff_return(thr, v)
        }
        Type::Heap(Tag::Cons) => {
            let Value::Fixnum(i) = k else {
                return err_step(c, thr, "sref: list wants a fixnum index", k);
            };
            let mut p = g;
            for _ in 0..i {
                p = cdr(p);
                if !is_cons(p) {
                    return err_step(c, thr, "sref: index out of range", k);
                }
            }
            scar(p, v);
            aff_return(thr, v)
        }
        _ => err_step(c, thr, "sref: unsupported structure", g),
    }
}

fn prim_table(c: &mut Interp, thr: Value) -> AffStep {
    let _ = aff_args(thr);
    let t = table::mktable(c, 6);
    aff_return(thr, t)
}

fn prim_string(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let mut text = String::new();
    let target = c.builtin(Builtin::SString);
    for &a in &args {
        match coerce(c, a, target, None) {
            Ok(s) => text.push_str(&to_rust_string(s)),
            Err(e) => return err_step(c, thr, &e.to_string(), a),
        }
    }
    let s = mkstring(c, &text);
    aff_return(thr, s)
}

fn prim_sym(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let target = c.builtin(Builtin::SSym);
    match coerce(c, args[0], target, None) {
        Ok(v) => aff_return(thr, v),
        Err(e) => err_step(c, thr, &e.to_string(), args[0]),
    }
}

// =============================================================================
// Errors
// =============================================================================

fn prim_err(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let msg = match type_of(args[0]) {
        Type::Heap(Tag::Str) => to_rust_string(args[0]),
        _ => write_value(c, args[0], false),
    };
    let payload = args.get(1).copied().unwrap_or(Value::Nil);
    err_step(c, thr, &msg, payload)
}

/// `(on-err handler thunk)`: run the thunk with an error continuation
/// installed for its dynamic extent. The handler receives the exception
/// and its result flows where the thunk's would have.
fn prim_on_err(c: &mut Interp, thr: Value) -> AffStep {
    match aff_label(thr) {
        0 => {
            let args = aff_args(thr);
            let (handler, thunk) = (args[0], args[1]);
            let env = aff_env(c, thr, 1);
            // resume point 1 receives both the normal and the handled result
            let k = arcueid_core::thread::mkcont(c, thr, 1);
            let entry = c.cons(handler, k);
            env_set(env, 0, 0, entry);
            let prev_chain = thread_mut(thr).econt;
            let chain = c.cons(entry, prev_chain);
            thread_mut(thr).econt = chain;
            aff_call(c, thr, 1, thunk, &[])
        }
        _ => {
            // pop our entry unless a raise already consumed it
            let envr = thread_mut(thr).envr;
            let entry = env_ref(envr, 0, 0);
            let econt = thread_mut(thr).econt;
            if is_cons(econt) && car(econt) == entry {
                thread_mut(thr).econt = cdr(econt);
            }
            let v = thread_mut(thr).valr;
            aff_return(thr, v)
        }
    }
}

// =============================================================================
// Application and threads
// =============================================================================

fn prim_apply(c: &mut Interp, thr: Value) -> AffStep {
    match aff_label(thr) {
        0 => {
            let args = aff_args(thr);
            let f = args[0];
            let mut spread = Vec::new();
            let mut p = args[1];
            while is_cons(p) {
                spread.push(car(p));
                p = cdr(p);
            }
            aff_call(c, thr, 1, f, &spread)
        }
        _ => {
            let v = thread_mut(thr).valr;
            aff_return(thr, v)
        }
    }
}

fn prim_spawn(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let t = sched::spawn(c, args[0]);
    aff_return(thr, t)
}

fn prim_yield(c: &mut Interp, thr: Value) -> AffStep {
    let _ = c;
    match aff_label(thr) {
        0 => {
            let _ = aff_args(thr);
            aff_yield(thr, 1)
        }
        _ => aff_return(thr, Value::Nil),
    }
}

fn prim_quit(_c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let code = match args.first() {
        Some(Value::Fixnum(n)) => *n as i32,
        _ => 0,
    };
    std::process::exit(code);
}

// =============================================================================
// Ports
// =============================================================================

fn output_port(c: &mut Interp, thr: Value, arg: Option<Value>) -> Result<Value, AffStep> {
    let port = match arg {
        Some(p) => p,
        None => {
            let stdh = thread_mut(thr).stdh;
            if has_tag(stdh, Tag::Vector) { vec_ref(stdh, 1) } else { Value::Nil }
        }
    };
    if has_tag(port, Tag::OutPort) {
        Ok(port)
    } else {
        Err(err_step(c, thr, "not an output port", port))
    }
}

fn write_prim(c: &mut Interp, thr: Value, write_mode: bool) -> AffStep {
    let args = aff_args(thr);
    let port = match output_port(c, thr, args.get(1).copied()) {
        Ok(p) => p,
        Err(step) => return step,
    };
    let text = write_value(c, args[0], write_mode);
    let backend = io::backend_mut(port);
    for ch in text.chars() {
        if !backend.putb(ch) {
            return err_step(c, thr, "write on closed port", port);
        }
    }
    aff_return(thr, args[0])
}

fn prim_write(c: &mut Interp, thr: Value) -> AffStep {
    write_prim(c, thr, true)
}

fn prim_disp(c: &mut Interp, thr: Value) -> AffStep {
    write_prim(c, thr, false)
}

/// `(readc [port])`: one rune, or nil at end of input. Suspends on the
/// port's descriptor instead of blocking the scheduler.
fn prim_readc(c: &mut Interp, thr: Value) -> AffStep {
    match aff_label(thr) {
        0 => {
            let args = aff_args(thr);
            let port = match args.first().copied() {
                Some(p) => p,
                None => {
                    let stdh = thread_mut(thr).stdh;
                    if has_tag(stdh, Tag::Vector) { vec_ref(stdh, 0) } else { Value::Nil }
                }
            };
            if !has_tag(port, Tag::InPort) {
                return err_step(c, thr, "not an input port", port);
            }
            let env = aff_env(c, thr, 1);
            env_set(env, 0, 0, port);
            read_or_wait(c, thr, port)
        }
        _ => {
            let envr = thread_mut(thr).envr;
            let port = env_ref(envr, 0, 0);
            read_or_wait(c, thr, port)
        }
    }
}

fn read_or_wait(c: &mut Interp, thr: Value, port: Value) -> AffStep {
    let backend = io::backend_mut(port);
    if backend.ready() {
        match backend.getb() {
            Some(ch) => {
                let v = mkchar(c, ch);
                aff_return(thr, v)
            }
            None => aff_return(thr, Value::Nil),
        }
    } else if let Some(fd) = backend.fd() {
        aff_iowait(c, thr, 1, fd)
    } else {
        match backend.getb() {
            Some(ch) => {
                let v = mkchar(c, ch);
                aff_return(thr, v)
            }
            None => aff_return(thr, Value::Nil),
        }
    }
}

fn prim_instring(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !has_tag(args[0], Tag::Str) {
        return err_step(c, thr, "instring: not a string", args[0]);
    }
    let text: String = str_chars(args[0]).iter().collect();
    let p = io::instring(c, &text, "string");
    aff_return(thr, p)
}

fn prim_outstring(c: &mut Interp, thr: Value) -> AffStep {
    let _ = aff_args(thr);
    let p = io::outstring(c, "string");
    aff_return(thr, p)
}

fn prim_inside(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !has_tag(args[0], Tag::OutPort) {
        return err_step(c, thr, "inside: not an output string port", args[0]);
    }
    match io::inside(c, args[0]) {
        Some(s) => aff_return(thr, s),
        None => err_step(c, thr, "inside: not an output string port", args[0]),
    }
}

fn prim_close(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if !io::is_port(args[0]) {
        return err_step(c, thr, "close: not a port", args[0]);
    }
    io::backend_mut(args[0]).close();
    aff_return(thr, Value::Nil)
}

// =============================================================================
// Builtin macros
// =============================================================================

/// `(let ((x 1) (y 2)) body...)` or `(let x 1 body...)` rewrites to an
/// immediate `fn` application.
fn mac_let(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if args.is_empty() {
        return err_step(c, thr, "let: missing bindings", Value::Nil);
    }
    let fn_sym = c.builtin(Builtin::Fn);
    let (names, vals, body) = if matches!(args[0], Value::Sym(_)) {
        if args.len() < 2 {
            return err_step(c, thr, "let: missing value", args[0]);
        }
        (vec![args[0]], vec![args[1]], args[2..].to_vec())
    } else {
        let mut names = Vec::new();
        let mut vals = Vec::new();
        let mut p = args[0];
        while is_cons(p) {
            let binding = car(p);
            if !is_cons(binding) {
                return err_step(c, thr, "let: malformed binding", binding);
            }
            names.push(car(binding));
            vals.push(if is_cons(cdr(binding)) { car(cdr(binding)) } else { Value::Nil });
            p = cdr(p);
        }
        (names, vals, args[1..].to_vec())
    };
    let params = c.list(&names);
    let mut lambda_items = vec![fn_sym, params];
    lambda_items.extend_from_slice(&body);
    let lambda = c.list(&lambda_items);
    let mut call_items = vec![lambda];
    call_items.extend_from_slice(&vals);
    let expansion = c.list(&call_items);
    aff_return(thr, expansion)
}

/// `(do e1 e2 ...)` rewrites to `((fn () e1 e2 ...))`.
fn mac_do(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    let fn_sym = c.builtin(Builtin::Fn);
    let mut lambda_items = vec![fn_sym, Value::Nil];
    lambda_items.extend_from_slice(&args);
    let lambda = c.list(&lambda_items);
    let expansion = c.list(&[lambda]);
    aff_return(thr, expansion)
}

/// `(def name args body...)` rewrites to `(assign name (fn args body...))`.
fn mac_def(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if args.len() < 2 {
        return err_step(c, thr, "def: missing name or arguments", Value::Nil);
    }
    let fn_sym = c.builtin(Builtin::Fn);
    let assign_sym = c.builtin(Builtin::Assign);
    let mut lambda_items = vec![fn_sym, args[1]];
    lambda_items.extend_from_slice(&args[2..]);
    let lambda = c.list(&lambda_items);
    let expansion = c.list(&[assign_sym, args[0], lambda]);
    aff_return(thr, expansion)
}

/// `(when test body...)` rewrites to `(if test (do body...))`.
fn mac_when(c: &mut Interp, thr: Value) -> AffStep {
    let args = aff_args(thr);
    if args.is_empty() {
        return err_step(c, thr, "when: missing test", Value::Nil);
    }
    let if_sym = c.builtin(Builtin::If);
    let do_sym = intern(c, "do");
    let mut do_items = vec![do_sym];
    do_items.extend_from_slice(&args[1..]);
    let do_form = c.list(&do_items);
    let expansion = c.list(&[if_sym, args[0], do_form]);
    aff_return(thr, expansion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::apply_to;

    fn boot() -> Interp {
        let mut c = Interp::new();
        init(&mut c);
        c
    }

    fn global(c: &mut Interp, name: &str) -> Value {
        let sym = intern(c, name);
        let genv = c.genv;
        table::lookup(c, genv, sym)
    }

    #[test]
    fn variadic_addition_folds() {
        let mut c = boot();
        let plus = global(&mut c, "+");
        let args: Vec<Value> = (1..=10).map(Value::Fixnum).collect();
        let r = apply_to(&mut c, plus, &args).unwrap();
        assert_eq!(r, Value::Fixnum(55));
    }

    #[test]
    fn subtraction_and_negation() {
        let mut c = boot();
        let minus = global(&mut c, "-");
        let r = apply_to(&mut c, minus, &[Value::Fixnum(10), Value::Fixnum(3)]).unwrap();
        assert_eq!(r, Value::Fixnum(7));
        let r = apply_to(&mut c, minus, &[Value::Fixnum(5)]).unwrap();
        assert_eq!(r, Value::Fixnum(-5));
    }

    #[test]
    fn cons_car_cdr_round_trip() {
        let mut c = boot();
        let consf = global(&mut c, "cons");
        let carf = global(&mut c, "car");
        let cdrf = global(&mut c, "cdr");
        let pair = apply_to(&mut c, consf, &[Value::Fixnum(1), Value::Fixnum(2)]).unwrap();
        assert_eq!(apply_to(&mut c, carf, &[pair]).unwrap(), Value::Fixnum(1));
        assert_eq!(apply_to(&mut c, cdrf, &[pair]).unwrap(), Value::Fixnum(2));
    }

    #[test]
    fn coerce_builtin_handles_base() {
        let mut c = boot();
        let coercef = global(&mut c, "coerce");
        let s = mkstring(&mut c, "100");
        let int_sym = c.builtin(Builtin::SInt);
        let r = apply_to(&mut c, coercef, &[s, int_sym, Value::Fixnum(2)]).unwrap();
        assert_eq!(r, Value::Fixnum(4));
    }

    #[test]
    fn err_without_handler_reports_unhandled() {
        let mut c = boot();
        let errf = global(&mut c, "err");
        let msg = mkstring(&mut c, "boom");
        let r = apply_to(&mut c, errf, &[msg]);
        assert!(r.is_err());
    }

    #[test]
    fn string_port_write_round_trip() {
        let mut c = boot();
        let outstringf = global(&mut c, "outstring");
        let writef = global(&mut c, "write");
        let insidef = global(&mut c, "inside");
        let port = apply_to(&mut c, outstringf, &[]).unwrap();
        let s = mkstring(&mut c, "遠野");
        apply_to(&mut c, writef, &[s, port]).unwrap();
        let got = apply_to(&mut c, insidef, &[port]).unwrap();
        assert_eq!(to_rust_string(got), "\"遠野\"");
    }

    #[test]
    fn annotate_rep_type_round_trip() {
        let mut c = boot();
        let annotatef = global(&mut c, "annotate");
        let repf = global(&mut c, "rep");
        let typef = global(&mut c, "type");
        let tag = intern(&mut c, "widget");
        let v = apply_to(&mut c, annotatef, &[tag, Value::Fixnum(9)]).unwrap();
        assert_eq!(apply_to(&mut c, typef, &[v]).unwrap(), tag);
        assert_eq!(apply_to(&mut c, repf, &[v]).unwrap(), Value::Fixnum(9));
    }
}
