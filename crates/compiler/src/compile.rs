//! Compiler: s-expressions to code objects
//!
//! Per top-level expression: expand global macros to fixed point, then
//! dispatch on shape — literal, identifier, or list. Lists check the
//! special-form table (`if fn quote quasiquote assign`), then the
//! inline-function table (two-operand arithmetic and the pair primitives
//! compile to dedicated opcodes while their global bindings are
//! pristine), and otherwise compile as an application: reserve a
//! continuation, push the arguments in reverse so argument zero lands on
//! top, load the callee, `apply`.
//!
//! The compile-time environment is a list of tables mapping names to
//! frame slots; resolution walks it frame by frame and falls back to a
//! global load.

use arcueid_core::code::{
    cctx2code, cctx_lit, cctx_literal, cctx_mksrc, cctx_nlits, cctx_vcptr, emit, emit1, emit2,
    mkcctx, patch_offset, patch_operand, Op,
};
use arcueid_core::table;
use arcueid_core::types::iso;
use arcueid_core::value::{
    car, cadr, cdr, cddr, has_tag, is_cons, type_of, Tag, Type, Value,
};
use arcueid_core::{Builtin, Interp};
use arcueid_runtime::sched::apply_to;

#[derive(Debug)]
pub enum CompileError {
    InvalidExpression(String),
    InvalidArgList(String),
    MacroExpansion(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::InvalidExpression(s) => write!(f, "invalid expression: {}", s),
            CompileError::InvalidArgList(s) => write!(f, "invalid argument list: {}", s),
            CompileError::MacroExpansion(s) => write!(f, "macro expansion failed: {}", s),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile one top-level expression into a code object. With a line
/// number the code object carries an offset -> line table.
pub fn compile_expr(c: &mut Interp, expr: Value, line: Option<usize>) -> Result<Value, CompileError> {
    let mark = c.protect(expr);
    let cctx = mkcctx(c);
    c.protect(cctx);
    let lnval = match line {
        Some(n) => {
            cctx_mksrc(c, cctx);
            Value::Fixnum(n as i64)
        }
        None => Value::Nil,
    };
    let result = compile(c, expr, cctx, Value::Nil, true, lnval);
    let code = result.map(|()| cctx2code(c, cctx));
    c.unprotect_to(mark);
    code
}

/// Expand macro applications at the head until the head is no longer a
/// globally bound macro.
pub fn macex(c: &mut Interp, expr: Value) -> Result<Value, CompileError> {
    let mut e = expr;
    loop {
        if !is_cons(e) {
            return Ok(e);
        }
        let op = car(e);
        if !matches!(op, Value::Sym(_)) {
            return Ok(e);
        }
        let genv = c.genv;
        let binding = table::lookup(c, genv, op);
        if !has_tag(binding, Tag::Tagged) || car(binding) != c.builtin(Builtin::Mac) {
            return Ok(e);
        }
        let expander = cdr(binding);
        let mut args = Vec::new();
        let mut p = cdr(e);
        while is_cons(p) {
            args.push(car(p));
            p = cdr(p);
        }
        let mark = c.protect(e);
        let expanded = apply_to(c, expander, &args)
            .map_err(|err| CompileError::MacroExpansion(err.to_string()));
        c.unprotect_to(mark);
        e = expanded?;
    }
}

fn compile(
    c: &mut Interp,
    nexpr: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let expr = macex(c, nexpr)?;
    if is_literal(expr) {
        return compile_literal(c, expr, cctx, cont, line);
    }
    if matches!(expr, Value::Sym(_)) {
        return compile_ident(c, expr, cctx, env, cont, line);
    }
    if is_cons(expr) {
        return compile_list(c, expr, cctx, env, cont, line);
    }
    let text = arcueid_core::pprint::write_value(c, expr, true);
    Err(CompileError::InvalidExpression(text))
}

fn is_literal(expr: Value) -> bool {
    matches!(
        type_of(expr),
        Type::Nil
            | Type::True
            | Type::Fixnum
            | Type::Heap(Tag::Char)
            | Type::Heap(Tag::Str)
            | Type::Heap(Tag::Bignum)
            | Type::Heap(Tag::Flonum)
            | Type::Heap(Tag::Rational)
            | Type::Heap(Tag::Complex)
            | Type::Heap(Tag::Code)
    )
}

fn compile_continuation(c: &mut Interp, cctx: Value, cont: bool, line: Value) {
    if cont {
        emit(c, cctx, Op::Ret, line);
    }
}

/// Index of `lit` in the literal pool, adding it on first reference.
/// Deep equality keeps one copy of structurally equal constants.
fn find_literal(c: &mut Interp, cctx: Value, lit: Value) -> usize {
    for i in 0..cctx_nlits(cctx) {
        let existing = cctx_lit(cctx, i);
        let mut visit = Vec::new();
        if iso(c, existing, lit, &mut visit) {
            return i;
        }
    }
    cctx_literal(c, cctx, lit)
}

fn compile_literal(
    c: &mut Interp,
    lit: Value,
    cctx: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    if lit.is_nil() || lit == c.builtin(Builtin::Nil) {
        emit(c, cctx, Op::Nil, line);
    } else if lit == Value::True || lit == c.builtin(Builtin::T) {
        emit(c, cctx, Op::True, line);
    } else if let Value::Fixnum(n) = lit {
        emit1(c, cctx, Op::Ldi, Value::Fixnum(n), line);
    } else {
        let idx = find_literal(c, cctx, lit);
        emit1(c, cctx, Op::Ldl, Value::Fixnum(idx as i64), line);
    }
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

/// Walk the compile-time frame list for `sym`.
fn find_var(c: &mut Interp, sym: Value, env: Value) -> Option<(usize, usize)> {
    let mut frameno = 0;
    let mut p = env;
    while is_cons(p) {
        let frame = car(p);
        if let Value::Fixnum(idx) = table::lookup(c, frame, sym) {
            return Some((frameno, idx as usize));
        }
        frameno += 1;
        p = cdr(p);
    }
    None
}

fn compile_ident(
    c: &mut Interp,
    sym: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    if sym == c.builtin(Builtin::T) || sym == c.builtin(Builtin::Nil) {
        return compile_literal(c, sym, cctx, cont, line);
    }
    match find_var(c, sym, env) {
        Some((level, offset)) => {
            emit2(
                c,
                cctx,
                Op::Lde,
                Value::Fixnum(level as i64),
                Value::Fixnum(offset as i64),
                line,
            );
        }
        None => {
            let idx = find_literal(c, cctx, sym);
            emit1(c, cctx, Op::Ldg, Value::Fixnum(idx as i64), line);
        }
    }
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

fn compile_list(
    c: &mut Interp,
    expr: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let head = car(expr);
    if matches!(head, Value::Sym(_)) {
        let splforms = c.splforms;
        if let Value::Fixnum(form) = table::lookup(c, splforms, head) {
            let args = cdr(expr);
            return match form {
                0 => compile_if(c, args, cctx, env, cont, line),
                1 => compile_fn(c, args, cctx, env, cont, line),
                2 => compile_quote(c, args, cctx, cont, line),
                3 => compile_quasiquote(c, args, cctx, env, cont, line),
                _ => compile_assign(c, args, cctx, env, cont, line),
            };
        }
        if let Some(op) = inline_op(c, head, env, expr) {
            return compile_inline(c, op, cdr(expr), cctx, env, cont, line);
        }
    }
    compile_apply(c, expr, cctx, env, cont, line)
}

/// `(if)` is nil; `(if x)` is x; `(if c t . rest)` compiles the test, a
/// patched conditional jump over the then-branch, and recurses on the
/// rest as elif/else clauses.
fn compile_if(
    c: &mut Interp,
    args: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    if args.is_nil() {
        emit(c, cctx, Op::Nil, line);
        compile_continuation(c, cctx, cont, line);
        return Ok(());
    }
    if cdr(args).is_nil() {
        compile(c, car(args), cctx, env, false, line)?;
        compile_continuation(c, cctx, cont, line);
        return Ok(());
    }
    compile(c, car(args), cctx, env, false, line)?;
    let jf_at = cctx_vcptr(cctx);
    emit1(c, cctx, Op::Jf, Value::Fixnum(0), line);
    compile(c, cadr(args), cctx, env, false, line)?;
    let jmp_at = cctx_vcptr(cctx);
    emit1(c, cctx, Op::Jmp, Value::Fixnum(0), line);
    patch_offset(cctx, jf_at, cctx_vcptr(cctx));
    compile_if(c, cddr(args), cctx, env, cont, line)?;
    patch_offset(cctx, jmp_at, cctx_vcptr(cctx));
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

/// Compile a `fn` in a fresh context and frame; the enclosing context
/// loads the sealed code object and closes over the current environment.
fn compile_fn(
    c: &mut Interp,
    expr: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let params = if expr.is_nil() { Value::Nil } else { car(expr) };
    let body = if expr.is_nil() { Value::Nil } else { cdr(expr) };
    let nctx = mkcctx(c);
    let mark = c.protect(nctx);
    let nenv = compile_args(c, params, nctx, env, line)?;
    if body.is_nil() {
        emit(c, nctx, Op::Nil, line);
    }
    // implicit do: only the last expression's value survives
    let mut p = body;
    while is_cons(p) {
        compile(c, car(p), nctx, nenv, false, line)?;
        p = cdr(p);
    }
    compile_continuation(c, nctx, true, line);
    let newcode = cctx2code(c, nctx);
    c.unprotect_to(mark);
    let idx = find_literal(c, cctx, newcode);
    emit1(c, cctx, Op::Ldl, Value::Fixnum(idx as i64), line);
    emit(c, cctx, Op::Cls, line);
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

/// Emit the environment setup for a parameter list and return the
/// compile-time environment extended with the new frame. Handles plain
/// names, `(o name default)` optionals, and a rest name in the tail.
fn compile_args(
    c: &mut Interp,
    params: Value,
    nctx: Value,
    env: Value,
    line: Value,
) -> Result<Value, CompileError> {
    if params.is_nil() {
        return Ok(env);
    }
    if matches!(params, Value::Sym(_)) {
        // single name: the whole argument list
        emit1(c, nctx, Op::Env, Value::Fixnum(1), line);
        emit1(c, nctx, Op::Mvrarg, Value::Fixnum(0), line);
        let frame = table::mktable(c, 3);
        table::insert(c, frame, params, Value::Fixnum(0));
        return Ok(c.cons(frame, env));
    }
    if !is_cons(params) {
        let text = arcueid_core::pprint::write_value(c, params, true);
        return Err(CompileError::InvalidArgList(text));
    }

    let env_at = cctx_vcptr(nctx);
    emit1(c, nctx, Op::Env, Value::Fixnum(0), line);
    let frame = table::mktable(c, 3);
    let nenv = c.cons(frame, env);
    let mut nargs: i64 = 0;
    let mut p = params;
    loop {
        let param = car(p);
        if matches!(param, Value::Sym(_)) {
            emit1(c, nctx, Op::Mvarg, Value::Fixnum(nargs), line);
            table::insert(c, frame, param, Value::Fixnum(nargs));
            nargs += 1;
        } else if is_cons(param) && car(param) == c.builtin(Builtin::O) {
            // (o name default): move the argument when supplied, run the
            // default expression otherwise
            let name = cadr(param);
            if !matches!(name, Value::Sym(_)) {
                let text = arcueid_core::pprint::write_value(c, param, true);
                return Err(CompileError::InvalidArgList(text));
            }
            emit1(c, nctx, Op::Mvoarg, Value::Fixnum(nargs), line);
            let jt_at = cctx_vcptr(nctx);
            emit1(c, nctx, Op::Jt, Value::Fixnum(0), line);
            let default = if is_cons(cddr(param)) { car(cddr(param)) } else { Value::Nil };
            compile(c, default, nctx, nenv, false, line)?;
            emit2(c, nctx, Op::Ste, Value::Fixnum(0), Value::Fixnum(nargs), line);
            patch_offset(nctx, jt_at, cctx_vcptr(nctx));
            table::insert(c, frame, name, Value::Fixnum(nargs));
            nargs += 1;
        } else {
            let text = arcueid_core::pprint::write_value(c, param, true);
            return Err(CompileError::InvalidArgList(text));
        }

        let tail = cdr(p);
        if matches!(tail, Value::Sym(_)) {
            // dotted tail: rest parameter
            emit1(c, nctx, Op::Mvrarg, Value::Fixnum(nargs), line);
            table::insert(c, frame, tail, Value::Fixnum(nargs));
            nargs += 1;
            break;
        }
        if tail.is_nil() {
            break;
        }
        p = tail;
    }
    patch_operand(nctx, env_at, Value::Fixnum(nargs));
    Ok(nenv)
}

fn compile_quote(
    c: &mut Interp,
    args: Value,
    cctx: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let datum = if is_cons(args) { car(args) } else { Value::Nil };
    compile_literal(c, datum, cctx, cont, line)
}

/// Quasiquotation compiles by rewriting the template into list-building
/// calls (`cons` for elements, `+` for unquote-splicing segments) and
/// compiling the rewrite. Nesting tracks depth: only depth-1 unquotes
/// escape.
fn compile_quasiquote(
    c: &mut Interp,
    args: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let template = if is_cons(args) { car(args) } else { Value::Nil };
    let expansion = qq_expand(c, template, 1);
    compile(c, expansion, cctx, env, cont, line)
}

fn quoted(c: &mut Interp, v: Value) -> Value {
    let q = c.builtin(Builtin::Quote);
    c.list(&[q, v])
}

fn qq_expand(c: &mut Interp, template: Value, depth: u32) -> Value {
    if !is_cons(template) {
        return quoted(c, template);
    }
    let head = car(template);
    if head == c.builtin(Builtin::Unquote) {
        if depth == 1 {
            return cadr(template);
        }
        let inner = qq_expand(c, cadr(template), depth - 1);
        let quoted_head = quoted(c, head);
        return build_pair(c, quoted_head, inner);
    }
    if head == c.builtin(Builtin::QQuote) {
        let inner = qq_expand(c, cadr(template), depth + 1);
        let quoted_head = quoted(c, head);
        return build_pair(c, quoted_head, inner);
    }
    // element-wise: splices become list concatenation
    if is_cons(head) && car(head) == c.builtin(Builtin::UnquoteSp) && depth == 1 {
        let seg = cadr(head);
        let rest = qq_expand(c, cdr(template), depth);
        let plus = arcueid_core::symbol::intern(c, "+");
        return c.list(&[plus, seg, rest]);
    }
    let first = qq_expand(c, head, depth);
    let rest = qq_expand(c, cdr(template), depth);
    let cons_sym = c.builtin(Builtin::SCons);
    c.list(&[cons_sym, first, rest])
}

/// `(cons (quote head) (cons inner nil))` — a two-element list whose
/// head is quoted, used to rebuild nested quote forms.
fn build_pair(c: &mut Interp, qhead: Value, inner: Value) -> Value {
    let cons_sym = c.builtin(Builtin::SCons);
    let tail = c.list(&[cons_sym, inner, Value::Nil]);
    c.list(&[cons_sym, qhead, tail])
}

/// `(assign name expr ...)`: lexical targets store through `ste`, global
/// targets through `stg` (creating the binding if absent).
fn compile_assign(
    c: &mut Interp,
    args: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let mut p = args;
    if p.is_nil() {
        emit(c, cctx, Op::Nil, line);
    }
    while is_cons(p) {
        let name = car(p);
        if !matches!(name, Value::Sym(_)) {
            let text = arcueid_core::pprint::write_value(c, name, true);
            return Err(CompileError::InvalidExpression(text));
        }
        let val = if is_cons(cdr(p)) { cadr(p) } else { Value::Nil };
        compile(c, val, cctx, env, false, line)?;
        match find_var(c, name, env) {
            Some((level, offset)) => {
                emit2(
                    c,
                    cctx,
                    Op::Ste,
                    Value::Fixnum(level as i64),
                    Value::Fixnum(offset as i64),
                    line,
                );
            }
            None => {
                let idx = find_literal(c, cctx, name);
                emit1(c, cctx, Op::Stg, Value::Fixnum(idx as i64), line);
            }
        }
        p = cddr(p);
    }
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

/// The inline opcode for `head`, provided the symbol is not lexically
/// shadowed, its global binding is still the pristine primitive, and the
/// call has the operand count the opcode expects.
fn inline_op(c: &mut Interp, head: Value, env: Value, expr: Value) -> Option<Op> {
    if find_var(c, head, env).is_some() {
        return None;
    }
    let inlfuncs = c.inlfuncs;
    let entry = table::lookup(c, inlfuncs, head);
    if !is_cons(entry) {
        return None;
    }
    let op = Op::from_i64(car(entry).fixnum())?;
    let genv = c.genv;
    let binding = table::lookup(c, genv, head);
    if binding != cdr(entry) {
        return None;
    }
    let nargs = arcueid_core::value::list_len(cdr(expr));
    let want = match op {
        Op::Car | Op::Cdr => 1,
        _ => 2,
    };
    (nargs == want).then_some(op)
}

fn compile_inline(
    c: &mut Interp,
    op: Op,
    args: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    match op {
        Op::Car | Op::Cdr => {
            compile(c, car(args), cctx, env, false, line)?;
            emit(c, cctx, op, line);
        }
        _ => {
            compile(c, car(args), cctx, env, false, line)?;
            emit(c, cctx, Op::Push, line);
            compile(c, cadr(args), cctx, env, false, line)?;
            emit(c, cctx, op, line);
        }
    }
    compile_continuation(c, cctx, cont, line);
    Ok(())
}

/// Plain application: continuation, arguments in reverse, callee, apply.
fn compile_apply(
    c: &mut Interp,
    expr: Value,
    cctx: Value,
    env: Value,
    cont: bool,
    line: Value,
) -> Result<(), CompileError> {
    let fname = car(expr);
    let mut args = Vec::new();
    let mut p = cdr(expr);
    while is_cons(p) {
        args.push(car(p));
        p = cdr(p);
    }
    let cont_at = cctx_vcptr(cctx);
    emit1(c, cctx, Op::Cont, Value::Fixnum(0), line);
    for &arg in args.iter().rev() {
        compile(c, arg, cctx, env, false, line)?;
        emit(c, cctx, Op::Push, line);
    }
    compile(c, fname, cctx, env, false, line)?;
    emit1(c, cctx, Op::Apply, Value::Fixnum(args.len() as i64), line);
    patch_offset(cctx, cont_at, cctx_vcptr(cctx));
    compile_continuation(c, cctx, cont, line);
    Ok(())
}
