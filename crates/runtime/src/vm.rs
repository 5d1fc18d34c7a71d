//! Virtual machine: instruction dispatch, application, continuations
//!
//! A register-light stack machine per thread: VALR (value), FUNR (current
//! closure or foreign function), ENVR (environment frame), CONR
//! (continuation chain), plus IP, SP, and the argument count. The dispatch
//! loop burns one quantum unit per instruction and hands control back to
//! the scheduler when the quantum runs out; the thread resumes from the
//! same IP on its next turn.
//!
//! Function application is continuation-passing: the compiler emits
//! `cont` to reserve the resume point before the arguments are pushed, so
//! `apply` only has to swing FUNR/ENVR/IP. `ret` restores the top
//! continuation; with the chain empty the thread is finished. When FUNR
//! becomes a foreign function the engine yields to the trampoline, which
//! drives the primitive's state machine.

use arcueid_core::code::{code_len, code_word, ccode_mut, Op};
use arcueid_core::string::{mkchar, str_chars};
use arcueid_core::table;
use arcueid_core::thread::{
    mkcont, mkenv, restore_cont, env_ref, env_set, thr_depth, thr_pop, thr_push, thread_mut,
    ThreadState,
};
use arcueid_core::types::{is, AffStep};
use arcueid_core::value::{car, cdr, has_tag, is_cons, type_name, type_of, Tag, Value};
use arcueid_core::{numeric, Interp};

use crate::error::{mkerr, raise, Raise};

/// Why the engine returned to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEvent {
    /// Quantum exhausted; the thread is Ready and resumes at the same IP.
    Quantum,
    /// FUNR is a foreign function; the trampoline must step it.
    Trampoline,
    /// The thread reached a terminal state.
    Done,
    /// The thread blocked on a file descriptor.
    IoWait,
}

pub(crate) enum Flow {
    Continue,
    Event(VmEvent),
}

/// Dispatch instructions on `thr` until its quantum is spent or an event
/// needs the trampoline or scheduler.
pub fn vmengine(c: &mut Interp, thr: Value) -> VmEvent {
    loop {
        {
            let t = thread_mut(thr);
            if t.cancel {
                t.state = ThreadState::Finished;
            }
            match t.state {
                ThreadState::Release | ThreadState::Finished => return VmEvent::Done,
                ThreadState::IoWait => return VmEvent::IoWait,
                _ => {}
            }
            if t.quanta <= 0 {
                t.state = ThreadState::Ready;
                return VmEvent::Quantum;
            }
        }

        let funr = thread_mut(thr).funr;
        if !has_tag(funr, Tag::Clos) {
            if has_tag(funr, Tag::CCode) {
                return VmEvent::Trampoline;
            }
            thread_mut(thr).state = ThreadState::Finished;
            return VmEvent::Done;
        }
        let code = car(funr);
        let ip = thread_mut(thr).ip;
        if ip >= code_len(code) {
            // fell off the end of the code vector
            match do_ret(c, thr) {
                Flow::Continue => continue,
                Flow::Event(e) => return e,
            }
        }
        let word = code_word(code, ip);
        let Some(op) = Op::from_i64(word) else {
            match err_flow(c, thr, &format!("invalid instruction {}", word), Value::Nil) {
                Flow::Continue => continue,
                Flow::Event(e) => return e,
            }
        };
        thread_mut(thr).quanta -= 1;

        let flow = step(c, thr, code, ip, op);
        match flow {
            Flow::Continue => {}
            Flow::Event(e) => return e,
        }
    }
}

/// Execute one decoded instruction.
fn step(c: &mut Interp, thr: Value, code: Value, ip: usize, op: Op) -> Flow {
    let next = ip + 1 + op.operands();
    match op {
        Op::Nop => jump(thr, next),
        Op::Ldi => {
            thread_mut(thr).valr = Value::Fixnum(code_word(code, ip + 1));
            jump(thr, next)
        }
        Op::Ldl => {
            let idx = code_word(code, ip + 1) as usize;
            thread_mut(thr).valr = arcueid_core::code::code_lit(code, idx);
            jump(thr, next)
        }
        Op::Ldg => {
            let sym = arcueid_core::code::code_lit(code, ip_operand(code, ip));
            let genv = c.genv;
            match table::lookup(c, genv, sym) {
                Value::Unbound => {
                    let name = arcueid_core::symbol::sym_str(c, sym);
                    err_flow(c, thr, &format!("unbound symbol {}", name), sym)
                }
                v => {
                    thread_mut(thr).valr = v;
                    jump(thr, next)
                }
            }
        }
        Op::Stg => {
            let sym = arcueid_core::code::code_lit(code, ip_operand(code, ip));
            let genv = c.genv;
            let v = thread_mut(thr).valr;
            table::insert(c, genv, sym, v);
            jump(thr, next)
        }
        Op::Lde => {
            let (lvl, off) = (code_word(code, ip + 1) as usize, code_word(code, ip + 2) as usize);
            let envr = thread_mut(thr).envr;
            thread_mut(thr).valr = env_ref(envr, lvl, off);
            jump(thr, next)
        }
        Op::Ste => {
            let (lvl, off) = (code_word(code, ip + 1) as usize, code_word(code, ip + 2) as usize);
            let t = thread_mut(thr);
            env_set(t.envr, lvl, off, t.valr);
            jump(thr, next)
        }
        Op::True => {
            thread_mut(thr).valr = Value::True;
            jump(thr, next)
        }
        Op::Nil => {
            thread_mut(thr).valr = Value::Nil;
            jump(thr, next)
        }
        Op::Push => {
            let v = thread_mut(thr).valr;
            if !thr_push(thr, v) {
                return err_flow(c, thr, "stack overflow", Value::Nil);
            }
            jump(thr, next)
        }
        Op::Pop => {
            if thr_depth(thr) == 0 {
                return err_flow(c, thr, "stack underflow", Value::Nil);
            }
            thread_mut(thr).valr = thr_pop(thr);
            jump(thr, next)
        }
        Op::Dup => {
            if thr_depth(thr) == 0 {
                return err_flow(c, thr, "stack underflow", Value::Nil);
            }
            let v = thr_pop(thr);
            let _ = thr_push(thr, v);
            if !thr_push(thr, v) {
                return err_flow(c, thr, "stack overflow", Value::Nil);
            }
            jump(thr, next)
        }
        Op::Jmp => rel_jump(thr, ip, code_word(code, ip + 1)),
        Op::Jt => {
            if thread_mut(thr).valr.is_true() {
                rel_jump(thr, ip, code_word(code, ip + 1))
            } else {
                jump(thr, next)
            }
        }
        Op::Jf => {
            if thread_mut(thr).valr.is_true() {
                jump(thr, next)
            } else {
                rel_jump(thr, ip, code_word(code, ip + 1))
            }
        }
        Op::Cont => {
            let target = (ip as i64 + code_word(code, ip + 1)) as usize;
            let k = mkcont(c, thr, target);
            thread_mut(thr).conr = k;
            jump(thr, next)
        }
        Op::Apply => {
            thread_mut(thr).argc = code_word(code, ip + 1) as usize;
            thread_mut(thr).ip = next;
            do_apply(c, thr)
        }
        Op::Ret => do_ret(c, thr),
        Op::Cls => {
            let t = thread_mut(thr);
            let (code_obj, env) = (t.valr, t.envr);
            thread_mut(thr).valr = c.closure(code_obj, env);
            jump(thr, next)
        }
        Op::Env => {
            let size = code_word(code, ip + 1) as usize;
            let parent = thread_mut(thr).envr;
            thread_mut(thr).envr = mkenv(c, parent, size);
            jump(thr, next)
        }
        Op::Mvarg => {
            let k = code_word(code, ip + 1) as usize;
            let t = thread_mut(thr);
            if t.argc == 0 {
                return err_flow(c, thr, "too few arguments", Value::Nil);
            }
            t.argc -= 1;
            let v = thr_pop(thr);
            let envr = thread_mut(thr).envr;
            env_set(envr, 0, k, v);
            jump(thr, next)
        }
        Op::Mvoarg => {
            let k = code_word(code, ip + 1) as usize;
            let t = thread_mut(thr);
            if t.argc > 0 {
                t.argc -= 1;
                let v = thr_pop(thr);
                let t = thread_mut(thr);
                env_set(t.envr, 0, k, v);
                t.valr = Value::True; // supplied: skip the default expression
            } else {
                t.valr = Value::Nil;
            }
            jump(thr, next)
        }
        Op::Mvrarg => {
            let k = code_word(code, ip + 1) as usize;
            let mut rest = Vec::new();
            while thread_mut(thr).argc > 0 {
                thread_mut(thr).argc -= 1;
                rest.push(thr_pop(thr));
            }
            let l = c.list(&rest);
            let envr = thread_mut(thr).envr;
            env_set(envr, 0, k, l);
            jump(thr, next)
        }
        Op::Add => arith(c, thr, next, numeric::add),
        Op::Sub => arith(c, thr, next, numeric::sub),
        Op::Mul => arith(c, thr, next, numeric::mul),
        Op::Div => arith(c, thr, next, numeric::div),
        Op::Cons => {
            if thr_depth(thr) == 0 {
                return err_flow(c, thr, "stack underflow", Value::Nil);
            }
            let a = thr_pop(thr);
            let d = thread_mut(thr).valr;
            thread_mut(thr).valr = c.cons(a, d);
            jump(thr, next)
        }
        Op::Car => {
            let v = thread_mut(thr).valr;
            if v.is_nil() {
                thread_mut(thr).valr = Value::Nil;
            } else if is_cons(v) {
                thread_mut(thr).valr = car(v);
            } else {
                return type_err(c, thr, "car", v);
            }
            jump(thr, next)
        }
        Op::Cdr => {
            let v = thread_mut(thr).valr;
            if v.is_nil() {
                thread_mut(thr).valr = Value::Nil;
            } else if is_cons(v) {
                thread_mut(thr).valr = cdr(v);
            } else {
                return type_err(c, thr, "cdr", v);
            }
            jump(thr, next)
        }
        Op::Is => {
            if thr_depth(thr) == 0 {
                return err_flow(c, thr, "stack underflow", Value::Nil);
            }
            let a = thr_pop(thr);
            let b = thread_mut(thr).valr;
            let eq = is(c, a, b);
            thread_mut(thr).valr = if eq { Value::True } else { Value::Nil };
            jump(thr, next)
        }
        Op::Hlt => {
            thread_mut(thr).state = ThreadState::Release;
            Flow::Event(VmEvent::Done)
        }
    }
}

fn ip_operand(code: Value, ip: usize) -> usize {
    code_word(code, ip + 1) as usize
}

fn jump(thr: Value, to: usize) -> Flow {
    thread_mut(thr).ip = to;
    Flow::Continue
}

fn rel_jump(thr: Value, ip: usize, off: i64) -> Flow {
    jump(thr, (ip as i64 + off) as usize)
}

fn arith(
    c: &mut Interp,
    thr: Value,
    next: usize,
    op: fn(&mut Interp, Value, Value) -> Result<Value, arcueid_core::CoreError>,
) -> Flow {
    if thr_depth(thr) == 0 {
        return err_flow(c, thr, "stack underflow", Value::Nil);
    }
    let a = thr_pop(thr);
    let b = thread_mut(thr).valr;
    match op(c, a, b) {
        Ok(v) => {
            thread_mut(thr).valr = v;
            jump(thr, next)
        }
        Err(e) => err_flow(c, thr, &e.to_string(), Value::Nil),
    }
}

fn type_err(c: &mut Interp, thr: Value, op: &str, v: Value) -> Flow {
    let msg = format!("{}: invalid operand of type {}", op, type_name(type_of(v)));
    err_flow(c, thr, &msg, v)
}

/// Raise an error on the thread and continue into the handler (or stop at
/// the top level).
pub(crate) fn err_flow(c: &mut Interp, thr: Value, msg: &str, payload: Value) -> Flow {
    let exc = mkerr(c, thr, msg, payload);
    match raise(c, thr, exc) {
        Raise::Handled => do_apply(c, thr),
        Raise::TopLevel => Flow::Event(VmEvent::Done),
    }
}

/// Apply the value register to the `argc` stacked arguments. The
/// continuation for the call was installed before the arguments were
/// pushed.
pub(crate) fn do_apply(c: &mut Interp, thr: Value) -> Flow {
    let fun = thread_mut(thr).valr;
    match type_of(fun) {
        arcueid_core::Type::Heap(Tag::Clos) => {
            let t = thread_mut(thr);
            t.funr = fun;
            t.envr = cdr(fun);
            t.ip = 0;
            Flow::Continue
        }
        arcueid_core::Type::Heap(Tag::CCode) => {
            let declared = ccode_mut(fun).argc;
            let argc = thread_mut(thr).argc;
            let ok = if declared >= 0 {
                argc == declared as usize
            } else {
                argc >= (-(declared + 1)) as usize
            };
            if !ok {
                return err_flow(c, thr, "wrong number of arguments", fun);
            }
            let t = thread_mut(thr);
            t.funr = fun;
            t.ip = 0;
            Flow::Event(VmEvent::Trampoline)
        }
        arcueid_core::Type::Heap(Tag::Cont) => {
            // first-class continuation: the argument becomes the value at
            // the resumed point
            let v = if thread_mut(thr).argc > 0 {
                thr_pop(thr)
            } else {
                Value::Nil
            };
            restore_cont(thr, fun);
            thread_mut(thr).valr = v;
            after_restore(thr)
        }
        arcueid_core::Type::Heap(Tag::Table) | arcueid_core::Type::Heap(Tag::WTable) => {
            let argc = thread_mut(thr).argc;
            if argc == 0 {
                return err_flow(c, thr, "wrong number of arguments", fun);
            }
            let key = thr_pop(thr);
            let default = if argc >= 2 { thr_pop(thr) } else { Value::Nil };
            for _ in 2..argc {
                let _ = thr_pop(thr);
            }
            let found = table::lookup(c, fun, key);
            thread_mut(thr).valr = if found == Value::Unbound { default } else { found };
            do_ret(c, thr)
        }
        arcueid_core::Type::Heap(Tag::Str) => {
            let argc = thread_mut(thr).argc;
            if argc == 0 {
                return err_flow(c, thr, "wrong number of arguments", fun);
            }
            let idx = thr_pop(thr);
            for _ in 1..argc {
                let _ = thr_pop(thr);
            }
            let Value::Fixnum(i) = idx else {
                return type_err(c, thr, "string index", idx);
            };
            let chars = str_chars(fun);
            if i < 0 || i as usize >= chars.len() {
                return err_flow(c, thr, "string index out of range", idx);
            }
            let ch = chars[i as usize];
            thread_mut(thr).valr = mkchar(c, ch);
            do_ret(c, thr)
        }
        arcueid_core::Type::Heap(tag) => {
            if let Some(apply) = arcueid_core::types::typefn(c, tag).and_then(|tf| tf.apply) {
                let result = apply(c, thr, fun);
                return step_to_flow(c, thr, result);
            }
            type_err(c, thr, "apply", fun)
        }
        _ => type_err(c, thr, "apply", fun),
    }
}

/// Restore the top continuation; with the chain empty the thread is
/// finished. VALR carries the returned value across.
pub(crate) fn do_ret(c: &mut Interp, thr: Value) -> Flow {
    let _ = c;
    let k = thread_mut(thr).conr;
    if !has_tag(k, Tag::Cont) {
        thread_mut(thr).state = ThreadState::Finished;
        return Flow::Event(VmEvent::Done);
    }
    restore_cont(thr, k);
    after_restore(thr)
}

/// After a continuation restore the resumed function may be a foreign
/// primitive; the trampoline must take over in that case.
fn after_restore(thr: Value) -> Flow {
    if has_tag(thread_mut(thr).funr, Tag::CCode) {
        Flow::Event(VmEvent::Trampoline)
    } else {
        Flow::Continue
    }
}

/// Map a foreign-function status onto engine flow.
pub(crate) fn step_to_flow(c: &mut Interp, thr: Value, step: AffStep) -> Flow {
    match step {
        AffStep::RestoreCont => do_ret(c, thr),
        AffStep::FnApp => do_apply(c, thr),
        AffStep::Return => {
            let t = thread_mut(thr);
            if t.state == ThreadState::Running {
                t.state = ThreadState::Ready;
            }
            Flow::Event(VmEvent::Quantum)
        }
        AffStep::IoWait => Flow::Event(VmEvent::IoWait),
    }
}
