//! Engine tests over hand-assembled code objects
//!
//! These build instruction streams directly through the compilation
//! context, seal them into code objects, and drive a thread through the
//! trampoline — no reader or compiler involved.

use arcueid_core::code::{cctx2code, cctx_literal, cctx_vcptr, emit, emit1, emit2, mkcctx, patch_offset, Op};
use arcueid_core::numeric::{flonum_of, mkflonum};
use arcueid_core::thread::{mkthread, thr_pop, thread_mut, ThreadState};
use arcueid_core::value::{Tag, Value, has_tag};
use arcueid_core::Interp;
use arcueid_runtime::sched::run_thread;

fn fresh() -> Interp {
    arcueid_runtime::boot()
}

/// Assemble, wrap in a nil-environment closure, run to completion.
fn run_assembled(c: &mut Interp, build: impl FnOnce(&mut Interp, Value)) -> Value {
    let cctx = mkcctx(c);
    let mark = c.protect(cctx);
    build(c, cctx);
    let code = cctx2code(c, cctx);
    let clos = c.closure(code, Value::Nil);
    let thr = mkthread(c, 2048);
    c.protect(thr);
    thread_mut(thr).funr = clos;
    run_thread(c, thr, 1_000_000);
    c.unprotect_to(mark);
    thr
}

#[test]
fn push_leaves_arguments_stacked() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit(c, cctx, Op::Nil, Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit(c, cctx, Op::True, Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit1(c, cctx, Op::Ldi, Value::Fixnum(31337), Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    assert_eq!(thr_pop(thr), Value::Fixnum(31337));
    assert_eq!(thr_pop(thr), Value::True);
    assert_eq!(thr_pop(thr), Value::Nil);
}

#[test]
fn pop_restores_valr() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit1(c, cctx, Op::Ldi, Value::Fixnum(31337), Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit(c, cctx, Op::Nil, Value::Nil);
        emit(c, cctx, Op::Pop, Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    // push; pop leaves VALR unchanged
    assert_eq!(thread_mut(thr).valr, Value::Fixnum(31337));
}

#[test]
fn ldi_sets_valr() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit1(c, cctx, Op::Ldi, Value::Fixnum(31337), Value::Nil);
        emit(c, cctx, Op::Nop, Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    assert_eq!(thread_mut(thr).valr, Value::Fixnum(31337));
}

#[test]
fn ldl_fetches_the_literal() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        let pi = mkflonum(c, 3.1415926535);
        let idx = cctx_literal(c, cctx, pi);
        emit1(c, cctx, Op::Ldl, Value::Fixnum(idx as i64), Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    let v = thread_mut(thr).valr;
    assert!(has_tag(v, Tag::Flonum));
    assert!((flonum_of(v) - 3.1415926535).abs() < 1e-6);
}

#[test]
fn true_and_nil_load_constants() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit(c, cctx, Op::True, Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    assert_eq!(thread_mut(thr).valr, Value::True);

    let thr = run_assembled(&mut c, |c, cctx| {
        emit(c, cctx, Op::Nil, Value::Nil);
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    assert_eq!(thread_mut(thr).valr, Value::Nil);
}

#[test]
fn arithmetic_ops_consume_the_stack() {
    let mut c = fresh();
    let cases: [(Op, i64); 4] = [(Op::Add, 5), (Op::Sub, -1), (Op::Mul, 6), (Op::Div, 0)];
    for (op, _) in cases {
        let thr = run_assembled(&mut c, |c, cctx| {
            emit1(c, cctx, Op::Ldi, Value::Fixnum(2), Value::Nil);
            emit(c, cctx, Op::Push, Value::Nil);
            emit1(c, cctx, Op::Ldi, Value::Fixnum(3), Value::Nil);
            emit(c, cctx, op, Value::Nil);
            emit(c, cctx, Op::Hlt, Value::Nil);
        });
        let v = thread_mut(thr).valr;
        match op {
            Op::Add => assert_eq!(v, Value::Fixnum(5)),
            Op::Sub => assert_eq!(v, Value::Fixnum(-1)),
            Op::Mul => assert_eq!(v, Value::Fixnum(6)),
            // 2/3 is exact
            Op::Div => assert!(has_tag(v, Tag::Rational)),
            _ => unreachable!(),
        }
    }
}

#[test]
fn jumps_are_relative_to_the_opcode() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit1(c, cctx, Op::Ldi, Value::Fixnum(1), Value::Nil);
        let at = cctx_vcptr(cctx);
        emit1(c, cctx, Op::Jmp, Value::Fixnum(0), Value::Nil);
        emit1(c, cctx, Op::Ldi, Value::Fixnum(2), Value::Nil);
        let dest = cctx_vcptr(cctx);
        emit(c, cctx, Op::Hlt, Value::Nil);
        patch_offset(cctx, at, dest);
    });
    assert_eq!(thread_mut(thr).valr, Value::Fixnum(1));
}

#[test]
fn conditional_jumps_test_nil() {
    let mut c = fresh();
    for (cond, expect) in [(Op::True, 10), (Op::Nil, 20)] {
        let thr = run_assembled(&mut c, |c, cctx| {
            emit(c, cctx, cond, Value::Nil);
            let at = cctx_vcptr(cctx);
            emit1(c, cctx, Op::Jf, Value::Fixnum(0), Value::Nil);
            emit1(c, cctx, Op::Ldi, Value::Fixnum(10), Value::Nil);
            let over = cctx_vcptr(cctx);
            emit1(c, cctx, Op::Jmp, Value::Fixnum(0), Value::Nil);
            let else_at = cctx_vcptr(cctx);
            emit1(c, cctx, Op::Ldi, Value::Fixnum(20), Value::Nil);
            let end = cctx_vcptr(cctx);
            emit(c, cctx, Op::Hlt, Value::Nil);
            patch_offset(cctx, at, else_at);
            patch_offset(cctx, over, end);
        });
        assert_eq!(thread_mut(thr).valr, Value::Fixnum(expect));
    }
}

#[test]
fn closure_application_through_cont_and_ret() {
    let mut c = fresh();
    // callee: (fn (x y) (+ x y)) assembled by hand
    let callee = {
        let cctx = mkcctx(&mut c);
        let mark = c.protect(cctx);
        emit1(&mut c, cctx, Op::Env, Value::Fixnum(2), Value::Nil);
        emit1(&mut c, cctx, Op::Mvarg, Value::Fixnum(0), Value::Nil);
        emit1(&mut c, cctx, Op::Mvarg, Value::Fixnum(1), Value::Nil);
        emit2(&mut c, cctx, Op::Lde, Value::Fixnum(0), Value::Fixnum(0), Value::Nil);
        emit(&mut c, cctx, Op::Push, Value::Nil);
        emit2(&mut c, cctx, Op::Lde, Value::Fixnum(0), Value::Fixnum(1), Value::Nil);
        emit(&mut c, cctx, Op::Add, Value::Nil);
        emit(&mut c, cctx, Op::Ret, Value::Nil);
        let code = cctx2code(&mut c, cctx);
        c.unprotect_to(mark);
        c.closure(code, Value::Nil)
    };
    let hold = c.protect(callee);

    let thr = run_assembled(&mut c, |c, cctx| {
        let lit = cctx_literal(c, cctx, callee);
        let at = cctx_vcptr(cctx);
        emit1(c, cctx, Op::Cont, Value::Fixnum(0), Value::Nil);
        // arguments in reverse: argument 0 ends up on top
        emit1(c, cctx, Op::Ldi, Value::Fixnum(3), Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit1(c, cctx, Op::Ldi, Value::Fixnum(2), Value::Nil);
        emit(c, cctx, Op::Push, Value::Nil);
        emit1(c, cctx, Op::Ldl, Value::Fixnum(lit as i64), Value::Nil);
        emit1(c, cctx, Op::Apply, Value::Fixnum(2), Value::Nil);
        let resume = cctx_vcptr(cctx);
        emit(c, cctx, Op::Hlt, Value::Nil);
        patch_offset(cctx, at, resume);
    });
    assert_eq!(thread_mut(thr).valr, Value::Fixnum(5));
    c.unprotect_to(hold);
}

#[test]
fn quantum_exhaustion_suspends_and_resumes() {
    let mut c = fresh();
    let cctx = mkcctx(&mut c);
    let mark = c.protect(cctx);
    // spin: jmp back to self forever
    emit1(&mut c, cctx, Op::Jmp, Value::Fixnum(0), Value::Nil);
    patch_offset(cctx, 0, 0);
    let code = cctx2code(&mut c, cctx);
    let clos = c.closure(code, Value::Nil);
    let thr = mkthread(&mut c, 64);
    c.protect(thr);
    thread_mut(thr).funr = clos;

    run_thread(&mut c, thr, 100);
    assert_eq!(thread_mut(thr).state, ThreadState::Ready);
    run_thread(&mut c, thr, 100);
    assert_eq!(thread_mut(thr).state, ThreadState::Ready);
    c.unprotect_to(mark);
}

#[test]
fn halt_releases_the_thread() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit(c, cctx, Op::Hlt, Value::Nil);
    });
    assert_eq!(thread_mut(thr).state, ThreadState::Release);
}

#[test]
fn ret_with_empty_continuation_finishes() {
    let mut c = fresh();
    let thr = run_assembled(&mut c, |c, cctx| {
        emit1(c, cctx, Op::Ldi, Value::Fixnum(99), Value::Nil);
        emit(c, cctx, Op::Ret, Value::Nil);
    });
    assert_eq!(thread_mut(thr).state, ThreadState::Finished);
    assert_eq!(thread_mut(thr).valr, Value::Fixnum(99));
}

#[test]
fn rest_arguments_collect_into_a_list() {
    let mut c = fresh();
    // callee: (fn args args)
    let callee = {
        let cctx = mkcctx(&mut c);
        let mark = c.protect(cctx);
        emit1(&mut c, cctx, Op::Env, Value::Fixnum(1), Value::Nil);
        emit1(&mut c, cctx, Op::Mvrarg, Value::Fixnum(0), Value::Nil);
        emit2(&mut c, cctx, Op::Lde, Value::Fixnum(0), Value::Fixnum(0), Value::Nil);
        emit(&mut c, cctx, Op::Ret, Value::Nil);
        let code = cctx2code(&mut c, cctx);
        c.unprotect_to(mark);
        c.closure(code, Value::Nil)
    };
    let hold = c.protect(callee);

    let thr = run_assembled(&mut c, |c, cctx| {
        let lit = cctx_literal(c, cctx, callee);
        let at = cctx_vcptr(cctx);
        emit1(c, cctx, Op::Cont, Value::Fixnum(0), Value::Nil);
        for n in [3i64, 2, 1] {
            emit1(c, cctx, Op::Ldi, Value::Fixnum(n), Value::Nil);
            emit(c, cctx, Op::Push, Value::Nil);
        }
        emit1(c, cctx, Op::Ldl, Value::Fixnum(lit as i64), Value::Nil);
        emit1(c, cctx, Op::Apply, Value::Fixnum(3), Value::Nil);
        let resume = cctx_vcptr(cctx);
        emit(c, cctx, Op::Hlt, Value::Nil);
        patch_offset(cctx, at, resume);
    });
    let v = thread_mut(thr).valr;
    assert_eq!(arcueid_core::value::list_len(v), 3);
    assert_eq!(arcueid_core::value::car(v), Value::Fixnum(1));
    assert_eq!(arcueid_core::value::cadr(v), Value::Fixnum(2));
    c.unprotect_to(hold);
}
