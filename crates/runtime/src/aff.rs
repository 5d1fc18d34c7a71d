//! Foreign-function coroutines
//!
//! A primitive is a state machine `fn(&mut Interp, thread) -> AffStep`.
//! On entry it dispatches on its state label (the thread's IP — zero for a
//! fresh invocation); a suspension verb records the resume label and hands
//! a status back to the trampoline. Between suspension points a primitive
//! runs atomically with respect to other threads.
//!
//! Locals survive suspension only in the thread's environment slots
//! ([`aff_env`] / `env_set`), never in Rust locals. A typical suspending
//! primitive:
//!
//! ```ignore
//! fn prim_example(c: &mut Interp, thr: Value) -> AffStep {
//!     match aff_label(thr) {
//!         0 => {
//!             let args = aff_args(thr);
//!             let env = aff_env(c, thr, 1);
//!             env_set(env, 0, 0, args[0]);
//!             aff_call(c, thr, 1, args[0], &[]) // call, resume at label 1
//!         }
//!         _ => {
//!             let result = thread_mut(thr).valr; // callee's value
//!             aff_return(thr, result)
//!         }
//!     }
//! }
//! ```

use arcueid_core::table;
use arcueid_core::thread::{mkcont, mkenv, thr_push, thread_mut, ThreadState};
use arcueid_core::types::AffStep;
use arcueid_core::value::Value;
use arcueid_core::Interp;

/// The primitive's current state label. Zero on a fresh invocation.
pub fn aff_label(thr: Value) -> usize {
    thread_mut(thr).ip
}

/// Pop this invocation's arguments off the thread stack, first argument
/// first. Valid only at label zero, before any suspension.
pub fn aff_args(thr: Value) -> Vec<Value> {
    let t = thread_mut(thr);
    let n = t.argc;
    t.argc = 0;
    let mut args = Vec::with_capacity(n);
    for _ in 0..n {
        args.push(arcueid_core::thread::thr_pop(thr));
    }
    args
}

/// Allocate `nslots` suspension-safe locals as a fresh environment frame
/// and install it as the thread's environment.
pub fn aff_env(c: &mut Interp, thr: Value, nslots: usize) -> Value {
    let parent = thread_mut(thr).envr;
    let env = mkenv(c, parent, nslots);
    thread_mut(thr).envr = env;
    env
}

/// Final return: put `v` in the value register and restore the caller's
/// continuation.
pub fn aff_return(thr: Value, v: Value) -> AffStep {
    thread_mut(thr).valr = v;
    AffStep::RestoreCont
}

/// Invoke `f` on `args`; the primitive resumes at `label` with the result
/// in the value register.
pub fn aff_call(c: &mut Interp, thr: Value, label: usize, f: Value, args: &[Value]) -> AffStep {
    let k = mkcont(c, thr, label);
    thread_mut(thr).conr = k;
    for &a in args.iter().rev() {
        if !thr_push(thr, a) {
            // overflow surfaces as an error when the trampoline applies
            break;
        }
    }
    let t = thread_mut(thr);
    t.argc = args.len();
    t.valr = f;
    AffStep::FnApp
}

/// Relinquish the quantum; the primitive resumes at `label` on the
/// thread's next turn.
pub fn aff_yield(thr: Value, label: usize) -> AffStep {
    let t = thread_mut(thr);
    t.ip = label;
    t.state = ThreadState::Ready;
    AffStep::Return
}

/// Block the thread until `fd` is ready; the primitive resumes at
/// `label`.
pub fn aff_iowait(c: &mut Interp, thr: Value, label: usize, fd: i32) -> AffStep {
    {
        let t = thread_mut(thr);
        t.ip = label;
        t.waitfd = fd;
        t.state = ThreadState::IoWait;
    }
    let tbl = c.iowaittbl;
    table::insert(c, tbl, Value::Fixnum(fd as i64), thr);
    AffStep::IoWait
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcueid_core::thread::mkthread;

    #[test]
    fn args_come_off_in_call_order() {
        let mut c = Interp::new();
        let thr = mkthread(&mut c, 16);
        // apply pushes arguments in reverse, so argument 0 is on top
        assert!(thr_push(thr, Value::Fixnum(3)));
        assert!(thr_push(thr, Value::Fixnum(2)));
        assert!(thr_push(thr, Value::Fixnum(1)));
        thread_mut(thr).argc = 3;
        let args = aff_args(thr);
        assert_eq!(
            args,
            vec![Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]
        );
    }

    #[test]
    fn yield_records_the_resume_label() {
        let mut c = Interp::new();
        let thr = mkthread(&mut c, 16);
        let step = aff_yield(thr, 7);
        assert_eq!(step, AffStep::Return);
        assert_eq!(aff_label(thr), 7);
        assert_eq!(thread_mut(thr).state, ThreadState::Ready);
    }

    #[test]
    fn iowait_registers_the_descriptor() {
        let mut c = Interp::new();
        let thr = mkthread(&mut c, 16);
        let step = aff_iowait(&mut c, thr, 3, 5);
        assert_eq!(step, AffStep::IoWait);
        assert_eq!(thread_mut(thr).waitfd, 5);
        assert_eq!(thread_mut(thr).state, ThreadState::IoWait);
        let tbl = c.iowaittbl;
        let reg = table::lookup(&mut c, tbl, Value::Fixnum(5));
        assert_eq!(reg, thr);
    }
}
