//! Cooperative thread scheduler
//!
//! One OS thread, N interpreter threads in a FIFO ring. A scheduler pass
//! gives each Ready thread one quantum through the trampoline, then runs
//! one collector slice. Threads blocked on file descriptors park in the
//! I/O-wait table; one `poll(2)` per pass moves ready ones back to the
//! run state. Terminal threads drop out of the ring and are reclaimed by
//! the collector.
//!
//! The trampoline is the meeting point of the bytecode engine and the
//! foreign-function protocol: it steps whichever of the two FUNR
//! currently selects, until the quantum is gone or the thread suspends.

use arcueid_core::code::ccode_mut;
use arcueid_core::gc::gc_slice;
use arcueid_core::table;
use arcueid_core::thread::{mkthread, thr_push, thread_mut, ThreadState};
use arcueid_core::value::{car, cdr, has_tag, is_cons, vec_set, Tag, Value};
use arcueid_core::Interp;

use crate::error::RuntimeError;
use crate::vm::{do_apply, step_to_flow, vmengine, Flow, VmEvent};

/// Create a thread that will run `f` (a closure or foreign function) with
/// no arguments, and append it to the scheduler ring.
pub fn spawn(c: &mut Interp, f: Value) -> Value {
    let stksize = c.stksize;
    let thr = mkthread(c, stksize);
    setup_stdh(c, thr);
    {
        let t = thread_mut(thr);
        t.valr = f;
        t.argc = 0;
        t.conr = Value::Nil;
    }
    let _ = do_apply(c, thr);
    enqueue(c, thr);
    tracing::debug!(tid = thread_mut(thr).tid, "thread spawned");
    thr
}

/// Standard handles come from the global bindings the port layer set up.
fn setup_stdh(c: &mut Interp, thr: Value) {
    let stdh = c.mkvector(3);
    for (i, &name) in ["stdin", "stdout", "stderr"].iter().enumerate() {
        let sym = arcueid_core::symbol::intern(c, name);
        let genv = c.genv;
        let port = match table::lookup(c, genv, sym) {
            Value::Unbound => Value::Nil,
            v => v,
        };
        vec_set(stdh, i, port);
    }
    thread_mut(thr).stdh = stdh;
}

fn enqueue(c: &mut Interp, thr: Value) {
    let node = c.cons(thr, Value::Nil);
    if c.vmthreads.is_nil() {
        c.vmthreads = node;
        return;
    }
    let mut p = c.vmthreads;
    while is_cons(cdr(p)) {
        p = cdr(p);
    }
    arcueid_core::value::scdr(p, node);
}

fn ring(c: &Interp) -> Vec<Value> {
    let mut out = Vec::new();
    let mut p = c.vmthreads;
    while is_cons(p) {
        out.push(car(p));
        p = cdr(p);
    }
    out
}

/// Drop terminal threads from the ring.
fn prune(c: &mut Interp) {
    let survivors: Vec<Value> = ring(c)
        .into_iter()
        .filter(|&thr| !thread_mut(thr).state.is_terminal())
        .collect();
    c.vmthreads = c.list(&survivors);
}

/// Run one thread for up to `quantum` units: bytecode dispatch while FUNR
/// is a closure, primitive stepping while it is a foreign function.
pub fn run_thread(c: &mut Interp, thr: Value, quantum: i64) {
    {
        let t = thread_mut(thr);
        if t.state != ThreadState::Ready {
            return;
        }
        t.quanta = quantum;
        t.state = ThreadState::Running;
    }
    loop {
        {
            let t = thread_mut(thr);
            if t.state != ThreadState::Running {
                break;
            }
            if t.cancel {
                t.state = ThreadState::Finished;
                break;
            }
        }
        let funr = thread_mut(thr).funr;
        if has_tag(funr, Tag::CCode) {
            {
                let t = thread_mut(thr);
                if t.quanta <= 0 {
                    t.state = ThreadState::Ready;
                    break;
                }
                t.quanta -= 1;
            }
            let f = ccode_mut(funr).f;
            let step = f(c, thr);
            match step_to_flow(c, thr, step) {
                Flow::Continue => {}
                Flow::Event(VmEvent::Trampoline) => {}
                Flow::Event(_) => break,
            }
        } else {
            match vmengine(c, thr) {
                VmEvent::Trampoline => {}
                VmEvent::Quantum | VmEvent::Done | VmEvent::IoWait => break,
            }
        }
    }
    let t = thread_mut(thr);
    if t.state == ThreadState::Running {
        t.state = ThreadState::Ready;
    }
}

/// Scheduler passes until every thread is terminal. Each pass visits the
/// ring in registration order, runs a collector slice after every turn,
/// and polls the I/O-wait table once.
pub fn run(c: &mut Interp) {
    loop {
        let threads = ring(c);
        if threads.is_empty() {
            break;
        }
        let mut ran = false;
        for &thr in &threads {
            if thread_mut(thr).state == ThreadState::Ready {
                c.curthread = thr;
                let quantum = c.quantum;
                run_thread(c, thr, quantum);
                gc_slice(c);
                ran = true;
            }
        }
        c.curthread = Value::Nil;
        if !ran {
            gc_slice(c);
        }
        prune(c);

        let remaining = ring(c);
        let waiting = remaining
            .iter()
            .any(|&t| thread_mut(t).state == ThreadState::IoWait);
        let ready = remaining
            .iter()
            .any(|&t| thread_mut(t).state == ThreadState::Ready);
        if waiting {
            poll_iowait(c, if ready { 0 } else { 50 });
        } else if !ready && !remaining.is_empty() {
            // only terminal threads left; the next prune clears them
            continue;
        }
    }
}

/// One multiplexing poll over every parked descriptor; ready threads move
/// back to Ready.
fn poll_iowait(c: &mut Interp, timeout_ms: i32) {
    let iowaittbl = c.iowaittbl;
    let entries = table::entries(iowaittbl);
    if entries.is_empty() {
        return;
    }
    let mut fds: Vec<libc::pollfd> = entries
        .iter()
        .map(|&(fdv, _)| libc::pollfd {
            fd: fdv.fixnum() as i32,
            events: libc::POLLIN | libc::POLLHUP | libc::POLLERR,
            revents: 0,
        })
        .collect();
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if n <= 0 {
        return;
    }
    for (pfd, &(fdv, thr)) in fds.iter().zip(entries.iter()) {
        if pfd.revents != 0 {
            tracing::trace!(fd = pfd.fd, "fd ready, waking thread");
            {
                let t = thread_mut(thr);
                if t.state == ThreadState::IoWait {
                    t.state = ThreadState::Ready;
                }
                t.waitfd = -1;
            }
            table::delete(c, iowaittbl, fdv);
        }
    }
}

/// Synchronously apply `f` to `args` on a private thread and return its
/// result. Used by macro expansion, the applicator builtins, and the
/// REPL; the thread is pinned (not enqueued) and driven to completion
/// here.
pub fn apply_to(c: &mut Interp, f: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let stksize = c.stksize;
    let thr = mkthread(c, stksize);
    setup_stdh(c, thr);
    let mark = c.protect(thr);
    for &a in args.iter().rev() {
        let _ = thr_push(thr, a);
    }
    {
        let t = thread_mut(thr);
        t.argc = args.len();
        t.valr = f;
        t.conr = Value::Nil;
    }
    let _ = do_apply(c, thr);
    loop {
        let state = thread_mut(thr).state;
        if state.is_terminal() {
            break;
        }
        match state {
            ThreadState::IoWait => poll_iowait(c, 50),
            _ => {
                let quantum = c.quantum;
                run_thread(c, thr, quantum);
            }
        }
    }
    let exc = thread_mut(thr).exc;
    let result = if exc.is_nil() {
        Ok(thread_mut(thr).valr)
    } else {
        let text = arcueid_core::pprint::write_value(c, exc, false);
        Err(RuntimeError::Unhandled(text))
    };
    c.unprotect_to(mark);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_threads_join_the_ring_in_order() {
        let mut c = Interp::new();
        let name = arcueid_core::string::mkstring(&mut c, "noop");
        let prim = arcueid_core::code::mkccode(
            &mut c,
            0,
            |_, thr| crate::aff::aff_return(thr, Value::Fixnum(1)),
            name,
        );
        let t1 = spawn(&mut c, prim);
        let t2 = spawn(&mut c, prim);
        let ids: Vec<Value> = ring(&c);
        assert_eq!(ids, vec![t1, t2]);
    }

    #[test]
    fn run_drains_all_threads() {
        let mut c = Interp::new();
        let name = arcueid_core::string::mkstring(&mut c, "noop");
        let prim = arcueid_core::code::mkccode(
            &mut c,
            0,
            |_, thr| crate::aff::aff_return(thr, Value::Fixnum(7)),
            name,
        );
        for _ in 0..4 {
            spawn(&mut c, prim);
        }
        run(&mut c);
        assert!(c.vmthreads.is_nil());
    }

    #[test]
    fn apply_to_returns_the_primitive_result() {
        let mut c = Interp::new();
        let name = arcueid_core::string::mkstring(&mut c, "second");
        let prim = arcueid_core::code::mkccode(
            &mut c,
            2,
            |_, thr| {
                let args = crate::aff::aff_args(thr);
                crate::aff::aff_return(thr, args[1])
            },
            name,
        );
        let r = apply_to(&mut c, prim, &[Value::Fixnum(1), Value::Fixnum(2)]).unwrap();
        assert_eq!(r, Value::Fixnum(2));
    }
}
