// Coroutine entry points: create, resume, yield, status, running,
// isyieldable, close, wrap
//
// Suspension strategy: the body runs on a dedicated OS thread and trades
// control with its resumer through a pair of rendezvous channels. Resume
// sends the argument vector and parks on the yield channel; yield sends
// its values and parks on the resume channel. Exactly one side is
// runnable at any moment, so the model stays cooperatively
// single-threaded while allowing a yield from arbitrarily deep native
// frames (metamethods included).
//
// The thread-local context identifies the coroutine the current OS
// thread is a body of. It answers running()/isyieldable(), routes yield
// to the right channel pair, and collects to-be-closed variables so
// close() can run their hooks.

use std::cell::RefCell;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use crate::lua_value::{
    CoroutineStatus, LuaFunctionRef, LuaThread, LuaThreadRef, LuaValue, ResumeSignal, YieldSignal,
};
use crate::lua_vm::{LuaError, LuaResult, LuaVariableRef, lua_ops};

struct CoroutineContext {
    thread: LuaThreadRef,
    yield_tx: SyncSender<YieldSignal>,
    resume_rx: Receiver<ResumeSignal>,
}

thread_local! {
    static CURRENT: RefCell<Option<CoroutineContext>> = const { RefCell::new(None) };
}

/// coroutine.create: wrap an invocable in a suspended coroutine.
pub fn create(func: LuaValue) -> LuaResult<LuaValue> {
    if !func.is_function() {
        return Err(LuaError::Argument(format!(
            "bad argument #1 to 'create' (function expected, got {})",
            func.type_name()
        )));
    }
    Ok(LuaValue::Thread(LuaThreadRef::new(LuaThread::new(func))))
}

/// coroutine.resume: run a suspended coroutine until its next yield,
/// return, or error. Never raises: the success flag plus either the
/// transported values or the error value come back as a pair. Resuming
/// a dead or running coroutine is reported the same way.
pub fn resume(co: &LuaThreadRef, args: Vec<LuaValue>) -> (bool, Vec<LuaValue>) {
    {
        let mut th = co.lock();
        match th.status {
            CoroutineStatus::Dead => {
                return (false, vec![LuaValue::str("cannot resume dead coroutine")]);
            }
            CoroutineStatus::Running | CoroutineStatus::Normal => {
                return (
                    false,
                    vec![LuaValue::str("cannot resume non-suspended coroutine")],
                );
            }
            CoroutineStatus::Suspended => {}
        }
        th.status = CoroutineStatus::Running;

        if !th.started() {
            let func = th.func.take().unwrap_or(LuaValue::Nil);
            let (resume_tx, resume_rx) = sync_channel(1);
            let (yield_tx, yield_rx) = sync_channel(1);
            th.resume_tx = Some(resume_tx);
            th.yield_rx = Some(yield_rx);
            let body_co = co.clone();
            let spawned = std::thread::Builder::new()
                .name("lua-coroutine".to_string())
                .spawn(move || body_main(body_co, func, yield_tx, resume_rx));
            if spawned.is_err() {
                th.status = CoroutineStatus::Dead;
                return (false, vec![LuaValue::str("cannot start coroutine")]);
            }
        }

        let delivered = th
            .resume_tx
            .as_ref()
            .map(|tx| tx.send(ResumeSignal::Resume(args)).is_ok())
            .unwrap_or(false);
        if !delivered {
            th.status = CoroutineStatus::Dead;
            return (false, vec![LuaValue::str("cannot resume dead coroutine")]);
        }
    }

    // the resumer goes Normal while the resumee runs
    let prev = current_thread();
    if let Some(p) = &prev {
        p.lock().status = CoroutineStatus::Normal;
    }

    // the receiver is taken out of the struct while parked so status
    // queries from inside the body stay lock-free with respect to us
    let receiver = co.lock().yield_rx.take();
    let outcome = receiver.map(|rx| {
        let msg = rx.recv();
        co.lock().yield_rx = Some(rx);
        msg
    });

    if let Some(p) = &prev {
        p.lock().status = CoroutineStatus::Running;
    }

    match outcome {
        Some(Ok(YieldSignal::Yield(values))) => {
            co.lock().status = CoroutineStatus::Suspended;
            (true, values)
        }
        Some(Ok(YieldSignal::Done(Ok(values)))) => {
            co.lock().status = CoroutineStatus::Dead;
            (true, values)
        }
        Some(Ok(YieldSignal::Done(Err(err)))) => {
            co.lock().status = CoroutineStatus::Dead;
            (false, vec![err.error_value()])
        }
        // channel gone or a second resume raced us: the body is not
        // coming back
        Some(Err(_)) | None => {
            co.lock().status = CoroutineStatus::Dead;
            (false, vec![LuaValue::str("coroutine terminated abnormally")])
        }
    }
}

/// coroutine.yield: park the current body and hand values to the active
/// resume. Returns the arguments of the next resume. Only valid inside
/// a coroutine body.
pub fn yield_values(values: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    CURRENT.with(|current| {
        let borrow = current.borrow();
        let Some(ctx) = borrow.as_ref() else {
            return Err(LuaError::CoroutineState(
                "attempt to yield from outside a coroutine".to_string(),
            ));
        };
        if ctx.yield_tx.send(YieldSignal::Yield(values)).is_err() {
            // resumer vanished: unwind the body
            return Err(LuaError::CloseThread);
        }
        match ctx.resume_rx.recv() {
            Ok(ResumeSignal::Resume(args)) => Ok(args),
            Ok(ResumeSignal::Close) | Err(_) => Err(LuaError::CloseThread),
        }
    })
}

/// coroutine.status.
pub fn status(co: &LuaThreadRef) -> CoroutineStatus {
    co.status()
}

/// coroutine.running: the active coroutine (nil on the main thread)
/// plus the "is main" flag.
pub fn running() -> (LuaValue, bool) {
    CURRENT.with(|current| match current.borrow().as_ref() {
        Some(ctx) => (LuaValue::Thread(ctx.thread.clone()), false),
        None => (LuaValue::Nil, true),
    })
}

/// coroutine.isyieldable: true iff a non-main coroutine is active.
pub fn isyieldable() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// coroutine.close: drive a suspended coroutine to Dead, unwinding its
/// parked body and running the close hooks of to-be-closed variables it
/// registered (reverse order, hook errors swallowed). A no-op on a dead
/// coroutine; an error on a running or normal one.
pub fn close(co: &LuaThreadRef) -> LuaResult<()> {
    let closing_self =
        CURRENT.with(|current| current.borrow().as_ref().is_some_and(|c| c.thread.ptr_eq(co)));
    if closing_self {
        return Err(LuaError::CoroutineState(
            "cannot close a running coroutine".to_string(),
        ));
    }

    let (sender, receiver) = {
        let mut th = co.lock();
        match th.status {
            CoroutineStatus::Dead => return Ok(()),
            CoroutineStatus::Running | CoroutineStatus::Normal => {
                return Err(LuaError::CoroutineState(format!(
                    "cannot close a {} coroutine",
                    th.status.as_str()
                )));
            }
            CoroutineStatus::Suspended => {}
        }
        (th.resume_tx.clone(), th.yield_rx.take())
    };

    // unwind a started body; a virgin coroutine has nothing parked
    let mut result = Ok(());
    if let Some(tx) = sender {
        let _ = tx.send(ResumeSignal::Close);
        if let Some(rx) = receiver {
            if let Ok(YieldSignal::Done(Err(err))) = rx.recv() {
                if !matches!(err, LuaError::CloseThread) {
                    result = Err(err);
                }
            }
        }
    }

    let pending = {
        let mut th = co.lock();
        th.status = CoroutineStatus::Dead;
        th.resume_tx = None;
        std::mem::take(&mut th.to_close)
    };
    let err_value = result.as_ref().err().map(LuaError::error_value);
    for var in pending.iter().rev() {
        crate::lua_vm::close_variable(var, err_value.as_ref());
    }

    result
}

/// coroutine.wrap: a callable that resumes the wrapped coroutine and
/// propagates its errors instead of returning a flag.
pub fn wrap(func: LuaValue) -> LuaResult<LuaValue> {
    let thread = match create(func)? {
        LuaValue::Thread(t) => t,
        _ => unreachable!("create returns a thread"),
    };
    let wrapper = LuaFunctionRef::builtin("coroutine wrapper", move |args| {
        let (ok, mut values) = resume(&thread, args);
        if ok {
            Ok(values)
        } else {
            let err = if values.is_empty() {
                LuaValue::Nil
            } else {
                values.remove(0)
            };
            Err(LuaError::user(err))
        }
    });
    Ok(LuaValue::Function(wrapper))
}

fn current_thread() -> Option<LuaThreadRef> {
    CURRENT.with(|current| current.borrow().as_ref().map(|c| c.thread.clone()))
}

/// Remember a close-attributed variable declared while this coroutine
/// runs, so close() can reach it after the body is gone.
pub(crate) fn register_to_be_closed(var: &LuaVariableRef) {
    CURRENT.with(|current| {
        if let Some(ctx) = current.borrow().as_ref() {
            ctx.thread.lock().to_close.push(var.clone());
        }
    });
}

/// A scope exit already closed this variable; drop it from the pending
/// list.
pub(crate) fn unregister_to_be_closed(var: &LuaVariableRef) {
    CURRENT.with(|current| {
        if let Some(ctx) = current.borrow().as_ref() {
            ctx.thread.lock().to_close.retain(|v| !v.ptr_eq(var));
        }
    });
}

/// Body thread mainline: wait for the first resume, install the
/// context, run the invocable, report the outcome.
fn body_main(
    co: LuaThreadRef,
    func: LuaValue,
    yield_tx: SyncSender<YieldSignal>,
    resume_rx: Receiver<ResumeSignal>,
) {
    let first_args = match resume_rx.recv() {
        Ok(ResumeSignal::Resume(args)) => args,
        Ok(ResumeSignal::Close) | Err(_) => {
            let _ = yield_tx.send(YieldSignal::Done(Err(LuaError::CloseThread)));
            return;
        }
    };
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(CoroutineContext {
            thread: co,
            yield_tx: yield_tx.clone(),
            resume_rx,
        });
    });
    let result = lua_ops::call_value(&func, first_args);
    let _ = yield_tx.send(YieldSignal::Done(result));
}
