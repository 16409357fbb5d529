// Lua thread (coroutine) state
//
// The data side of the coroutine model: status machine, the channel
// endpoints that pair resume with yield, and the to-be-closed variables
// registered while the body ran. The resume/yield protocol itself lives
// in lua_coroutine.
//
// The body runs on its own OS thread but only one side is ever runnable:
// resume parks the caller until the body yields, returns or dies, so the
// execution model stays cooperatively single-threaded.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVariableRef};

/// Coroutine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// Created or yielded (can be resumed)
    Suspended,
    /// Currently executing
    Running,
    /// Resumed another coroutine (on the stack but not executing)
    Normal,
    /// Finished or encountered an error
    Dead,
}

impl CoroutineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

/// What a resume delivers to the parked body.
pub(crate) enum ResumeSignal {
    Resume(Vec<LuaValue>),
    /// close(): unwind without running the rest of the body
    Close,
}

/// What the body delivers to the parked resumer.
pub(crate) enum YieldSignal {
    Yield(Vec<LuaValue>),
    Done(LuaResult<Vec<LuaValue>>),
}

pub struct LuaThread {
    pub(crate) status: CoroutineStatus,
    /// The wrapped invocable; taken when the body thread starts
    pub(crate) func: Option<LuaValue>,
    /// Send side of the resume channel (present once started)
    pub(crate) resume_tx: Option<SyncSender<ResumeSignal>>,
    /// Receive side of the yield channel (present once started; taken
    /// out while a resume is parked on it so status queries stay free)
    pub(crate) yield_rx: Option<Receiver<YieldSignal>>,
    /// Close-attributed variables declared while this coroutine ran,
    /// in registration order
    pub(crate) to_close: Vec<LuaVariableRef>,
}

impl LuaThread {
    pub fn new(func: LuaValue) -> Self {
        LuaThread {
            status: CoroutineStatus::Suspended,
            func: Some(func),
            resume_tx: None,
            yield_rx: None,
            to_close: Vec::new(),
        }
    }

    #[inline]
    pub fn status(&self) -> CoroutineStatus {
        self.status
    }

    #[inline]
    pub fn can_resume(&self) -> bool {
        matches!(self.status, CoroutineStatus::Suspended)
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        matches!(self.status, CoroutineStatus::Dead)
    }

    pub(crate) fn started(&self) -> bool {
        self.resume_tx.is_some()
    }
}

#[derive(Clone)]
pub struct LuaThreadRef(Arc<Mutex<LuaThread>>);

impl LuaThreadRef {
    pub fn new(thread: LuaThread) -> Self {
        LuaThreadRef(Arc::new(Mutex::new(thread)))
    }

    pub(crate) fn from_arc(arc: Arc<Mutex<LuaThread>>) -> Self {
        LuaThreadRef(arc)
    }

    pub fn lock(&self) -> MutexGuard<'_, LuaThread> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> CoroutineStatus {
        self.lock().status
    }

    #[inline]
    pub fn ptr_eq(&self, other: &LuaThreadRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<LuaThread>> {
        Arc::downgrade(&self.0)
    }
}

impl std::fmt::Debug for LuaThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread: {:#014x} ({})", self.addr(), self.status().as_str())
    }
}
