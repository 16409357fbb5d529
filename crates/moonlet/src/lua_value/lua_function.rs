// Lua function values
//
// Two shapes share one handle type:
// - Builtin: a host (Rust) function taking and returning value vectors.
//   The call contract is variadic on both sides — N arguments in, M
//   results out, independent of any declared arity.
// - Closure: upvalue cells plus an opaque body. The body representation
//   belongs to the executor; this core only threads the upvalues and the
//   arguments through it.
//
// Functions compare by identity, so the handle is the value.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVariableRef};

/// Host function shape shared by builtins and metamethod targets.
pub type BuiltinFn = dyn Fn(Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + Send + Sync;

/// Executor-provided body of a user closure. The core calls it with the
/// closure's upvalue cells and the argument vector.
pub trait FunctionBody: Send + Sync {
    fn invoke(&self, upvalues: &[LuaVariableRef], args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;
}

impl<F> FunctionBody for F
where
    F: Fn(&[LuaVariableRef], Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + Send + Sync,
{
    fn invoke(&self, upvalues: &[LuaVariableRef], args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        self(upvalues, args)
    }
}

pub enum LuaFunction {
    Builtin {
        /// Name for diagnostics ("next", "coroutine wrapper", ...)
        name: SmolStr,
        func: Box<BuiltinFn>,
    },
    Closure {
        upvalues: Vec<LuaVariableRef>,
        body: Arc<dyn FunctionBody>,
    },
}

impl LuaFunction {
    pub fn call(&self, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        match self {
            LuaFunction::Builtin { func, .. } => func(args),
            LuaFunction::Closure { upvalues, body } => body.invoke(upvalues, args),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            LuaFunction::Builtin { name, .. } => Some(name.as_str()),
            LuaFunction::Closure { .. } => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, LuaFunction::Builtin { .. })
    }

    pub fn upvalues(&self) -> &[LuaVariableRef] {
        match self {
            LuaFunction::Builtin { .. } => &[],
            LuaFunction::Closure { upvalues, .. } => upvalues,
        }
    }
}

#[derive(Clone)]
pub struct LuaFunctionRef(Arc<LuaFunction>);

impl LuaFunctionRef {
    pub fn builtin(
        name: &str,
        func: impl Fn(Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + Send + Sync + 'static,
    ) -> Self {
        LuaFunctionRef(Arc::new(LuaFunction::Builtin {
            name: SmolStr::new(name),
            func: Box::new(func),
        }))
    }

    pub fn closure(upvalues: Vec<LuaVariableRef>, body: Arc<dyn FunctionBody>) -> Self {
        LuaFunctionRef(Arc::new(LuaFunction::Closure { upvalues, body }))
    }

    pub(crate) fn from_arc(arc: Arc<LuaFunction>) -> Self {
        LuaFunctionRef(arc)
    }

    /// Invoke with the variadic call contract.
    pub fn call(&self, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        self.0.call(args)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &LuaFunctionRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<LuaFunction> {
        Arc::downgrade(&self.0)
    }
}

impl std::fmt::Debug for LuaFunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "function: {:#014x} ({})", self.addr(), name),
            None => write!(f, "function: {:#014x}", self.addr()),
        }
    }
}
