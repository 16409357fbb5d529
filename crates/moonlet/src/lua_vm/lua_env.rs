// Variables and environments
//
// A variable is a named cell with an attribute: plain, const (rejects
// reassignment), or close (runs __close on scope exit, normal or
// erroring). An environment is a scope stack over a globals table:
// lookup walks inner to outer and falls through to the globals, writes
// hit the innermost binding or the globals.
//
// Close hooks run in reverse registration order when their scope exits.
// An error inside a hook is logged and swallowed so unwinding never
// double-faults.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::lua_value::{LuaTable, LuaTableRef, LuaValue};
use crate::lua_vm::metamethod::{MetaMethod, get_metamethod};
use crate::lua_vm::{LuaError, LuaResult, lua_ops};

/// Declaration attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarAttribute {
    Regular,
    Const,
    Close,
}

pub struct LuaVariable {
    name: SmolStr,
    value: LuaValue,
    attribute: VarAttribute,
    closed: bool,
}

impl LuaVariable {
    pub fn new(name: &str, value: LuaValue, attribute: VarAttribute) -> Self {
        LuaVariable {
            name: SmolStr::new(name),
            value,
            attribute,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self) -> VarAttribute {
        self.attribute
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn value(&self) -> LuaResult<LuaValue> {
        if self.closed {
            return Err(LuaError::ClosedVariable(format!(
                "attempt to read closed variable '{}'",
                self.name
            )));
        }
        Ok(self.value.clone())
    }

    pub fn set_value(&mut self, value: LuaValue) -> LuaResult<()> {
        if self.closed {
            return Err(LuaError::ClosedVariable(format!(
                "attempt to assign to closed variable '{}'",
                self.name
            )));
        }
        if self.attribute == VarAttribute::Const {
            return Err(LuaError::ConstAssignment(format!(
                "attempt to assign to const variable '{}'",
                self.name
            )));
        }
        self.value = value;
        Ok(())
    }

    /// The held value regardless of the closed flag, for the close hook
    /// itself.
    pub(crate) fn raw_value(&self) -> LuaValue {
        self.value.clone()
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

#[derive(Clone)]
pub struct LuaVariableRef(Arc<Mutex<LuaVariable>>);

impl LuaVariableRef {
    pub fn new(var: LuaVariable) -> Self {
        LuaVariableRef(Arc::new(Mutex::new(var)))
    }

    pub fn lock(&self) -> MutexGuard<'_, LuaVariable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn value(&self) -> LuaResult<LuaValue> {
        self.lock().value()
    }

    pub fn set_value(&self, value: LuaValue) -> LuaResult<()> {
        self.lock().set_value(value)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &LuaVariableRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for LuaVariableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        write!(f, "variable '{}' ({:?})", guard.name(), guard.attribute())
    }
}

/// One lexical scope: its bindings plus the close-attributed variables
/// in registration order.
#[derive(Default)]
struct LuaScope {
    vars: AHashMap<SmolStr, LuaVariableRef>,
    to_close: Vec<LuaVariableRef>,
}

pub struct LuaEnv {
    globals: LuaTableRef,
    scopes: Vec<LuaScope>,
}

impl LuaEnv {
    pub fn new() -> Self {
        Self::with_globals(LuaTableRef::new(LuaTable::new()))
    }

    pub fn with_globals(globals: LuaTableRef) -> Self {
        LuaEnv {
            globals,
            scopes: Vec::new(),
        }
    }

    pub fn globals(&self) -> &LuaTableRef {
        &self.globals
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(LuaScope::default());
    }

    /// Leave the innermost scope. `err` is the in-flight error for an
    /// abnormal exit; close hooks receive it (or nil) and run in reverse
    /// registration order. Hook errors are logged and swallowed.
    pub fn pop_scope(&mut self, err: Option<&LuaValue>) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        for var in scope.to_close.iter().rev() {
            close_variable(var, err);
            crate::lua_coroutine::unregister_to_be_closed(var);
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declare a variable in the innermost scope. A close-attributed
    /// variable must hold a closable value: nil, false, or something
    /// carrying __close.
    pub fn declare(
        &mut self,
        name: &str,
        value: LuaValue,
        attribute: VarAttribute,
    ) -> LuaResult<LuaVariableRef> {
        if attribute == VarAttribute::Close
            && value.is_truthy()
            && get_metamethod(&value, MetaMethod::Close).is_none()
        {
            return Err(LuaError::TypeMismatch(format!(
                "variable '{}' got a non-closable value (a {} value)",
                name,
                value.type_name()
            )));
        }
        let var = LuaVariableRef::new(LuaVariable::new(name, value, attribute));
        let scope = match self.scopes.last_mut() {
            Some(s) => s,
            None => {
                self.scopes.push(LuaScope::default());
                self.scopes.last_mut().expect("scope just pushed")
            }
        };
        scope.vars.insert(SmolStr::new(name), var.clone());
        if attribute == VarAttribute::Close {
            scope.to_close.push(var.clone());
            // a coroutine body's pending closes are also reachable from
            // coroutine close()
            crate::lua_coroutine::register_to_be_closed(&var);
        }
        Ok(var)
    }

    /// The binding for a name, innermost scope first. None when only the
    /// globals could answer.
    pub fn lookup_variable(&self, name: &str) -> Option<LuaVariableRef> {
        for scope in self.scopes.iter().rev() {
            if let Some(var) = scope.vars.get(name) {
                return Some(var.clone());
            }
        }
        None
    }

    /// Read a name: the innermost binding, else the globals table
    /// (honoring its metatable).
    pub fn lookup(&self, name: &str) -> LuaResult<LuaValue> {
        if let Some(var) = self.lookup_variable(name) {
            return var.value();
        }
        lua_ops::index_get(&LuaValue::Table(self.globals.clone()), &LuaValue::str(name))
    }

    /// Write a name: the innermost binding when present, else the
    /// globals table (honoring its metatable).
    pub fn assign(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        if let Some(var) = self.lookup_variable(name) {
            return var.set_value(value);
        }
        lua_ops::index_set(
            &LuaValue::Table(self.globals.clone()),
            LuaValue::str(name),
            value,
        )
    }
}

impl Default for LuaEnv {
    fn default() -> Self {
        LuaEnv::new()
    }
}

/// Run a variable's __close and mark it closed. Hook errors are
/// swallowed after logging so scope unwinding cannot double-fault.
pub(crate) fn close_variable(var: &LuaVariableRef, err: Option<&LuaValue>) {
    let (value, already_closed) = {
        let guard = var.lock();
        (guard.raw_value(), guard.is_closed())
    };
    if already_closed {
        return;
    }
    var.lock().mark_closed();
    if value.is_falsy() {
        return;
    }
    if let Err(close_err) = run_close_handler(&value, err) {
        tracing::warn!(error = %close_err, "error in __close metamethod");
    }
}

/// Invoke __close on a value with the in-flight error (or nil).
fn run_close_handler(value: &LuaValue, err: Option<&LuaValue>) -> LuaResult<()> {
    let Some(handler) = get_metamethod(value, MetaMethod::Close) else {
        return Ok(());
    };
    let err_value = err.cloned().unwrap_or(LuaValue::Nil);
    lua_ops::call_value(&handler, vec![value.clone(), err_value])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::LuaTable;

    fn closable(flag: LuaTableRef) -> LuaValue {
        // a table whose __close records the call in `flag`
        let mt = LuaTableRef::new(LuaTable::new());
        let flag_inner = flag.clone();
        let hook = crate::lua_value::LuaFunctionRef::builtin("close-hook", move |args| {
            let err = args.get(1).cloned().unwrap_or(LuaValue::Nil);
            flag_inner.raw_set(LuaValue::str("closed"), LuaValue::Boolean(true))?;
            flag_inner.raw_set(LuaValue::str("err"), err)?;
            Ok(Vec::new())
        });
        mt.raw_set(LuaValue::str("__close"), LuaValue::Function(hook))
            .unwrap();
        let t = LuaTableRef::new(LuaTable::new());
        t.set_metatable(Some(mt));
        LuaValue::Table(t)
    }

    #[test]
    fn test_const_rejects_assignment() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let v = env
            .declare("x", LuaValue::integer(5), VarAttribute::Const)
            .unwrap();
        assert!(matches!(
            v.set_value(LuaValue::integer(6)),
            Err(LuaError::ConstAssignment(_))
        ));
        assert_eq!(v.value().unwrap(), LuaValue::integer(5));
    }

    #[test]
    fn test_closed_variable_rejects_access() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let flag = LuaTableRef::new(LuaTable::new());
        let v = env
            .declare("r", closable(flag), VarAttribute::Close)
            .unwrap();
        env.pop_scope(None);
        assert!(matches!(v.value(), Err(LuaError::ClosedVariable(_))));
        assert!(matches!(
            v.set_value(LuaValue::Nil),
            Err(LuaError::ClosedVariable(_))
        ));
    }

    #[test]
    fn test_close_hook_runs_on_normal_exit() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let flag = LuaTableRef::new(LuaTable::new());
        env.declare("r", closable(flag.clone()), VarAttribute::Close)
            .unwrap();
        env.pop_scope(None);
        assert_eq!(
            flag.raw_get(&LuaValue::str("closed")),
            LuaValue::Boolean(true)
        );
        assert!(flag.raw_get(&LuaValue::str("err")).is_nil());
    }

    #[test]
    fn test_close_hook_receives_inflight_error() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let flag = LuaTableRef::new(LuaTable::new());
        env.declare("r", closable(flag.clone()), VarAttribute::Close)
            .unwrap();
        env.pop_scope(Some(&LuaValue::str("boom")));
        assert_eq!(flag.raw_get(&LuaValue::str("err")), LuaValue::str("boom"));
    }

    #[test]
    fn test_close_hooks_run_in_reverse_order() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let order = LuaTableRef::new(LuaTable::new());

        for name in ["a", "b"] {
            let mt = LuaTableRef::new(LuaTable::new());
            let order_inner = order.clone();
            let tag = LuaValue::str(name);
            let hook = crate::lua_value::LuaFunctionRef::builtin("order-hook", move |_| {
                let n = order_inner.length();
                order_inner.raw_set(LuaValue::integer(n + 1), tag.clone())?;
                Ok(Vec::new())
            });
            mt.raw_set(LuaValue::str("__close"), LuaValue::Function(hook))
                .unwrap();
            let t = LuaTableRef::new(LuaTable::new());
            t.set_metatable(Some(mt));
            env.declare(name, LuaValue::Table(t), VarAttribute::Close)
                .unwrap();
        }

        env.pop_scope(None);
        assert_eq!(order.raw_get(&LuaValue::integer(1)), LuaValue::str("b"));
        assert_eq!(order.raw_get(&LuaValue::integer(2)), LuaValue::str("a"));
    }

    #[test]
    fn test_close_hook_error_is_swallowed() {
        let mut env = LuaEnv::new();
        env.push_scope();
        let mt = LuaTableRef::new(LuaTable::new());
        let hook = crate::lua_value::LuaFunctionRef::builtin("bad-hook", |_| {
            Err(LuaError::user(LuaValue::str("hook failure")))
        });
        mt.raw_set(LuaValue::str("__close"), LuaValue::Function(hook))
            .unwrap();
        let t = LuaTableRef::new(LuaTable::new());
        t.set_metatable(Some(mt));
        env.declare("r", LuaValue::Table(t), VarAttribute::Close)
            .unwrap();
        // must not propagate
        env.pop_scope(None);
    }

    #[test]
    fn test_close_requires_closable_value() {
        let mut env = LuaEnv::new();
        env.push_scope();
        assert!(env
            .declare("x", LuaValue::integer(1), VarAttribute::Close)
            .is_err());
        // nil and false are closable placeholders
        assert!(env.declare("y", LuaValue::Nil, VarAttribute::Close).is_ok());
        assert!(env
            .declare("z", LuaValue::Boolean(false), VarAttribute::Close)
            .is_ok());
    }

    #[test]
    fn test_lookup_walks_scopes_then_globals() {
        let mut env = LuaEnv::new();
        env.globals()
            .raw_set(LuaValue::str("g"), LuaValue::integer(1))
            .unwrap();
        env.push_scope();
        env.declare("x", LuaValue::integer(10), VarAttribute::Regular)
            .unwrap();
        env.push_scope();
        env.declare("x", LuaValue::integer(20), VarAttribute::Regular)
            .unwrap();

        assert_eq!(env.lookup("x").unwrap(), LuaValue::integer(20));
        assert_eq!(env.lookup("g").unwrap(), LuaValue::integer(1));
        assert!(env.lookup("missing").unwrap().is_nil());

        env.pop_scope(None);
        assert_eq!(env.lookup("x").unwrap(), LuaValue::integer(10));
    }

    #[test]
    fn test_assign_inner_binding_else_globals() {
        let mut env = LuaEnv::new();
        env.push_scope();
        env.declare("x", LuaValue::integer(1), VarAttribute::Regular)
            .unwrap();
        env.assign("x", LuaValue::integer(2)).unwrap();
        assert_eq!(env.lookup("x").unwrap(), LuaValue::integer(2));
        // no binding: goes to globals
        env.assign("g", LuaValue::integer(9)).unwrap();
        assert_eq!(
            env.globals().raw_get(&LuaValue::str("g")),
            LuaValue::integer(9)
        );
    }
}
