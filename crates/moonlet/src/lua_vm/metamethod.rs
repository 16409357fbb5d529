// Metamethod events and lookup
//
// One variant per overridable event, with the __name string each one
// lives under in a metatable. Lookup never holds the metatable's lock
// beyond the rawget: the handler value is cloned out so invoking it can
// re-enter the same table freely.

use crate::lua_value::{LuaTableRef, LuaValue};

/// Overridable events, in the order the reference implementation lists
/// its tag methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaMethod {
    Index,
    NewIndex,
    Gc,
    Mode,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Unm,
    Bnot,
    Lt,
    Le,
    Concat,
    Call,
    Close,
    ToString,
    Pairs,
    Metatable,
}

impl MetaMethod {
    /// The metatable key this event is stored under.
    pub const fn name(self) -> &'static str {
        match self {
            MetaMethod::Index => "__index",
            MetaMethod::NewIndex => "__newindex",
            MetaMethod::Gc => "__gc",
            MetaMethod::Mode => "__mode",
            MetaMethod::Len => "__len",
            MetaMethod::Eq => "__eq",
            MetaMethod::Add => "__add",
            MetaMethod::Sub => "__sub",
            MetaMethod::Mul => "__mul",
            MetaMethod::Mod => "__mod",
            MetaMethod::Pow => "__pow",
            MetaMethod::Div => "__div",
            MetaMethod::IDiv => "__idiv",
            MetaMethod::Band => "__band",
            MetaMethod::Bor => "__bor",
            MetaMethod::Bxor => "__bxor",
            MetaMethod::Shl => "__shl",
            MetaMethod::Shr => "__shr",
            MetaMethod::Unm => "__unm",
            MetaMethod::Bnot => "__bnot",
            MetaMethod::Lt => "__lt",
            MetaMethod::Le => "__le",
            MetaMethod::Concat => "__concat",
            MetaMethod::Call => "__call",
            MetaMethod::Close => "__close",
            MetaMethod::ToString => "__tostring",
            MetaMethod::Pairs => "__pairs",
            MetaMethod::Metatable => "__metatable",
        }
    }

}

/// The metatable of a value. Only tables and full userdata carry one in
/// this core; every other kind answers None.
pub fn get_metatable(value: &LuaValue) -> Option<LuaTableRef> {
    match value {
        LuaValue::Table(t) => t.lock().get_metatable(),
        LuaValue::Userdata(u) => u.lock().get_metatable(),
        _ => None,
    }
}

/// Look up an event handler on a value's metatable. Returns the handler
/// value (cloned out, no lock retained), or None when absent or nil.
pub fn get_metamethod(value: &LuaValue, event: MetaMethod) -> Option<LuaValue> {
    let mt = get_metatable(value)?;
    let handler = mt.lock().raw_get(&LuaValue::str(event.name()));
    if handler.is_nil() { None } else { Some(handler) }
}

/// Binary-operator lookup order: the left operand's metatable first,
/// then the right's.
pub fn get_binop_metamethod(a: &LuaValue, b: &LuaValue, event: MetaMethod) -> Option<LuaValue> {
    get_metamethod(a, event).or_else(|| get_metamethod(b, event))
}

/// The __eq handler, under its stricter rule: both operands must be the
/// same primary kind (two tables or two userdata) and at least one must
/// carry the handler.
pub fn get_eq_metamethod(a: &LuaValue, b: &LuaValue) -> Option<LuaValue> {
    let same_kind = (a.is_table() && b.is_table()) || (a.is_userdata() && b.is_userdata());
    if !same_kind {
        return None;
    }
    get_binop_metamethod(a, b, MetaMethod::Eq)
}
