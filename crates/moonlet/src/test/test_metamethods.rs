// Tests for metamethod dispatch through the operation entry points
use crate::*;

fn int(i: i64) -> LuaValue {
    LuaValue::integer(i)
}

fn new_table() -> LuaTableRef {
    LuaTableRef::default()
}

/// A table with a single metamethod installed.
fn with_metamethod(event: &str, handler: LuaValue) -> LuaValue {
    let mt = new_table();
    mt.raw_set(LuaValue::str(event), handler).unwrap();
    let t = new_table();
    t.set_metatable(Some(mt));
    LuaValue::Table(t)
}

fn builtin(
    name: &str,
    f: impl Fn(Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + Send + Sync + 'static,
) -> LuaValue {
    LuaValue::Function(LuaFunctionRef::builtin(name, f))
}

#[test]
fn test_index_chain_through_table_handler() {
    // base = {x = 1}; derived = setmetatable({}, {__index = base})
    let base = new_table();
    base.raw_set(LuaValue::str("x"), int(1)).unwrap();

    let mt = new_table();
    mt.raw_set(LuaValue::str("__index"), LuaValue::Table(base)).unwrap();
    let derived = new_table();
    derived.set_metatable(Some(mt));
    let derived = LuaValue::Table(derived);

    assert_eq!(lua_ops::index_get(&derived, &LuaValue::str("x")).unwrap(), int(1));
    assert!(lua_ops::rawget(&derived, &LuaValue::str("x")).unwrap().is_nil());
    // misses all the way down stay nil
    assert!(lua_ops::index_get(&derived, &LuaValue::str("y")).unwrap().is_nil());
}

#[test]
fn test_index_function_handler() {
    let t = with_metamethod(
        "__index",
        builtin("default", |args| {
            let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
            Ok(vec![LuaValue::String(lua_ops::tostring_value(&key)?)])
        }),
    );
    assert_eq!(
        lua_ops::index_get(&t, &LuaValue::str("missing")).unwrap(),
        LuaValue::str("missing")
    );
    // a raw hit bypasses the handler
    lua_ops::rawset(&t, LuaValue::str("present"), int(5)).unwrap();
    assert_eq!(lua_ops::index_get(&t, &LuaValue::str("present")).unwrap(), int(5));
}

#[test]
fn test_newindex_function_handler_intercepts_missing_keys() {
    let log = new_table();
    let log_inner = log.clone();
    let t = with_metamethod(
        "__newindex",
        builtin("trap", move |args| {
            let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
            let value = args.get(2).cloned().unwrap_or(LuaValue::Nil);
            log_inner.raw_set(key, value)?;
            Ok(Vec::new())
        }),
    );
    lua_ops::index_set(&t, LuaValue::str("k"), int(1)).unwrap();
    // trapped: the write landed in `log`, not in the table
    assert!(lua_ops::rawget(&t, &LuaValue::str("k")).unwrap().is_nil());
    assert_eq!(log.raw_get(&LuaValue::str("k")), int(1));

    // an existing key writes through without consulting the handler
    lua_ops::rawset(&t, LuaValue::str("seen"), int(1)).unwrap();
    lua_ops::index_set(&t, LuaValue::str("seen"), int(2)).unwrap();
    assert_eq!(lua_ops::rawget(&t, &LuaValue::str("seen")).unwrap(), int(2));
}

#[test]
fn test_newindex_table_handler_redirects() {
    let target = new_table();
    let t = with_metamethod("__newindex", LuaValue::Table(target.clone()));
    lua_ops::index_set(&t, LuaValue::str("k"), int(9)).unwrap();
    assert_eq!(target.raw_get(&LuaValue::str("k")), int(9));
}

#[test]
fn test_arith_metamethods_order() {
    let add = builtin("vec-add", |_| Ok(vec![LuaValue::str("left-add")]));
    let left = with_metamethod("__add", add);
    // left's handler wins over a plain right operand
    assert_eq!(lua_ops::add(&left, &int(1)).unwrap(), LuaValue::str("left-add"));
    assert_eq!(lua_ops::add(&int(1), &left).unwrap(), LuaValue::str("left-add"));
}

#[test]
fn test_eq_metamethod_same_kind_only() {
    let always = builtin("always", |_| Ok(vec![LuaValue::Boolean(true)]));
    let a = with_metamethod("__eq", always.clone());
    let b = LuaValue::Table(new_table());
    assert!(lua_ops::equals(&a, &b).unwrap());
    // different primary kinds never dispatch __eq
    assert!(!lua_ops::equals(&a, &int(1)).unwrap());
    assert!(!lua_ops::equals(&a, &LuaValue::str("t")).unwrap());
}

#[test]
fn test_lt_le_metamethods_and_swapped_forms() {
    let lt = builtin("lt", |args| {
        let a = lua_ops::rawget(&args[0], &LuaValue::str("n"))?;
        let b = lua_ops::rawget(&args[1], &LuaValue::str("n"))?;
        Ok(vec![LuaValue::Boolean(lua_ops::less_than(&a, &b)?)])
    });
    let make = |n: i64| {
        let t = with_metamethod("__lt", lt.clone());
        lua_ops::rawset(&t, LuaValue::str("n"), int(n)).unwrap();
        t
    };
    let two = make(2);
    let three = make(3);
    assert!(lua_ops::less_than(&two, &three).unwrap());
    assert!(!lua_ops::less_than(&three, &two).unwrap());
    // a > b delegates to b < a
    assert!(lua_ops::greater_than(&three, &two).unwrap());
}

#[test]
fn test_concat_metamethod_from_right_operand() {
    let tag = builtin("tag", |_| Ok(vec![LuaValue::str("tagged")]));
    let right = with_metamethod("__concat", tag);
    assert_eq!(
        lua_ops::concat(&LuaValue::str("s"), &right).unwrap(),
        LuaValue::str("tagged")
    );
}

#[test]
fn test_len_metamethod() {
    let fixed = builtin("fixed-len", |_| Ok(vec![int(99)]));
    let t = with_metamethod("__len", fixed);
    assert_eq!(lua_ops::len(&t).unwrap(), int(99));
    // rawlen ignores it
    assert_eq!(lua_ops::rawlen(&t).unwrap(), 0);
}

#[test]
fn test_call_metamethod_receives_callee_first() {
    let t = with_metamethod(
        "__call",
        builtin("apply", |args| {
            // args[0] is the called value itself
            assert!(args[0].is_table());
            let n = args.get(1).and_then(LuaValue::as_integer).unwrap_or(0);
            Ok(vec![int(n + 1)])
        }),
    );
    let out = lua_ops::call_value(&t, vec![int(41)]).unwrap();
    assert_eq!(out, vec![int(42)]);
}

#[test]
fn test_call_on_uncallable_errors() {
    let err = lua_ops::call_value(&int(3), Vec::new()).unwrap_err();
    assert_eq!(err.to_string(), "attempt to call a number value");
}

#[test]
fn test_tostring_metamethod_must_return_string() {
    let good = with_metamethod("__tostring", builtin("name", |_| Ok(vec![LuaValue::str("widget")])));
    assert_eq!(lua_ops::tostring_value(&good).unwrap().as_str(), Some("widget"));

    let bad = with_metamethod("__tostring", builtin("broken", |_| Ok(vec![int(5)])));
    assert!(lua_ops::tostring_value(&bad).is_err());
}

#[test]
fn test_pairs_metamethod_supplies_triple() {
    let t = with_metamethod(
        "__pairs",
        builtin("iter", |args| {
            Ok(vec![
                LuaValue::Function(LuaFunctionRef::builtin("step", |_| Ok(vec![LuaValue::Nil]))),
                args.into_iter().next().unwrap_or(LuaValue::Nil),
                LuaValue::str("ctl"),
            ])
        }),
    );
    let (f, s, ctl) = lua_ops::pairs_value(&t).unwrap();
    assert!(f.is_function());
    assert!(s.is_table());
    assert_eq!(ctl, LuaValue::str("ctl"));
}

#[test]
fn test_metatable_guard() {
    let mt = new_table();
    mt.raw_set(LuaValue::str("__metatable"), LuaValue::str("locked")).unwrap();
    let t = new_table();
    t.set_metatable(Some(mt.clone()));
    let tv = LuaValue::Table(t);

    // getmetatable reports the guard value, not the metatable
    assert_eq!(lua_ops::getmetatable_value(&tv), LuaValue::str("locked"));
    // setmetatable refuses
    let err = lua_ops::setmetatable_value(&tv, &LuaValue::Nil).unwrap_err();
    assert_eq!(err.to_string(), "cannot change a protected metatable");
}

#[test]
fn test_setmetatable_surface() {
    let t = LuaValue::Table(new_table());
    let mt = new_table();
    let back = lua_ops::setmetatable_value(&t, &LuaValue::Table(mt.clone())).unwrap();
    assert!(back.raw_equal(&t));
    match lua_ops::getmetatable_value(&t) {
        LuaValue::Table(found) => assert!(found.ptr_eq(&mt)),
        other => panic!("expected metatable, got {}", other),
    }
    // clearing works while unprotected
    lua_ops::setmetatable_value(&t, &LuaValue::Nil).unwrap();
    assert!(lua_ops::getmetatable_value(&t).is_nil());
    // only tables can take one through this surface
    assert!(lua_ops::setmetatable_value(&int(1), &LuaValue::Nil).is_err());
}

#[test]
fn test_handler_can_reenter_its_own_table() {
    // __index handler reads another key of the same table
    let t = new_table();
    let t_inner = t.clone();
    let mt = new_table();
    mt.raw_set(
        LuaValue::str("__index"),
        builtin("reenter", move |_| {
            Ok(vec![t_inner.raw_get(&LuaValue::str("fallback"))])
        }),
    )
    .unwrap();
    t.set_metatable(Some(mt));
    t.raw_set(LuaValue::str("fallback"), int(7)).unwrap();

    let tv = LuaValue::Table(t);
    assert_eq!(lua_ops::index_get(&tv, &LuaValue::str("missing")).unwrap(), int(7));
}

#[test]
fn test_unary_metamethods() {
    let neg = builtin("neg", |_| Ok(vec![LuaValue::str("negated")]));
    let t = with_metamethod("__unm", neg);
    assert_eq!(lua_ops::unary_minus(&t).unwrap(), LuaValue::str("negated"));

    let flip = builtin("flip", |_| Ok(vec![int(-1)]));
    let t = with_metamethod("__bnot", flip);
    assert_eq!(lua_ops::bnot(&t).unwrap(), int(-1));
}

#[test]
fn test_bitwise_metamethod_fallback() {
    let both = builtin("band", |_| Ok(vec![int(12)]));
    let t = with_metamethod("__band", both);
    assert_eq!(lua_ops::band(&t, &int(1)).unwrap(), int(12));
    assert_eq!(lua_ops::band(&int(1), &t).unwrap(), int(12));
}
