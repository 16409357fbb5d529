// Operation semantics
//
// The entry points an executor evaluates expressions through: arithmetic,
// comparison, concatenation, length, bitwise, logical selection, index
// read/write with the __index/__newindex chains, calls with __call,
// tostring, pairs, the raw table operations, and metatable access with
// the __metatable guard.
//
// Every operation resolves a metamethod before failing, with the raw
// behavior first where the operands support it. No table lock is held
// across a metamethod call, so handlers may re-enter their own table.
//
// Numeric rules: integer results stay integer when representable; signed
// 64-bit overflow promotes both operands to float and retries. Division
// and exponentiation are always float. Floor division and modulo follow
// the sign of the divisor. Mixed integer/float comparison is exact even
// beyond 2^53, by splitting the float at its floor (the reference
// implementation's LTintfloat family).

use crate::lua_value::lua_convert;
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::metamethod::{
    MetaMethod, get_binop_metamethod, get_eq_metamethod, get_metamethod, get_metatable,
};
use crate::lua_vm::{LuaError, LuaResult};

/// Bound on __index/__newindex/__call delegation chains.
const MAX_META_CHAIN: usize = 100;

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

// ==================== numeric coercion ====================

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Flt(f64),
}

/// A number, for comparison purposes: the numeric sub-tags only.
fn value_num(v: &LuaValue) -> Option<Num> {
    match v {
        LuaValue::Integer(i) => Some(Num::Int(*i)),
        LuaValue::Float(f) => Some(Num::Flt(*f)),
        _ => None,
    }
}

/// A number, for arithmetic purposes: numeric strings coerce.
fn arith_num(v: &LuaValue) -> Option<Num> {
    match v {
        LuaValue::Integer(i) => Some(Num::Int(*i)),
        LuaValue::Float(f) => Some(Num::Flt(*f)),
        LuaValue::String(s) => match lua_convert::parse_number(s.as_str()?)? {
            LuaValue::Integer(i) => Some(Num::Int(i)),
            LuaValue::Float(f) => Some(Num::Flt(f)),
            _ => None,
        },
        _ => None,
    }
}

impl Num {
    #[inline]
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Flt(f) => f,
        }
    }
}

// ==================== arithmetic ====================

pub fn add(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Add, a, b)
}

pub fn sub(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Sub, a, b)
}

pub fn mul(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Mul, a, b)
}

/// `/` is always float.
pub fn div(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Div, a, b)
}

/// `//` floors; integer division by zero is an error, float yields
/// the IEEE result.
pub fn idiv(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::IDiv, a, b)
}

/// `%` is a - floor(a/b)*b, so the result follows the divisor's sign.
pub fn modulo(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Mod, a, b)
}

/// `^` is always float.
pub fn pow(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    arith_binary(MetaMethod::Pow, a, b)
}

pub fn unary_minus(v: &LuaValue) -> LuaResult<LuaValue> {
    if let Some(n) = arith_num(v) {
        return Ok(match n {
            Num::Int(i) => match i.checked_neg() {
                Some(r) => LuaValue::Integer(r),
                None => LuaValue::Float(-(i as f64)),
            },
            Num::Flt(f) => LuaValue::Float(-f),
        });
    }
    match get_metamethod(v, MetaMethod::Unm) {
        // unary handlers receive the operand twice, like the reference VM
        Some(h) => call_metamethod(&h, vec![v.clone(), v.clone()]),
        None => Err(arith_type_error(v, v)),
    }
}

fn arith_binary(event: MetaMethod, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (arith_num(a), arith_num(b)) {
        return arith_nums(event, x, y);
    }
    match get_binop_metamethod(a, b, event) {
        Some(h) => call_metamethod(&h, vec![a.clone(), b.clone()]),
        None => Err(arith_type_error(a, b)),
    }
}

fn arith_nums(event: MetaMethod, a: Num, b: Num) -> LuaResult<LuaValue> {
    use MetaMethod::*;
    match event {
        Add => Ok(int_preserving(a, b, i64::checked_add, |x, y| x + y)),
        Sub => Ok(int_preserving(a, b, i64::checked_sub, |x, y| x - y)),
        Mul => Ok(int_preserving(a, b, i64::checked_mul, |x, y| x * y)),
        Div => Ok(LuaValue::Float(a.as_f64() / b.as_f64())),
        Pow => Ok(LuaValue::Float(a.as_f64().powf(b.as_f64()))),
        IDiv => match (a, b) {
            (Num::Int(x), Num::Int(y)) => {
                if y == 0 {
                    Err(LuaError::DivisionByZero("n//0"))
                } else {
                    match checked_floor_div(x, y) {
                        Some(q) => Ok(LuaValue::Integer(q)),
                        None => Ok(LuaValue::Float((x as f64 / y as f64).floor())),
                    }
                }
            }
            _ => Ok(LuaValue::Float((a.as_f64() / b.as_f64()).floor())),
        },
        Mod => match (a, b) {
            (Num::Int(x), Num::Int(y)) => match y {
                0 => Err(LuaError::DivisionByZero("n%0")),
                -1 => Ok(LuaValue::Integer(0)),
                _ => Ok(LuaValue::Integer(floor_mod(x, y))),
            },
            _ => Ok(LuaValue::Float(float_mod(a.as_f64(), b.as_f64()))),
        },
        _ => unreachable!("not an arithmetic event"),
    }
}

/// Integer op when both operands are integers and it does not overflow;
/// float retry otherwise.
fn int_preserving(
    a: Num,
    b: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> LuaValue {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(r) => LuaValue::Integer(r),
            None => LuaValue::Float(float_op(x as f64, y as f64)),
        },
        _ => LuaValue::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

/// Mathematical floor division (not truncation toward zero).
/// None on the single overflowing case, i64::MIN // -1.
fn checked_floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && ((m < 0.0) != (b < 0.0)) { m + b } else { m }
}

fn arith_type_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    let bad = if arith_num(a).is_some() { b } else { a };
    LuaError::TypeMismatch(format!(
        "attempt to perform arithmetic on a {} value",
        bad.type_name()
    ))
}

// ==================== bitwise ====================

pub fn band(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    bitwise_binary(MetaMethod::Band, a, b, |x, y| x & y)
}

pub fn bor(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    bitwise_binary(MetaMethod::Bor, a, b, |x, y| x | y)
}

pub fn bxor(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    bitwise_binary(MetaMethod::Bxor, a, b, |x, y| x ^ y)
}

/// `<<`; counts of magnitude >= 64 yield zero, negative counts shift
/// the other way.
pub fn shl(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    bitwise_binary(MetaMethod::Shl, a, b, shift_left)
}

/// `>>` is logical (zero-filling).
pub fn shr(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    bitwise_binary(MetaMethod::Shr, a, b, |x, y| shift_left(x, y.wrapping_neg()))
}

pub fn bnot(v: &LuaValue) -> LuaResult<LuaValue> {
    if let Some(i) = bit_integer(v) {
        return Ok(LuaValue::Integer(!i));
    }
    match get_metamethod(v, MetaMethod::Bnot) {
        Some(h) => call_metamethod(&h, vec![v.clone(), v.clone()]),
        None => Err(bitwise_type_error(v, v)),
    }
}

fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

/// Exact integer for a bitwise operand: Integer as-is, exactly-integral
/// Float. None for everything else (including fractional floats, which
/// get the dedicated error below).
fn bit_integer(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => lua_convert::float_to_exact_integer(*f),
        _ => None,
    }
}

fn bitwise_binary(
    event: MetaMethod,
    a: &LuaValue,
    b: &LuaValue,
    op: fn(i64, i64) -> i64,
) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (bit_integer(a), bit_integer(b)) {
        return Ok(LuaValue::Integer(op(x, y)));
    }
    match get_binop_metamethod(a, b, event) {
        Some(h) => call_metamethod(&h, vec![a.clone(), b.clone()]),
        None => Err(bitwise_type_error(a, b)),
    }
}

fn bitwise_type_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    if a.is_number() && b.is_number() {
        return LuaError::NoIntegerRepresentation(
            "number has no integer representation".to_string(),
        );
    }
    let bad = if a.is_number() { b } else { a };
    LuaError::TypeMismatch(format!(
        "attempt to perform bitwise operation on a {} value",
        bad.type_name()
    ))
}

// ==================== comparison ====================

/// `==` with the strict __eq rule: identity and raw equality first, the
/// handler only for two tables or two userdata.
pub fn equals(a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    if a.raw_equal(b) {
        return Ok(true);
    }
    match get_eq_metamethod(a, b) {
        Some(h) => Ok(call_metamethod(&h, vec![a.clone(), b.clone()])?.is_truthy()),
        None => Ok(false),
    }
}

pub fn less_than(a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    if let (Some(x), Some(y)) = (value_num(a), value_num(b)) {
        return Ok(num_lt(x, y));
    }
    if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
        return Ok(x < y);
    }
    match get_binop_metamethod(a, b, MetaMethod::Lt) {
        Some(h) => Ok(call_metamethod(&h, vec![a.clone(), b.clone()])?.is_truthy()),
        None => Err(compare_type_error(a, b)),
    }
}

pub fn less_equal(a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    if let (Some(x), Some(y)) = (value_num(a), value_num(b)) {
        return Ok(num_le(x, y));
    }
    if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
        return Ok(x <= y);
    }
    match get_binop_metamethod(a, b, MetaMethod::Le) {
        Some(h) => Ok(call_metamethod(&h, vec![a.clone(), b.clone()])?.is_truthy()),
        None => Err(compare_type_error(a, b)),
    }
}

/// a > b is b < a.
pub fn greater_than(a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    less_than(b, a)
}

/// a >= b is b <= a.
pub fn greater_equal(a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    less_equal(b, a)
}

fn compare_type_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    let (ta, tb) = (a.type_name(), b.type_name());
    if ta == tb {
        LuaError::TypeMismatch(format!("attempt to compare two {} values", ta))
    } else {
        LuaError::TypeMismatch(format!("attempt to compare {} with {}", ta, tb))
    }
}

fn num_lt(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x < y,
        (Num::Flt(x), Num::Flt(y)) => x < y,
        (Num::Int(x), Num::Flt(y)) => lt_int_float(x, y),
        (Num::Flt(x), Num::Int(y)) => lt_float_int(x, y),
    }
}

fn num_le(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x <= y,
        (Num::Flt(x), Num::Flt(y)) => x <= y,
        (Num::Int(x), Num::Flt(y)) => le_int_float(x, y),
        (Num::Flt(x), Num::Int(y)) => le_float_int(x, y),
    }
}

// Exact mixed comparisons: split the float at its floor/ceiling so no
// precision is lost converting across the representations.

fn lt_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f < -TWO_POW_63 {
        false
    } else {
        let fl = f.floor();
        let fi = fl as i64;
        i < fi || (i == fi && f > fl)
    }
}

fn le_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f < -TWO_POW_63 {
        false
    } else {
        i <= f.floor() as i64
    }
}

fn lt_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f < -TWO_POW_63 {
        true
    } else {
        (f.ceil() as i64) < i || (f < f.ceil() && f.ceil() as i64 <= i)
    }
}

fn le_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f < -TWO_POW_63 {
        true
    } else {
        f.ceil() as i64 <= i
    }
}

// ==================== concatenation ====================

/// `..`: strings pass through, numbers convert with their canonical
/// textual form, anything else goes to __concat.
pub fn concat(a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (concat_bytes(a), concat_bytes(b)) {
        let mut out = Vec::with_capacity(x.len() + y.len());
        out.extend_from_slice(&x);
        out.extend_from_slice(&y);
        return Ok(LuaValue::String(LuaString::from_bytes(out)));
    }
    match get_binop_metamethod(a, b, MetaMethod::Concat) {
        Some(h) => call_metamethod(&h, vec![a.clone(), b.clone()]),
        None => {
            let bad = if concat_bytes(a).is_some() { b } else { a };
            Err(LuaError::TypeMismatch(format!(
                "attempt to concatenate a {} value",
                bad.type_name()
            )))
        }
    }
}

/// Fold a whole operand list right-to-left (the operator's
/// associativity).
pub fn concat_all(values: &[LuaValue]) -> LuaResult<LuaValue> {
    let mut iter = values.iter().rev();
    let mut acc = match iter.next() {
        Some(v) => v.clone(),
        None => return Ok(LuaValue::String(LuaString::from_bytes(Vec::new()))),
    };
    for v in iter {
        acc = concat(v, &acc)?;
    }
    Ok(acc)
}

fn concat_bytes(v: &LuaValue) -> Option<Vec<u8>> {
    match v {
        LuaValue::String(s) => Some(s.as_bytes().to_vec()),
        LuaValue::Integer(_) | LuaValue::Float(_) => {
            lua_convert::number_to_string(v).map(String::into_bytes)
        }
        _ => None,
    }
}

// ==================== length ====================

/// `#`: byte count for strings, __len else a border for tables, __len
/// alone for everything else.
pub fn len(v: &LuaValue) -> LuaResult<LuaValue> {
    if let LuaValue::String(s) = v {
        return Ok(LuaValue::Integer(s.len() as i64));
    }
    if let Some(h) = get_metamethod(v, MetaMethod::Len) {
        return call_metamethod(&h, vec![v.clone()]);
    }
    match v {
        LuaValue::Table(t) => Ok(LuaValue::Integer(t.lock().length())),
        _ => Err(LuaError::TypeMismatch(format!(
            "attempt to get length of a {} value",
            v.type_name()
        ))),
    }
}

// ==================== logical selection ====================

/// `and` selects its left operand when falsy, else the right. The
/// executor is responsible for not evaluating the right-hand expression
/// in that case; no metamethods take part.
pub fn logical_and(a: &LuaValue, b: &LuaValue) -> LuaValue {
    if a.is_falsy() { a.clone() } else { b.clone() }
}

/// `or` selects its left operand when truthy, else the right.
pub fn logical_or(a: &LuaValue, b: &LuaValue) -> LuaValue {
    if a.is_truthy() { a.clone() } else { b.clone() }
}

/// `not` always produces a boolean.
pub fn logical_not(v: &LuaValue) -> LuaValue {
    LuaValue::Boolean(v.is_falsy())
}

// ==================== index read/write ====================

/// t[k] read. Raw hit first; a miss delegates to __index, which may be
/// a function (called with t and k) or another value to keep indexing.
pub fn index_get(obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    let mut cur = obj.clone();
    for _ in 0..MAX_META_CHAIN {
        let handler = if let LuaValue::Table(t) = &cur {
            let raw = t.lock().raw_get(key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            match get_metamethod(&cur, MetaMethod::Index) {
                Some(h) => h,
                None => return Ok(LuaValue::Nil),
            }
        } else {
            match get_metamethod(&cur, MetaMethod::Index) {
                Some(h) => h,
                None => {
                    return Err(LuaError::TypeMismatch(format!(
                        "attempt to index a {} value",
                        cur.type_name()
                    )));
                }
            }
        };
        if handler.is_function() {
            let results = call_value(&handler, vec![cur, key.clone()])?;
            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
        }
        cur = handler;
    }
    Err(LuaError::TypeMismatch(
        "'__index' chain too long; possible loop".to_string(),
    ))
}

/// t[k] = v. An existing raw key writes through; a missing key delegates
/// to __newindex, falling back to rawset when absent.
pub fn index_set(obj: &LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    let mut cur = obj.clone();
    for _ in 0..MAX_META_CHAIN {
        let handler = if let LuaValue::Table(t) = &cur {
            if t.lock().has_key(&key) {
                return t.lock().raw_set(key, value);
            }
            match get_metamethod(&cur, MetaMethod::NewIndex) {
                Some(h) => h,
                None => return t.lock().raw_set(key, value),
            }
        } else {
            match get_metamethod(&cur, MetaMethod::NewIndex) {
                Some(h) => h,
                None => {
                    return Err(LuaError::TypeMismatch(format!(
                        "attempt to index a {} value",
                        cur.type_name()
                    )));
                }
            }
        };
        if handler.is_function() {
            call_value(&handler, vec![cur, key, value])?;
            return Ok(());
        }
        cur = handler;
    }
    Err(LuaError::TypeMismatch(
        "'__newindex' chain too long; possible loop".to_string(),
    ))
}

// ==================== calls ====================

/// Invoke a value. Functions call directly; anything else resolves
/// __call, which receives the original value before the arguments.
pub fn call_value(func: &LuaValue, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut callee = func.clone();
    for _ in 0..MAX_META_CHAIN {
        if let LuaValue::Function(f) = &callee {
            return f.call(args);
        }
        match get_metamethod(&callee, MetaMethod::Call) {
            Some(h) => {
                args.insert(0, callee);
                callee = h;
            }
            None => {
                return Err(LuaError::TypeMismatch(format!(
                    "attempt to call a {} value",
                    callee.type_name()
                )));
            }
        }
    }
    Err(LuaError::TypeMismatch(
        "'__call' chain too long; possible loop".to_string(),
    ))
}

/// Call a metamethod expecting a single result.
fn call_metamethod(handler: &LuaValue, args: Vec<LuaValue>) -> LuaResult<LuaValue> {
    Ok(call_value(handler, args)?
        .into_iter()
        .next()
        .unwrap_or(LuaValue::Nil))
}

// ==================== tostring / pairs ====================

/// tostring(v): __tostring wins and must return a string; strings pass
/// through byte-exact; everything else uses the canonical form.
pub fn tostring_value(v: &LuaValue) -> LuaResult<LuaString> {
    if let Some(h) = get_metamethod(v, MetaMethod::ToString) {
        return match call_metamethod(&h, vec![v.clone()])? {
            LuaValue::String(s) => Ok(s),
            _ => Err(LuaError::TypeMismatch(
                "'__tostring' must return a string".to_string(),
            )),
        };
    }
    match v {
        LuaValue::String(s) => Ok(s.clone()),
        other => Ok(LuaString::from_str(&other.to_string())),
    }
}

/// pairs(v): the __pairs triple when present, else (next, v, nil).
pub fn pairs_value(v: &LuaValue) -> LuaResult<(LuaValue, LuaValue, LuaValue)> {
    if let Some(h) = get_metamethod(v, MetaMethod::Pairs) {
        let mut results = call_value(&h, vec![v.clone()])?;
        results.resize(3, LuaValue::Nil);
        let mut iter = results.into_iter();
        let f = iter.next().unwrap_or(LuaValue::Nil);
        let s = iter.next().unwrap_or(LuaValue::Nil);
        let ctl = iter.next().unwrap_or(LuaValue::Nil);
        return Ok((f, s, ctl));
    }
    Ok((next_function(), v.clone(), LuaValue::Nil))
}

/// The builtin `next` as a function value, for iterator triples.
pub fn next_function() -> LuaValue {
    LuaValue::Function(crate::lua_value::LuaFunctionRef::builtin("next", |args| {
        let mut iter = args.into_iter();
        let table = iter.next().unwrap_or(LuaValue::Nil);
        let key = iter.next().unwrap_or(LuaValue::Nil);
        match next_entry(&table, &key)? {
            Some((k, v)) => Ok(vec![k, v]),
            None => Ok(vec![LuaValue::Nil]),
        }
    }))
}

/// One iteration step over a table's live entries.
pub fn next_entry(table: &LuaValue, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
    match table {
        LuaValue::Table(t) => t.lock().next(key),
        other => Err(LuaError::Argument(format!(
            "bad argument #1 to 'next' (table expected, got {})",
            other.type_name()
        ))),
    }
}

// ==================== raw operations ====================

pub fn rawget(table: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    match table {
        LuaValue::Table(t) => Ok(t.lock().raw_get(key)),
        other => Err(LuaError::Argument(format!(
            "bad argument #1 to 'rawget' (table expected, got {})",
            other.type_name()
        ))),
    }
}

pub fn rawset(table: &LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    match table {
        LuaValue::Table(t) => t.lock().raw_set(key, value),
        other => Err(LuaError::Argument(format!(
            "bad argument #1 to 'rawset' (table expected, got {})",
            other.type_name()
        ))),
    }
}

pub fn rawequal(a: &LuaValue, b: &LuaValue) -> bool {
    a.raw_equal(b)
}

pub fn rawlen(v: &LuaValue) -> LuaResult<i64> {
    match v {
        LuaValue::Table(t) => Ok(t.lock().length()),
        LuaValue::String(s) => Ok(s.len() as i64),
        other => Err(LuaError::Argument(format!(
            "table or string expected, got {}",
            other.type_name()
        ))),
    }
}

// ==================== metatable access ====================

/// getmetatable(v): the __metatable guard value when the metatable sets
/// one, else the metatable itself, else nil.
pub fn getmetatable_value(v: &LuaValue) -> LuaValue {
    match get_metatable(v) {
        Some(mt) => {
            let guard = mt.lock().raw_get(&LuaValue::str(MetaMethod::Metatable.name()));
            if guard.is_nil() {
                LuaValue::Table(mt)
            } else {
                guard
            }
        }
        None => LuaValue::Nil,
    }
}

/// setmetatable(t, mt): tables only; a protected metatable (one carrying
/// __metatable) cannot be replaced. Returns t.
pub fn setmetatable_value(table: &LuaValue, mt: &LuaValue) -> LuaResult<LuaValue> {
    let t = table.as_table().ok_or_else(|| {
        LuaError::Argument(format!(
            "bad argument #1 to 'setmetatable' (table expected, got {})",
            table.type_name()
        ))
    })?;
    let new_mt = match mt {
        LuaValue::Nil => None,
        LuaValue::Table(m) => Some(m.clone()),
        other => {
            return Err(LuaError::Argument(format!(
                "bad argument #2 to 'setmetatable' (nil or table expected, got {})",
                other.type_name()
            )));
        }
    };
    if let Some(current) = t.metatable() {
        let guard = current.lock().raw_get(&LuaValue::str(MetaMethod::Metatable.name()));
        if !guard.is_nil() {
            return Err(LuaError::TypeMismatch(
                "cannot change a protected metatable".to_string(),
            ));
        }
    }
    t.set_metatable(new_mt);
    Ok(table.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> LuaValue {
        LuaValue::Integer(i)
    }

    fn flt(f: f64) -> LuaValue {
        LuaValue::Float(f)
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        assert_eq!(add(&int(2), &int(3)).unwrap(), int(5));
        assert_eq!(mul(&int(7), &int(6)).unwrap(), int(42));
        assert_eq!(sub(&int(1), &int(9)).unwrap(), int(-8));
    }

    #[test]
    fn test_overflow_promotes_to_float() {
        let r = add(&int(9223372036854775800), &int(100)).unwrap();
        assert_eq!(r, flt(9.223372036854776e18));
        let r = mul(&int(i64::MAX), &int(2)).unwrap();
        assert!(r.is_float());
        let r = unary_minus(&int(i64::MIN)).unwrap();
        assert_eq!(r, flt(9.223372036854776e18));
    }

    #[test]
    fn test_div_is_always_float() {
        assert_eq!(div(&int(10), &int(4)).unwrap(), flt(2.5));
        assert_eq!(div(&int(8), &int(2)).unwrap(), flt(4.0));
    }

    #[test]
    fn test_floor_division() {
        assert_eq!(idiv(&int(7), &int(2)).unwrap(), int(3));
        assert_eq!(idiv(&int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(idiv(&int(7), &int(-2)).unwrap(), int(-4));
        assert_eq!(idiv(&flt(7.5), &int(2)).unwrap(), flt(3.0));
        assert!(matches!(
            idiv(&int(1), &int(0)),
            Err(LuaError::DivisionByZero(_))
        ));
        assert_eq!(idiv(&flt(1.0), &flt(0.0)).unwrap(), flt(f64::INFINITY));
    }

    #[test]
    fn test_modulo_follows_divisor_sign() {
        assert_eq!(modulo(&int(7), &int(3)).unwrap(), int(1));
        assert_eq!(modulo(&int(-7), &int(3)).unwrap(), int(2));
        assert_eq!(modulo(&int(7), &int(-3)).unwrap(), int(-2));
        assert_eq!(modulo(&int(-7), &int(-3)).unwrap(), int(-1));
        assert_eq!(modulo(&flt(5.5), &int(2)).unwrap(), flt(1.5));
        assert_eq!(modulo(&flt(-5.5), &int(2)).unwrap(), flt(0.5));
        assert!(matches!(
            modulo(&int(5), &int(0)),
            Err(LuaError::DivisionByZero(_))
        ));
        assert_eq!(modulo(&int(i64::MIN), &int(-1)).unwrap(), int(0));
    }

    #[test]
    fn test_pow_is_always_float() {
        assert_eq!(pow(&int(2), &int(3)).unwrap(), flt(8.0));
        assert_eq!(pow(&int(2), &int(-1)).unwrap(), flt(0.5));
    }

    #[test]
    fn test_string_coercion_in_arithmetic() {
        assert_eq!(add(&LuaValue::str("10"), &int(1)).unwrap(), int(11));
        assert_eq!(mul(&LuaValue::str("2.5"), &int(2)).unwrap(), flt(5.0));
        assert!(add(&LuaValue::str("x"), &int(1)).is_err());
    }

    #[test]
    fn test_arith_error_names_bad_operand() {
        let err = add(&int(1), &LuaValue::Nil).unwrap_err();
        assert_eq!(err.to_string(), "attempt to perform arithmetic on a nil value");
        let err = add(&LuaValue::Boolean(true), &int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "attempt to perform arithmetic on a boolean value"
        );
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(band(&int(0b1100), &int(0b1010)).unwrap(), int(0b1000));
        assert_eq!(bor(&int(0b1100), &int(0b1010)).unwrap(), int(0b1110));
        assert_eq!(bxor(&int(0b1100), &int(0b1010)).unwrap(), int(0b0110));
        assert_eq!(bnot(&int(0)).unwrap(), int(-1));
        // integral floats coerce
        assert_eq!(band(&flt(12.0), &int(10)).unwrap(), int(8));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shl(&int(1), &int(4)).unwrap(), int(16));
        assert_eq!(shl(&int(1), &int(64)).unwrap(), int(0));
        assert_eq!(shl(&int(1), &int(-1)).unwrap(), int(0));
        assert_eq!(shr(&int(-1), &int(1)).unwrap(), int(i64::MAX));
        assert_eq!(shr(&int(16), &int(-2)).unwrap(), int(64));
        assert_eq!(shr(&int(5), &int(100)).unwrap(), int(0));
    }

    #[test]
    fn test_bitwise_errors() {
        assert!(matches!(
            band(&flt(1.5), &int(1)),
            Err(LuaError::NoIntegerRepresentation(_))
        ));
        let err = band(&LuaValue::str("10"), &int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "attempt to perform bitwise operation on a string value"
        );
    }

    #[test]
    fn test_mixed_comparison_is_exact() {
        assert!(less_than(&int(3), &flt(3.5)).unwrap());
        assert!(!less_than(&flt(1.0e20), &int(1)).unwrap());
        // 2^53 boundary: float 2^53 vs integer 2^53 + 1
        let big = (1i64 << 53) + 1;
        assert!(less_than(&flt(9007199254740992.0), &int(big)).unwrap());
        assert!(!less_than(&int(big), &flt(9007199254740992.0)).unwrap());
        // 2^63 boundary
        assert!(less_than(&int(i64::MAX), &flt(TWO_POW_63)).unwrap());
        assert!(!less_equal(&flt(TWO_POW_63), &int(i64::MAX)).unwrap());
        assert!(less_equal(&flt(-TWO_POW_63), &int(i64::MIN)).unwrap());
        // NaN compares false both ways
        assert!(!less_than(&flt(f64::NAN), &int(1)).unwrap());
        assert!(!less_equal(&int(1), &flt(f64::NAN)).unwrap());
    }

    #[test]
    fn test_string_comparison_is_lexicographic() {
        assert!(less_than(&LuaValue::str("abc"), &LuaValue::str("abd")).unwrap());
        assert!(less_equal(&LuaValue::str("abc"), &LuaValue::str("abc")).unwrap());
        assert!(!less_than(&LuaValue::str("b"), &LuaValue::str("ab")).unwrap());
    }

    #[test]
    fn test_mixed_comparison_errors() {
        let err = less_than(&int(1), &LuaValue::str("2")).unwrap_err();
        assert_eq!(err.to_string(), "attempt to compare number with string");
        let err = less_than(&LuaValue::Nil, &LuaValue::Nil).unwrap_err();
        assert_eq!(err.to_string(), "attempt to compare two nil values");
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            concat(&LuaValue::str("a"), &LuaValue::str("b")).unwrap(),
            LuaValue::str("ab")
        );
        assert_eq!(
            concat(&LuaValue::str("n="), &int(5)).unwrap(),
            LuaValue::str("n=5")
        );
        assert_eq!(
            concat(&flt(1.5), &LuaValue::str("")).unwrap(),
            LuaValue::str("1.5")
        );
        let err = concat(&LuaValue::str("a"), &LuaValue::Nil).unwrap_err();
        assert_eq!(err.to_string(), "attempt to concatenate a nil value");
    }

    #[test]
    fn test_concat_all_associativity() {
        let vals = [LuaValue::str("a"), int(1), LuaValue::str("b")];
        assert_eq!(concat_all(&vals).unwrap(), LuaValue::str("a1b"));
        assert_eq!(concat_all(&[]).unwrap(), LuaValue::str(""));
    }

    #[test]
    fn test_logical_selection() {
        assert_eq!(logical_and(&LuaValue::Nil, &int(1)), LuaValue::Nil);
        assert_eq!(logical_and(&int(1), &int(2)), int(2));
        assert_eq!(logical_or(&LuaValue::Boolean(false), &int(10)), int(10));
        assert_eq!(logical_or(&int(1), &int(2)), int(1));
        assert_eq!(logical_not(&LuaValue::Nil), LuaValue::Boolean(true));
        assert_eq!(logical_not(&int(0)), LuaValue::Boolean(false));
    }
}
