// String <-> number conversion and canonical textual forms
//
// tonumber's grammar: optional ASCII whitespace, decimal integer, decimal
// float with optional exponent, or 0x/0X hexadecimal integer (wrapping
// modulo 2^64, as in the reference implementation). Hexadecimal floats
// are not accepted.
//
// tostring's forms: integers in base-10 sign-magnitude; floats with 14
// significant digits, a forced ".0" suffix when the result would read as
// an integer, and "inf"/"-inf"/"nan" for the specials. These round-trip
// through the parser above.

use crate::lua_value::LuaValue;

/// Exactly-integral i64 range check: [-2^63, 2^63).
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Convert a float to i64 only if it is a mathematical integer inside
/// the i64 range.
#[inline]
pub fn float_to_exact_integer(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -TWO_POW_63 && f < TWO_POW_63 {
        Some(f as i64)
    } else {
        None
    }
}

// ==================== string -> number ====================

/// Parse a Lua numeral. Returns None when the text is not a numeral
/// (tonumber's nil result).
pub fn parse_number(text: &str) -> Option<LuaValue> {
    let s = text.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }

    let (negative, rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    if rest.len() > 2 && (rest.starts_with("0x") || rest.starts_with("0X")) {
        return parse_hex_integer(&rest[2..], negative);
    }

    // strtod would accept "inf" and "nan"; Lua rejects both
    if s.bytes().any(|b| b == b'n' || b == b'N') {
        return None;
    }

    let looks_integral = !s.bytes().any(|b| matches!(b, b'.' | b'e' | b'E'));
    if looks_integral {
        if let Ok(i) = s.parse::<i64>() {
            return Some(LuaValue::Integer(i));
        }
        // fall through: out-of-range integer literals become floats
    }

    // Rust's float grammar is a superset of Lua's only through the
    // inf/nan spellings excluded above and "e5"-style bare exponents,
    // which need a mantissa digit here.
    let mantissa = rest.split(|c| c == 'e' || c == 'E').next().unwrap_or("");
    if !mantissa.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok().map(LuaValue::Float)
}

/// Hexadecimal integer after the 0x prefix. Accumulates with wrapping
/// arithmetic so "0xffffffffffffffff" reads back as -1.
fn parse_hex_integer(digits: &str, negative: bool) -> Option<LuaValue> {
    if digits.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    for b in digits.bytes() {
        let d = (b as char).to_digit(16)?;
        acc = acc.wrapping_mul(16).wrapping_add(d as u64);
    }
    let i = acc as i64;
    Some(LuaValue::Integer(if negative { i.wrapping_neg() } else { i }))
}

// ==================== value coercions ====================

/// tonumber: numbers pass through, strings go through the numeral
/// grammar, everything else is None.
pub fn to_number(value: &LuaValue) -> Option<LuaValue> {
    match value {
        LuaValue::Integer(_) | LuaValue::Float(_) => Some(value.clone()),
        LuaValue::String(s) => parse_number(s.as_str()?),
        _ => None,
    }
}

/// tointeger: Integer as-is, exactly-integral Float, or a string that
/// parses to an integral outcome.
pub fn to_integer(value: &LuaValue) -> Option<i64> {
    match to_number(value)? {
        LuaValue::Integer(i) => Some(i),
        LuaValue::Float(f) => float_to_exact_integer(f),
        _ => None,
    }
}

// ==================== number -> string ====================

pub fn integer_to_string(i: i64) -> String {
    let mut buf = itoa::Buffer::new();
    buf.format(i).to_string()
}

/// Canonical float form: 14 significant digits, ".0" appended when the
/// digits alone would read as an integer.
pub fn float_to_string(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mut s = format_g14(f);
    // %.14g may produce a plain run of digits; tostring then forces a
    // mark so the float reads back as a float
    if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        s.push_str(".0");
    }
    s
}

/// Equivalent of C's "%.14g": 14 significant digits, fixed notation for
/// decimal exponents in [-4, 14), scientific otherwise, trailing zeros
/// stripped either way.
fn format_g14(f: f64) -> String {
    // 13 fractional digits in scientific form = 14 significant digits
    let sci = format!("{:.13e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    let sign = if mantissa.starts_with('-') { "-" } else { "" };
    let mut digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    while digits.len() > 1 && digits.ends_with('0') {
        digits.pop();
    }

    if (-4..14).contains(&exp) {
        let mut out = String::from(sign);
        if exp < 0 {
            out.push_str("0.");
            for _ in 0..(-exp - 1) {
                out.push('0');
            }
            out.push_str(&digits);
        } else {
            let point = (exp + 1) as usize;
            if digits.len() <= point {
                out.push_str(&digits);
                for _ in 0..(point - digits.len()) {
                    out.push('0');
                }
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
        out
    } else {
        let mut out = String::from(sign);
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        let mag = exp.unsigned_abs();
        if mag < 10 {
            out.push('0');
        }
        out.push_str(&mag.to_string());
        out
    }
}

/// tostring for numbers, shared by Display and the concat operator.
pub fn number_to_string(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::Integer(i) => Some(integer_to_string(*i)),
        LuaValue::Float(f) => Some(float_to_string(*f)),
        _ => None,
    }
}
