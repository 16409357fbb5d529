// Lua pattern entry points: find, match, gsub, gmatch
//
// These are the engine's public face, shaped the way the string library
// consumes them: 1-based inclusive positions, captures as values
// (strings, or integers for position captures), the whole match
// standing in when a pattern captures nothing, and gsub replacement by
// string, function, or table.
//
// Patterns are their own language; nothing here delegates to a regex
// library.

mod class;
mod engine;

pub use engine::MAX_CAPTURES;

use std::sync::{Mutex, PoisonError};

use crate::lua_value::{LuaFunctionRef, LuaString, LuaValue, lua_convert};
use crate::lua_vm::{LuaError, LuaResult, lua_ops};

use engine::{CaptureOut, MatchState, validate_pattern};

fn pattern_error(msg: String) -> LuaError {
    LuaError::PatternInvalid(msg)
}

fn check_pattern(pat: &[u8]) -> LuaResult<()> {
    validate_pattern(pat).map_err(pattern_error)
}

/// Lua position argument: 1-based, negative counts from the end.
/// Returns a clamped 1-based position.
fn relative_position(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if pos.unsigned_abs() as usize > len {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn capture_value(subject: &[u8], cap: CaptureOut) -> LuaValue {
    match cap {
        CaptureOut::Span(start, end) => {
            LuaValue::String(LuaString::from_bytes(subject[start..end].to_vec()))
        }
        CaptureOut::Position(p) => LuaValue::Integer(p as i64 + 1),
    }
}

/// Captures as values; the whole match stands in when the pattern
/// captured nothing.
fn captures_or_whole(subject: &[u8], caps: &[CaptureOut], start: usize, end: usize) -> Vec<LuaValue> {
    if caps.is_empty() {
        vec![LuaValue::String(LuaString::from_bytes(
            subject[start..end].to_vec(),
        ))]
    } else {
        caps.iter().map(|c| capture_value(subject, *c)).collect()
    }
}

// ==================== find ====================

/// string.find: the 1-based inclusive span of the first match at or
/// after `init`, plus any captures. With `plain` the pattern is a
/// literal substring and no captures are produced.
pub fn find(
    subject: &[u8],
    pattern: &[u8],
    init: i64,
    plain: bool,
) -> LuaResult<Option<(i64, i64, Vec<LuaValue>)>> {
    let len = subject.len();
    let mut init1 = relative_position(init, len);
    if init1 < 1 {
        init1 = 1;
    }
    if init1 as u128 > len as u128 + 1 {
        return Ok(None);
    }
    let start0 = (init1 - 1) as usize;

    if plain {
        return Ok(plain_find(subject, pattern, start0)
            .map(|at| ((at + 1) as i64, (at + pattern.len()) as i64, Vec::new())));
    }

    check_pattern(pattern)?;
    let anchored = pattern.first() == Some(&b'^');
    let pp0 = usize::from(anchored);

    let mut ms = MatchState::new(subject, pattern);
    let mut si = start0;
    loop {
        ms.reset();
        if let Some(end) = ms.do_match(si, pp0) {
            let caps = ms.take_captures().map_err(pattern_error)?;
            let values = caps.iter().map(|c| capture_value(subject, *c)).collect();
            return Ok(Some(((si + 1) as i64, end as i64, values)));
        }
        if let Some(err) = ms.error.take() {
            return Err(pattern_error(err));
        }
        if anchored || si >= len {
            return Ok(None);
        }
        si += 1;
    }
}

/// Raw substring scan (find's plain mode). An empty needle matches at
/// the start position.
fn plain_find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

// ==================== match ====================

/// string.match: the captures of the first match (or the whole match
/// when the pattern captures nothing), None when there is no match.
pub fn match_pattern(
    subject: &[u8],
    pattern: &[u8],
    init: i64,
) -> LuaResult<Option<Vec<LuaValue>>> {
    let len = subject.len();
    let mut init1 = relative_position(init, len);
    if init1 < 1 {
        init1 = 1;
    }
    if init1 as u128 > len as u128 + 1 {
        return Ok(None);
    }

    check_pattern(pattern)?;
    let anchored = pattern.first() == Some(&b'^');
    let pp0 = usize::from(anchored);

    let mut ms = MatchState::new(subject, pattern);
    let mut si = (init1 - 1) as usize;
    loop {
        ms.reset();
        if let Some(end) = ms.do_match(si, pp0) {
            let caps = ms.take_captures().map_err(pattern_error)?;
            return Ok(Some(captures_or_whole(subject, &caps, si, end)));
        }
        if let Some(err) = ms.error.take() {
            return Err(pattern_error(err));
        }
        if anchored || si >= len {
            return Ok(None);
        }
        si += 1;
    }
}

// ==================== gsub ====================

/// string.gsub: replace up to `max` matches (all when None). The
/// replacement is a string with %0-%9 escapes, a function called with
/// the captures, or a table indexed by the first capture. A nil/false
/// replacement result keeps the matched text.
pub fn gsub(
    subject: &[u8],
    pattern: &[u8],
    replacement: &LuaValue,
    max: Option<i64>,
) -> LuaResult<(LuaString, i64)> {
    match replacement {
        LuaValue::String(_)
        | LuaValue::Integer(_)
        | LuaValue::Float(_)
        | LuaValue::Function(_)
        | LuaValue::Table(_) => {}
        other => {
            return Err(LuaError::Argument(format!(
                "bad argument #3 to 'gsub' (string/function/table expected, got {})",
                other.type_name()
            )));
        }
    }

    check_pattern(pattern)?;
    let anchored = pattern.first() == Some(&b'^');
    let pp0 = usize::from(anchored);
    let max = max.unwrap_or(i64::MAX);

    let mut out: Vec<u8> = Vec::with_capacity(subject.len());
    let mut ms = MatchState::new(subject, pattern);
    let mut si = 0usize;
    let mut lastmatch: Option<usize> = None;
    let mut count = 0i64;

    while count < max {
        ms.reset();
        let matched = ms.do_match(si, pp0);
        if let Some(err) = ms.error.take() {
            return Err(pattern_error(err));
        }
        match matched {
            // a second empty match at the previous end is not a match
            Some(end) if Some(end) != lastmatch => {
                count += 1;
                let caps = ms.take_captures().map_err(pattern_error)?;
                apply_replacement(&mut out, subject, replacement, &caps, si, end)?;
                si = end;
                lastmatch = Some(end);
            }
            _ => {
                if si < subject.len() {
                    out.push(subject[si]);
                    si += 1;
                } else {
                    break;
                }
            }
        }
        if anchored {
            break;
        }
    }
    out.extend_from_slice(&subject[si..]);
    Ok((LuaString::from_bytes(out), count))
}

fn apply_replacement(
    out: &mut Vec<u8>,
    subject: &[u8],
    replacement: &LuaValue,
    caps: &[CaptureOut],
    start: usize,
    end: usize,
) -> LuaResult<()> {
    let whole = &subject[start..end];
    match replacement {
        LuaValue::String(_) | LuaValue::Integer(_) | LuaValue::Float(_) => {
            let template = match replacement {
                LuaValue::String(s) => s.as_bytes().to_vec(),
                other => lua_convert::number_to_string(other)
                    .map(String::into_bytes)
                    .unwrap_or_default(),
            };
            substitute_captures(out, &template, subject, caps, whole)
        }
        LuaValue::Function(_) => {
            let args = captures_or_whole(subject, caps, start, end);
            let result = lua_ops::call_value(replacement, args)?
                .into_iter()
                .next()
                .unwrap_or(LuaValue::Nil);
            push_replacement_value(out, result, whole)
        }
        LuaValue::Table(_) => {
            let key = caps
                .first()
                .map(|c| capture_value(subject, *c))
                .unwrap_or_else(|| {
                    LuaValue::String(LuaString::from_bytes(whole.to_vec()))
                });
            let result = lua_ops::index_get(replacement, &key)?;
            push_replacement_value(out, result, whole)
        }
        _ => unreachable!("replacement type checked by gsub"),
    }
}

/// %0-%9 and %% in a string replacement.
fn substitute_captures(
    out: &mut Vec<u8>,
    template: &[u8],
    subject: &[u8],
    caps: &[CaptureOut],
    whole: &[u8],
) -> LuaResult<()> {
    let mut i = 0;
    while i < template.len() {
        let b = template[i];
        if b != b'%' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&next) = template.get(i) else {
            return Err(pattern_error(
                "invalid use of '%' in replacement string".to_string(),
            ));
        };
        if next == b'%' {
            out.push(b'%');
        } else if next.is_ascii_digit() {
            let n = (next - b'0') as usize;
            if n == 0 {
                out.extend_from_slice(whole);
            } else if n <= caps.len() {
                match caps[n - 1] {
                    CaptureOut::Span(s, e) => out.extend_from_slice(&subject[s..e]),
                    CaptureOut::Position(p) => {
                        out.extend_from_slice(lua_convert::integer_to_string(p as i64 + 1).as_bytes())
                    }
                }
            } else if caps.is_empty() && n == 1 {
                // no captures: %1 is the whole match
                out.extend_from_slice(whole);
            } else {
                return Err(pattern_error(format!(
                    "invalid capture index %{} in replacement string",
                    n
                )));
            }
        } else {
            return Err(pattern_error(
                "invalid use of '%' in replacement string".to_string(),
            ));
        }
        i += 1;
    }
    Ok(())
}

/// What a function or table replacement produced: nil/false keeps the
/// match, strings and numbers substitute, anything else is an error.
fn push_replacement_value(out: &mut Vec<u8>, value: LuaValue, whole: &[u8]) -> LuaResult<()> {
    match value {
        LuaValue::Nil | LuaValue::Boolean(false) => {
            out.extend_from_slice(whole);
            Ok(())
        }
        LuaValue::String(s) => {
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }
        LuaValue::Integer(_) | LuaValue::Float(_) => {
            if let Some(s) = lua_convert::number_to_string(&value) {
                out.extend_from_slice(s.as_bytes());
            }
            Ok(())
        }
        other => Err(LuaError::TypeMismatch(format!(
            "invalid replacement value (a {})",
            other.type_name()
        ))),
    }
}

// ==================== gmatch ====================

/// Lazy match iterator: each step yields the next match's captures (or
/// whole match), advancing past the previous match and never stalling
/// on empty matches.
pub struct Gmatch {
    subject: Vec<u8>,
    pattern: Vec<u8>,
    pos: usize,
    lastmatch: Option<usize>,
}

/// string.gmatch. The pattern is validated up front; a leading '^' is
/// an ordinary character here, not an anchor (an anchor would stop the
/// iteration).
pub fn gmatch(subject: &[u8], pattern: &[u8]) -> LuaResult<Gmatch> {
    check_pattern(pattern)?;
    Ok(Gmatch {
        subject: subject.to_vec(),
        pattern: pattern.to_vec(),
        pos: 0,
        lastmatch: None,
    })
}

impl Gmatch {
    pub fn next(&mut self) -> LuaResult<Option<Vec<LuaValue>>> {
        let mut ms = MatchState::new(&self.subject, &self.pattern);
        while self.pos <= self.subject.len() {
            ms.reset();
            match ms.do_match(self.pos, 0) {
                Some(end) if Some(end) != self.lastmatch => {
                    let caps = ms.take_captures().map_err(pattern_error)?;
                    let values = captures_or_whole(&self.subject, &caps, self.pos, end);
                    self.pos = end.max(self.pos);
                    self.lastmatch = Some(end);
                    return Ok(Some(values));
                }
                _ => {
                    if let Some(err) = ms.error.take() {
                        return Err(pattern_error(err));
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(None)
    }

    /// The iterator as a callable value, for iterator-triple consumers.
    pub fn into_function(self) -> LuaValue {
        let state = Mutex::new(self);
        LuaValue::Function(LuaFunctionRef::builtin("gmatch iterator", move |_| {
            let mut iter = state.lock().unwrap_or_else(PoisonError::into_inner);
            match iter.next()? {
                Some(values) => Ok(values),
                None => Ok(vec![LuaValue::Nil]),
            }
        }))
    }
}
