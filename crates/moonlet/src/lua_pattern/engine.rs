// Core pattern matching engine - direct interpretation, no AST
//
// MatchState holds the subject, the pattern, and a fixed capture array;
// do_match walks the pattern recursively with backtracking. Greedy
// repetition counts the longest run first and retreats; lazy repetition
// grows one byte at a time. Captures open and close as the walk
// proceeds and are undone on backtrack.
//
// The pattern is validated for structural errors before matching;
// capture errors (unbalanced parentheses, bad back-references) surface
// during the match through the error slot.

use crate::lua_pattern::class::{element_end, singlematch};

/// Capture slots per match (the reference implementation's limit).
pub const MAX_CAPTURES: usize = 32;

/// Recursion limit, against pathological backtracking.
const MAX_MATCH_DEPTH: usize = 220;

#[derive(Debug, Clone, Copy)]
enum CapLen {
    Unfinished,
    /// Position capture `()`
    Position,
    Len(usize),
}

#[derive(Debug, Clone, Copy)]
struct Capture {
    start: usize,
    len: CapLen,
}

/// A finished capture handed to the entry points: a byte span of the
/// subject, or a 0-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureOut {
    Span(usize, usize),
    Position(usize),
}

pub(crate) struct MatchState<'a> {
    subject: &'a [u8],
    pat: &'a [u8],
    captures: [Capture; MAX_CAPTURES],
    num_captures: usize,
    depth: usize,
    pub(crate) error: Option<String>,
}

impl<'a> MatchState<'a> {
    pub(crate) fn new(subject: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState {
            subject,
            pat,
            captures: [Capture {
                start: 0,
                len: CapLen::Unfinished,
            }; MAX_CAPTURES],
            num_captures: 0,
            depth: 0,
            error: None,
        }
    }

    /// Reset for another start position.
    pub(crate) fn reset(&mut self) {
        self.num_captures = 0;
        self.depth = 0;
        self.error = None;
    }

    /// Try to match the pattern from `pat[pp]` against the subject from
    /// `subject[si]`. Some(end) is the byte index just past the match.
    pub(crate) fn do_match(&mut self, si: usize, pp: usize) -> Option<usize> {
        if self.error.is_some() {
            return None;
        }
        self.depth += 1;
        if self.depth > MAX_MATCH_DEPTH {
            self.error = Some("pattern too complex".to_string());
            self.depth -= 1;
            return None;
        }
        let result = self.match_inner(si, pp);
        self.depth -= 1;
        result
    }

    fn match_inner(&mut self, mut si: usize, mut pp: usize) -> Option<usize> {
        // sequential elements advance in place instead of recursing
        loop {
            if self.error.is_some() {
                return None;
            }
            if pp >= self.pat.len() {
                return Some(si);
            }

            match self.pat[pp] {
                b'(' => {
                    return if self.pat.get(pp + 1) == Some(&b')') {
                        self.open_capture(si, pp + 2, CapLen::Position)
                    } else {
                        self.open_capture(si, pp + 1, CapLen::Unfinished)
                    };
                }
                b')' => return self.close_capture(si, pp + 1),
                b'$' if pp + 1 == self.pat.len() => {
                    return if si == self.subject.len() { Some(si) } else { None };
                }
                b'%' if pp + 1 < self.pat.len() => match self.pat[pp + 1] {
                    b'b' => return self.match_balanced(si, pp),
                    b'f' => {
                        // frontier: zero-width test, then continue in place
                        let set_start = pp + 2;
                        let set_end = element_end(self.pat, set_start);
                        let prev = if si > 0 { self.subject[si - 1] } else { 0 };
                        let cur = if si < self.subject.len() {
                            self.subject[si]
                        } else {
                            0
                        };
                        if !singlematch(prev, self.pat, set_start, set_end)
                            && singlematch(cur, self.pat, set_start, set_end)
                        {
                            pp = set_end;
                            continue;
                        }
                        return None;
                    }
                    d if d.is_ascii_digit() => return self.match_backref(si, pp),
                    _ => {}
                },
                _ => {}
            }

            // single element, possibly repeated
            let ep = element_end(self.pat, pp);
            match self.pat.get(ep) {
                Some(b'?') => {
                    if si < self.subject.len() && singlematch(self.subject[si], self.pat, pp, ep) {
                        if let Some(end) = self.do_match(si + 1, ep + 1) {
                            return Some(end);
                        }
                    }
                    pp = ep + 1;
                    continue;
                }
                Some(b'+') => {
                    return if si < self.subject.len()
                        && singlematch(self.subject[si], self.pat, pp, ep)
                    {
                        self.max_expand(si + 1, pp, ep)
                    } else {
                        None
                    };
                }
                Some(b'*') => return self.max_expand(si, pp, ep),
                Some(b'-') => return self.min_expand(si, pp, ep),
                _ => {}
            }

            if si < self.subject.len() && singlematch(self.subject[si], self.pat, pp, ep) {
                si += 1;
                pp = ep;
                continue;
            }
            return None;
        }
    }

    /// Greedy repetition: longest run first, retreat until the rest
    /// matches.
    fn max_expand(&mut self, si: usize, pp: usize, ep: usize) -> Option<usize> {
        let mut count = 0;
        while si + count < self.subject.len()
            && singlematch(self.subject[si + count], self.pat, pp, ep)
        {
            count += 1;
        }
        loop {
            if self.error.is_some() {
                return None;
            }
            if let Some(end) = self.do_match(si + count, ep + 1) {
                return Some(end);
            }
            if count == 0 {
                return None;
            }
            count -= 1;
        }
    }

    /// Lazy repetition: shortest run first, grow one byte at a time.
    fn min_expand(&mut self, mut si: usize, pp: usize, ep: usize) -> Option<usize> {
        loop {
            if self.error.is_some() {
                return None;
            }
            if let Some(end) = self.do_match(si, ep + 1) {
                return Some(end);
            }
            if si < self.subject.len() && singlematch(self.subject[si], self.pat, pp, ep) {
                si += 1;
            } else {
                return None;
            }
        }
    }

    fn open_capture(&mut self, si: usize, pp: usize, len: CapLen) -> Option<usize> {
        let n = self.num_captures;
        if n >= MAX_CAPTURES {
            self.error = Some("too many captures".to_string());
            return None;
        }
        self.captures[n] = Capture { start: si, len };
        self.num_captures = n + 1;
        let result = self.do_match(si, pp);
        if result.is_none() {
            self.num_captures = n;
        }
        result
    }

    fn close_capture(&mut self, si: usize, pp: usize) -> Option<usize> {
        let Some(idx) = (0..self.num_captures)
            .rev()
            .find(|&i| matches!(self.captures[i].len, CapLen::Unfinished))
        else {
            self.error = Some("invalid pattern capture".to_string());
            return None;
        };
        self.captures[idx].len = CapLen::Len(si - self.captures[idx].start);
        let result = self.do_match(si, pp);
        if result.is_none() {
            self.captures[idx].len = CapLen::Unfinished;
        }
        result
    }

    /// %bxy: the subject must open with x here; find the balanced y.
    fn match_balanced(&mut self, si: usize, pp: usize) -> Option<usize> {
        let open = self.pat[pp + 2];
        let close = self.pat[pp + 3];
        if si >= self.subject.len() || self.subject[si] != open {
            return None;
        }
        let mut depth = 1i32;
        let mut i = si + 1;
        while i < self.subject.len() {
            // close before open, so %bxx terminates
            if self.subject[i] == close {
                depth -= 1;
                if depth == 0 {
                    return self.do_match(i + 1, pp + 4);
                }
            } else if self.subject[i] == open {
                depth += 1;
            }
            i += 1;
        }
        None
    }

    /// %1-%9: match the exact bytes of an earlier closed capture.
    fn match_backref(&mut self, si: usize, pp: usize) -> Option<usize> {
        let n = (self.pat[pp + 1] - b'0') as usize;
        if n == 0 || n > self.num_captures {
            self.error = Some(format!("invalid capture index %{}", n));
            return None;
        }
        let cap = self.captures[n - 1];
        let len = match cap.len {
            CapLen::Len(l) => l,
            CapLen::Unfinished => {
                self.error = Some(format!("invalid capture index %{}", n));
                return None;
            }
            // a position capture has no text to compare against
            CapLen::Position => return None,
        };
        if si + len > self.subject.len() {
            return None;
        }
        if self.subject[si..si + len] != self.subject[cap.start..cap.start + len] {
            return None;
        }
        self.do_match(si + len, pp + 2)
    }

    /// The captures of a successful match, in opening order.
    pub(crate) fn take_captures(&self) -> Result<Vec<CaptureOut>, String> {
        let mut out = Vec::with_capacity(self.num_captures);
        for i in 0..self.num_captures {
            let cap = self.captures[i];
            match cap.len {
                CapLen::Unfinished => return Err("unfinished capture".to_string()),
                CapLen::Position => out.push(CaptureOut::Position(cap.start)),
                CapLen::Len(l) => out.push(CaptureOut::Span(cap.start, cap.start + l)),
            }
        }
        Ok(out)
    }
}

/// Structural validation before any matching: unterminated escapes and
/// sets, malformed %b / %f.
pub(crate) fn validate_pattern(pat: &[u8]) -> Result<(), String> {
    let mut i = usize::from(pat.first() == Some(&b'^'));
    while i < pat.len() {
        match pat[i] {
            b'%' => {
                if i + 1 >= pat.len() {
                    return Err("malformed pattern (ends with '%')".to_string());
                }
                match pat[i + 1] {
                    b'b' => {
                        if i + 3 >= pat.len() {
                            return Err(
                                "malformed pattern (missing arguments to '%b')".to_string()
                            );
                        }
                        i += 4;
                    }
                    b'f' => {
                        i += 2;
                        if i >= pat.len() || pat[i] != b'[' {
                            return Err("missing '[' after '%f' in pattern".to_string());
                        }
                        i = validate_set(pat, i)?;
                    }
                    _ => i += 2,
                }
            }
            b'[' => i = validate_set(pat, i)?,
            _ => i += 1,
        }
        // optional repetition suffix
        if i < pat.len() && matches!(pat[i], b'*' | b'+' | b'-' | b'?') {
            i += 1;
        }
    }
    Ok(())
}

/// Validate a [set] starting at pat[i] ('['). Returns the index past
/// the closing ']'.
fn validate_set(pat: &[u8], i: usize) -> Result<usize, String> {
    let mut j = i + 1;
    if j < pat.len() && pat[j] == b'^' {
        j += 1;
    }
    // ']' as the first set byte is a literal member
    if j < pat.len() && pat[j] == b']' {
        j += 1;
    }
    while j < pat.len() && pat[j] != b']' {
        if pat[j] == b'%' {
            j += 1;
            if j >= pat.len() {
                return Err("malformed pattern (ends with '%')".to_string());
            }
        }
        j += 1;
    }
    if j >= pat.len() {
        return Err("malformed pattern (missing ']')".to_string());
    }
    Ok(j + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_at(subject: &[u8], pat: &[u8], si: usize) -> Option<usize> {
        let mut ms = MatchState::new(subject, pat);
        ms.do_match(si, 0)
    }

    #[test]
    fn test_literal_sequence() {
        assert_eq!(match_at(b"hello", b"hell", 0), Some(4));
        assert_eq!(match_at(b"hello", b"ello", 1), Some(5));
        assert_eq!(match_at(b"hello", b"x", 0), None);
    }

    #[test]
    fn test_greedy_backtracks() {
        // ".*l" must give back characters to let the final 'l' match
        assert_eq!(match_at(b"hello", b".*l", 0), Some(4));
        assert_eq!(match_at(b"hello", b".*o", 0), Some(5));
    }

    #[test]
    fn test_lazy_is_shortest() {
        assert_eq!(match_at(b"hello", b".-l", 0), Some(3));
        assert_eq!(match_at(b"hello", b"h.-o", 0), Some(5));
    }

    #[test]
    fn test_plus_requires_one() {
        assert_eq!(match_at(b"aaab", b"a+", 0), Some(3));
        assert_eq!(match_at(b"baa", b"a+", 0), None);
    }

    #[test]
    fn test_optional() {
        assert_eq!(match_at(b"color", b"colou?r", 0), Some(5));
        assert_eq!(match_at(b"colour", b"colou?r", 0), Some(6));
    }

    #[test]
    fn test_end_anchor() {
        assert_eq!(match_at(b"abc", b"c$", 2), Some(3));
        assert_eq!(match_at(b"abcd", b"c$", 2), None);
        // '$' not at the end is a literal
        assert_eq!(match_at(b"a$b", b"a$b", 0), Some(3));
    }

    #[test]
    fn test_captures() {
        let subject = b"key=value";
        let pat = b"(%w+)=(%w+)";
        let mut ms = MatchState::new(subject, pat);
        assert_eq!(ms.do_match(0, 0), Some(9));
        let caps = ms.take_captures().unwrap();
        assert_eq!(caps, vec![CaptureOut::Span(0, 3), CaptureOut::Span(4, 9)]);
    }

    #[test]
    fn test_position_capture() {
        let mut ms = MatchState::new(b"abc", b"a()b");
        assert_eq!(ms.do_match(0, 0), Some(2));
        assert_eq!(ms.take_captures().unwrap(), vec![CaptureOut::Position(1)]);
    }

    #[test]
    fn test_unfinished_capture_is_reported() {
        let mut ms = MatchState::new(b"ab", b"(ab");
        assert_eq!(ms.do_match(0, 0), Some(2));
        assert!(ms.take_captures().is_err());
    }

    #[test]
    fn test_unbalanced_close_is_an_error() {
        let mut ms = MatchState::new(b"ab", b"ab)");
        assert_eq!(ms.do_match(0, 0), None);
        assert_eq!(ms.error.as_deref(), Some("invalid pattern capture"));
    }

    #[test]
    fn test_balanced() {
        assert_eq!(match_at(b"(a(b)c)d", b"%b()", 0), Some(7));
        assert_eq!(match_at(b"(abc", b"%b()", 0), None);
        // equal delimiters terminate at the first closer
        assert_eq!(match_at(b"|ab|cd", b"%b||", 0), Some(4));
    }

    #[test]
    fn test_frontier() {
        // transition from non-word to word
        assert_eq!(match_at(b"the cat", b"%f[%w]%w+", 4), Some(7));
        // no frontier inside a word
        assert_eq!(match_at(b"the cat", b"%f[%w]%w+", 5), None);
        // start of subject counts as a \0 previous byte
        assert_eq!(match_at(b"cat", b"%f[%w]%w+", 0), Some(3));
    }

    #[test]
    fn test_backref() {
        // doubled word
        assert_eq!(match_at(b"abcabc", b"(abc)%1", 0), Some(6));
        assert_eq!(match_at(b"abcabd", b"(abc)%1", 0), None);
    }

    #[test]
    fn test_backref_to_missing_capture_errors() {
        let mut ms = MatchState::new(b"abc", b"%1");
        assert_eq!(ms.do_match(0, 0), None);
        assert_eq!(ms.error.as_deref(), Some("invalid capture index %1"));
    }

    #[test]
    fn test_validation() {
        assert!(validate_pattern(b"%w+").is_ok());
        assert!(validate_pattern(b"%f[%a]x").is_ok());
        assert!(validate_pattern(b"%b()").is_ok());
        assert!(validate_pattern(b"abc%").is_err());
        assert!(validate_pattern(b"[abc").is_err());
        assert!(validate_pattern(b"%b(").is_err());
        assert!(validate_pattern(b"%fx").is_err());
        assert!(validate_pattern(b"[%").is_err());
    }
}
