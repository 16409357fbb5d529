// Character classes for Lua patterns
// %a %c %d %g %l %p %s %u %w %x, uppercase complements, and [set]
// matching with ranges and escapes. The engine works on bytes, so every
// class is the ASCII one.

/// Match a byte against a class letter. Lowercase letters select the
/// class, uppercase the complement, anything else matches literally
/// (so %% is '%', %. is '.').
#[inline]
pub(crate) fn match_class(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        // C isspace: space, \t, \n, \v, \f, \r
        b's' => matches!(c, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r'),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        _ => return c == cl,
    };
    if cl.is_ascii_uppercase() { !res } else { res }
}

/// Match a byte against a [set]. `pp` points at '[', `ec` at the
/// closing ']'.
pub(crate) fn match_set(c: u8, pat: &[u8], pp: usize, ec: usize) -> bool {
    let mut sig = true;
    let mut i = pp + 1;
    if i < ec && pat[i] == b'^' {
        sig = false;
        i += 1;
    }
    while i < ec {
        if pat[i] == b'%' && i + 1 < ec {
            if match_class(c, pat[i + 1]) {
                return sig;
            }
            i += 2;
        } else if i + 2 < ec && pat[i + 1] == b'-' {
            // range like a-z
            if pat[i] <= c && c <= pat[i + 2] {
                return sig;
            }
            i += 3;
        } else {
            if pat[i] == c {
                return sig;
            }
            i += 1;
        }
    }
    !sig
}

/// Match a byte against the single pattern element at `pp`. `ep` is the
/// index just past the element (so `ep - 1` is the ']' of a set).
#[inline]
pub(crate) fn singlematch(c: u8, pat: &[u8], pp: usize, ep: usize) -> bool {
    if pp >= pat.len() {
        return false;
    }
    match pat[pp] {
        b'.' => true,
        b'%' => match_class(c, pat[pp + 1]),
        b'[' => match_set(c, pat, pp, ep - 1),
        lit => lit == c,
    }
}

/// Index just past the single element at `pp` (a literal, '.', '%x', or
/// a '[set]'). Assumes a validated pattern; repetition suffixes are not
/// consumed.
pub(crate) fn element_end(pat: &[u8], pp: usize) -> usize {
    match pat[pp] {
        b'%' => pp + 2,
        b'[' => {
            let mut i = pp + 1;
            if i < pat.len() && pat[i] == b'^' {
                i += 1;
            }
            // the first set byte is consumed unconditionally, so a
            // leading ']' is a literal member
            while i < pat.len() {
                let c = pat[i];
                i += 1;
                if c == b'%' {
                    i += 1;
                    continue;
                }
                if i < pat.len() && pat[i] == b']' {
                    return i + 1;
                }
            }
            pat.len()
        }
        _ => pp + 1,
    }
}
