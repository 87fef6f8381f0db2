//! C-convention numeric literal parsing shared by the preprocessor,
//! symbol resolver and code generator: decimal, `0x` hex, and
//! leading-`0` octal, with an optional sign.

use num::Num;

/// Scans a leading integer literal and returns its value and the number
/// of bytes consumed, or None when no literal leads the input.  Mirrors
/// `strtol` with base 0: `0x` without a following hex digit consumes
/// just the `0`, as does `08`.
pub(crate) fn scan_int(s: &str) -> Option<(i32, usize)> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            pos = 1;
            true
        }
        Some(b'+') => {
            pos = 1;
            false
        }
        _ => false,
    };

    if pos >= bytes.len() {
        return None;
    }

    let (radix, start) = if bytes[pos] == b'0'
        && bytes.get(pos + 1).map_or(false, |&b| b == b'x' || b == b'X')
        && bytes.get(pos + 2).map_or(false, |b| b.is_ascii_hexdigit())
    {
        (16, pos + 2)
    } else if bytes[pos] == b'0' {
        (8, pos)
    } else {
        (10, pos)
    };

    let digits = bytes[start..]
        .iter()
        .take_while(|&&b| match radix {
            16 => b.is_ascii_hexdigit(),
            8 => (b'0'..=b'7').contains(&b),
            _ => b.is_ascii_digit(),
        })
        .count();
    if digits == 0 {
        return None;
    }

    let end = start + digits;
    let magnitude = <i64 as Num>::from_str_radix(&s[start..end], radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };

    Some((value as i32, end))
}

/// Parses a whole token as an integer literal; None unless the entire
/// input is consumed.
pub(crate) fn parse_int(s: &str) -> Option<i32> {
    match scan_int(s) {
        Some((value, used)) if used == s.len() => Some(value),
        _ => None,
    }
}

/// Parses a whole token as a floating point literal.
pub(crate) fn parse_float(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bases() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-42"), Some(-42));
        assert_eq!(parse_int("0x1A"), Some(26));
        assert_eq!(parse_int("017"), Some(15));
        assert_eq!(parse_int("0"), Some(0));
    }

    #[test]
    fn partial_scans() {
        assert_eq!(scan_int("12abc"), Some((12, 2)));
        assert_eq!(scan_int("0x"), Some((0, 1)));
        assert_eq!(scan_int("08"), Some((0, 1)));
        assert_eq!(scan_int("- 2"), None);
        assert_eq!(scan_int("abc"), None);
    }

    #[test]
    fn whole_token_only() {
        assert_eq!(parse_int("12abc"), None);
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("08"), None);
    }

    #[test]
    fn truncates_like_long_to_int() {
        assert_eq!(parse_int("0xFFFFFFFF"), Some(-1));
    }

    #[test]
    fn floats() {
        assert_eq!(parse_float("3.5"), Some(3.5));
        assert_eq!(parse_float("-1e3"), Some(-1000.0));
        assert_eq!(parse_float("x"), None);
    }
}
