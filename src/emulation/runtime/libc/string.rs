//! `<string.h>`, `<stdlib.h>` number parsing and `<ctype.h>`.

use crate::{
    emulation::{
        engine::TrapAction,
        runtime::{
            libc::{
                memory::{check_object_size, compare},
                EINVAL,
            },
            state::{HostContext, MAX_STRING_LEN},
            stubs::StubTableBuilder,
        },
    },
    Result,
};

const ERANGE: i32 = 34;

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("strlen", strlen)
        .function("strnlen", strnlen)
        .function("strcmp", strcmp)
        .function("strncmp", strncmp)
        .function("strcasecmp", strcasecmp)
        .function("strncasecmp", strncasecmp)
        .function("strcpy", strcpy)
        .function("stpcpy", stpcpy)
        .function("strncpy", strncpy)
        .function("strcat", strcat)
        .function("strncat", strncat)
        .function("strchr", strchr)
        .function("strrchr", strrchr)
        .function("strstr", strstr)
        .function("strdup", strdup)
        .function("strndup", strndup)
        .function("strtol", strtol)
        .function("strtoll", strtol)
        .function("strtoul", strtoul)
        .function("strtoull", strtoul)
        .function("atoi", atoi)
        .function("atol", atol)
        .function("atoll", atol)
        .function("tolower", tolower)
        .function("toupper", toupper)
        .function("isdigit", isdigit)
        .function("isxdigit", isxdigit)
        .function("isspace", isspace)
        .function("isalpha", isalpha)
        .function("isalnum", isalnum)
        .function("isupper", isupper)
        .function("islower", islower)
        .function("isprint", isprint)
        .function("__strlen_chk", strlen_chk)
        .function("__strcpy_chk", strcpy_chk)
        .function("__strncpy_chk", strncpy_chk)
        .function("__strcat_chk", strcat_chk)
        .function("__strchr_chk", strchr)
        .function("__strrchr_chk", strrchr)
}

fn strlen(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok((ctx.read_cstring(ctx.arg(0))?.len() as u64).into())
}

fn strnlen(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let max = ctx.arg_usize(1);
    if max == 0 {
        return Ok(0.into());
    }
    let bytes = ctx.memory.read_cstring(ctx.arg(0), max.min(MAX_STRING_LEN))?;
    Ok((bytes.len() as u64).into())
}

fn strcmp(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let a = ctx.read_cstring(ctx.arg(0))?;
    let b = ctx.read_cstring(ctx.arg(1))?;
    Ok(compare_strings(&a, &b, usize::MAX, false).into())
}

fn strncmp(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let limit = ctx.arg_usize(2);
    if limit == 0 {
        return Ok(0.into());
    }
    let (a, b) = bounded_pair(ctx, limit)?;
    Ok(compare_strings(&a, &b, limit, false).into())
}

fn strcasecmp(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let a = ctx.read_cstring(ctx.arg(0))?;
    let b = ctx.read_cstring(ctx.arg(1))?;
    Ok(compare_strings(&a, &b, usize::MAX, true).into())
}

fn strncasecmp(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let limit = ctx.arg_usize(2);
    if limit == 0 {
        return Ok(0.into());
    }
    let (a, b) = bounded_pair(ctx, limit)?;
    Ok(compare_strings(&a, &b, limit, true).into())
}

fn strcpy(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let dest = ctx.arg(0);
    let src = ctx.read_cstring(ctx.arg(1))?;
    ctx.memory.write_cstring(dest, &src)?;
    Ok(dest.into())
}

fn stpcpy(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let dest = ctx.arg(0);
    let src = ctx.read_cstring(ctx.arg(1))?;
    ctx.memory.write_cstring(dest, &src)?;
    Ok((dest + src.len() as u64).into())
}

fn strncpy(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (dest, len) = (ctx.arg(0), ctx.arg_usize(2));
    if len == 0 {
        return Ok(dest.into());
    }
    let mut bytes = ctx.memory.read_cstring(ctx.arg(1), len.min(MAX_STRING_LEN))?;
    bytes.resize(len, 0);
    ctx.memory.write(dest, &bytes)?;
    Ok(dest.into())
}

fn strcat(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let dest = ctx.arg(0);
    let end = dest + ctx.read_cstring(dest)?.len() as u64;
    let src = ctx.read_cstring(ctx.arg(1))?;
    ctx.memory.write_cstring(end, &src)?;
    Ok(dest.into())
}

fn strncat(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (dest, len) = (ctx.arg(0), ctx.arg_usize(2));
    let end = dest + ctx.read_cstring(dest)?.len() as u64;
    let src = if len == 0 {
        Vec::new()
    } else {
        ctx.memory.read_cstring(ctx.arg(1), len.min(MAX_STRING_LEN))?
    };
    ctx.memory.write_cstring(end, &src)?;
    Ok(dest.into())
}

fn strchr(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (start, needle) = (ctx.arg(0), ctx.arg(1) as u8);
    let bytes = ctx.read_cstring(start)?;
    let found = if needle == 0 {
        Some(bytes.len())
    } else {
        bytes.iter().position(|&b| b == needle)
    };
    Ok(found.map_or(0, |offset| start + offset as u64).into())
}

fn strrchr(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (start, needle) = (ctx.arg(0), ctx.arg(1) as u8);
    let bytes = ctx.read_cstring(start)?;
    let found = if needle == 0 {
        Some(bytes.len())
    } else {
        bytes.iter().rposition(|&b| b == needle)
    };
    Ok(found.map_or(0, |offset| start + offset as u64).into())
}

fn strstr(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let start = ctx.arg(0);
    let haystack = ctx.read_cstring(start)?;
    let needle = ctx.read_cstring(ctx.arg(1))?;
    if needle.is_empty() {
        return Ok(start.into());
    }
    let found = haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice());
    Ok(found.map_or(0, |offset| start + offset as u64).into())
}

fn strdup(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let bytes = ctx.read_cstring(ctx.arg(0))?;
    Ok(ctx.alloc_cstring(&bytes)?.into())
}

fn strndup(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let len = ctx.arg_usize(1);
    let bytes = if len == 0 {
        Vec::new()
    } else {
        ctx.memory.read_cstring(ctx.arg(0), len.min(MAX_STRING_LEN))?
    };
    Ok(ctx.alloc_cstring(&bytes)?.into())
}

fn strtol(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let Some(parsed) = parse_argument(ctx)? else {
        return Ok(0.into());
    };
    let value = match (parsed.negative, parsed.overflow) {
        (false, false) if parsed.value <= i64::MAX as u64 => parsed.value as i64,
        (true, false) if parsed.value <= 1 << 63 => (parsed.value as i64).wrapping_neg(),
        (negative, _) => {
            ctx.set_errno(ERANGE)?;
            if negative {
                i64::MIN
            } else {
                i64::MAX
            }
        }
    };
    Ok((value as u64).into())
}

fn strtoul(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let Some(parsed) = parse_argument(ctx)? else {
        return Ok(0.into());
    };
    if parsed.overflow {
        ctx.set_errno(ERANGE)?;
        return Ok(u64::MAX.into());
    }
    let value = if parsed.negative {
        parsed.value.wrapping_neg()
    } else {
        parsed.value
    };
    Ok(value.into())
}

fn atoi(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let parsed = parse_integer(&ctx.read_cstring(ctx.arg(0))?, 10);
    Ok((i64::from(parsed.signed() as i32) as u64).into())
}

fn atol(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let parsed = parse_integer(&ctx.read_cstring(ctx.arg(0))?, 10);
    Ok((parsed.signed() as u64).into())
}

fn tolower(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let c = ctx.arg_i32(0);
    Ok(map_char(c, |b| b.to_ascii_lowercase()).into())
}

fn toupper(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let c = ctx.arg_i32(0);
    Ok(map_char(c, |b| b.to_ascii_uppercase()).into())
}

fn isdigit(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_digit()).into())
}

fn isxdigit(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_hexdigit()).into())
}

fn isspace(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), is_space).into())
}

fn isalpha(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_alphabetic()).into())
}

fn isalnum(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_alphanumeric()).into())
}

fn isupper(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_uppercase()).into())
}

fn islower(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| b.is_ascii_lowercase()).into())
}

fn isprint(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(classify(ctx.arg_i32(0), |b| (0x20..0x7F).contains(&b)).into())
}

fn strlen_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let len = ctx.read_cstring(ctx.arg(0))?.len();
    check_object_size(len + 1, ctx.arg_usize(1), "__strlen_chk")?;
    Ok((len as u64).into())
}

fn strcpy_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let len = ctx.read_cstring(ctx.arg(1))?.len();
    check_object_size(len + 1, ctx.arg_usize(2), "__strcpy_chk")?;
    strcpy(ctx)
}

fn strncpy_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    check_object_size(ctx.arg_usize(2), ctx.arg_usize(3), "__strncpy_chk")?;
    strncpy(ctx)
}

fn strcat_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let total = ctx.read_cstring(ctx.arg(0))?.len() + ctx.read_cstring(ctx.arg(1))?.len();
    check_object_size(total + 1, ctx.arg_usize(2), "__strcat_chk")?;
    strcat(ctx)
}

/// Reads the two string arguments of a bounded comparison.
fn bounded_pair(ctx: &HostContext<'_>, limit: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let limit = limit.min(MAX_STRING_LEN);
    let a = ctx.memory.read_cstring(ctx.arg(0), limit)?;
    let b = ctx.memory.read_cstring(ctx.arg(1), limit)?;
    Ok((a, b))
}

/// `strcmp` over at most `limit` bytes; missing bytes compare as the terminator.
fn compare_strings(a: &[u8], b: &[u8], limit: usize, fold_case: bool) -> u64 {
    let fold = |c: u8| if fold_case { c.to_ascii_lowercase() } else { c };
    let len = a.len().max(b.len()).saturating_add(1).min(limit);
    let a: Vec<u8> = (0..len).map(|i| fold(a.get(i).copied().unwrap_or(0))).collect();
    let b: Vec<u8> = (0..len).map(|i| fold(b.get(i).copied().unwrap_or(0))).collect();
    compare(&a, &b)
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0B | 0x0C | b'\r')
}

fn classify(c: i32, predicate: impl Fn(u8) -> bool) -> u64 {
    u64::from(u8::try_from(c).is_ok_and(predicate))
}

fn map_char(c: i32, f: impl Fn(u8) -> u8) -> u64 {
    let mapped = u8::try_from(c).map_or(c, |b| i32::from(f(b)));
    i64::from(mapped) as u64
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ParsedInteger {
    value: u64,
    negative: bool,
    overflow: bool,
    /// Bytes consumed, 0 if no digits were found.
    end: usize,
}

impl ParsedInteger {
    fn signed(self) -> i64 {
        if self.negative {
            (self.value as i64).wrapping_neg()
        } else {
            self.value as i64
        }
    }
}

/// Parses the `strto*` arguments `(str, endptr, base)` and stores the end pointer.
///
/// Returns `None` (with `errno` set) for an invalid base.
fn parse_argument(ctx: &mut HostContext<'_>) -> Result<Option<ParsedInteger>> {
    let (start, endptr, base) = (ctx.arg(0), ctx.arg(1), ctx.arg(2) as u32);
    if base == 1 || base > 36 {
        ctx.set_errno(EINVAL)?;
        return Ok(None);
    }
    let parsed = parse_integer(&ctx.read_cstring(start)?, base);
    if endptr != 0 {
        ctx.memory.write_u64(endptr, start + parsed.end as u64)?;
    }
    Ok(Some(parsed))
}

/// Parses an integer prefix the way `strtoull` does, `base` 0 auto-detecting.
fn parse_integer(text: &[u8], base: u32) -> ParsedInteger {
    let mut pos = 0;
    while text.get(pos).copied().is_some_and(is_space) {
        pos += 1;
    }
    let mut negative = false;
    if let Some(&sign @ (b'+' | b'-')) = text.get(pos) {
        negative = sign == b'-';
        pos += 1;
    }

    let hex_prefix = text.get(pos) == Some(&b'0')
        && matches!(text.get(pos + 1), Some(b'x' | b'X'))
        && text.get(pos + 2).is_some_and(u8::is_ascii_hexdigit);
    let base = match base {
        0 | 16 if hex_prefix => {
            pos += 2;
            16
        }
        0 if text.get(pos) == Some(&b'0') => 8,
        0 => 10,
        base => base,
    };

    let digits_start = pos;
    let mut value: u64 = 0;
    let mut overflow = false;
    while let Some(digit) = text.get(pos).and_then(|&c| char::from(c).to_digit(base)) {
        match value
            .checked_mul(u64::from(base))
            .and_then(|v| v.checked_add(u64::from(digit)))
        {
            Some(next) => value = next,
            None => overflow = true,
        }
        pos += 1;
    }
    if pos == digits_start {
        return ParsedInteger::default();
    }
    ParsedInteger {
        value,
        negative,
        overflow,
        end: pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{runtime::DispatchTable, Fault},
        test::TestRuntime,
    };

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(b"  42xyz", 10).end, 4);
        assert_eq!(parse_integer(b"0x1F", 0).value, 31);
        assert_eq!(parse_integer(b"017", 0).value, 15);
        assert_eq!(parse_integer(b"-12", 10).signed(), -12);
        assert_eq!(parse_integer(b"0xg", 16).end, 1);
        assert_eq!(parse_integer(b"abc", 10), ParsedInteger::default());
        assert!(parse_integer(b"99999999999999999999999", 10).overflow);
    }

    #[test]
    fn test_strlen_and_compare() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let a = rt.cstring("apple");
        let b = rt.cstring("apricot");
        assert_eq!(rt.host_int("strlen", &[a]), 5);
        assert_eq!(rt.host_int("strnlen", &[b, 3]), 3);
        assert!((rt.host_int("strcmp", &[a, b]) as i32) < 0);
        assert_eq!(rt.host_int("strncmp", &[a, b, 2]), 0);
        assert_eq!(rt.host_int("strcmp", &[a, a]), 0);
        let upper = rt.cstring("APPLE");
        assert_eq!(rt.host_int("strcasecmp", &[a, upper]), 0);
    }

    #[test]
    fn test_copy_and_concatenate() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let buffer = rt.alloc(32);
        let hello = rt.cstring("hello");
        let world = rt.cstring(" world");
        rt.host_int("strcpy", &[buffer, hello]);
        rt.host_int("strcat", &[buffer, world]);
        assert_eq!(rt.read_string(buffer), "hello world");
        rt.host_int("strncpy", &[buffer, world, 3]);
        assert_eq!(rt.memory.read_bytes(buffer, 3).unwrap(), b" wo");
        let copy = rt.host_int("strdup", &[hello]);
        assert_ne!(copy, hello);
        assert_eq!(rt.read_string(copy), "hello");
    }

    #[test]
    fn test_search() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let text = rt.cstring("a/b/c");
        let needle = rt.cstring("b/");
        assert_eq!(rt.host_int("strchr", &[text, u64::from(b'/')]), text + 1);
        assert_eq!(rt.host_int("strrchr", &[text, u64::from(b'/')]), text + 3);
        assert_eq!(rt.host_int("strchr", &[text, 0]), text + 5);
        assert_eq!(rt.host_int("strstr", &[text, needle]), text + 2);
        assert_eq!(rt.host_int("strchr", &[text, u64::from(b'x')]), 0);
    }

    #[test]
    fn test_strtol_family() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let text = rt.cstring("  -0x10 rest");
        let end = rt.alloc(8);
        assert_eq!(rt.host_int("strtol", &[text, end, 0]) as i64, -16);
        assert_eq!(rt.memory.read_u64(end).unwrap(), text + 7);
        let big = rt.cstring("99999999999999999999");
        assert_eq!(rt.host_int("strtol", &[big, 0, 10]), i64::MAX as u64);
        assert_eq!(rt.host_int("strtoul", &[big, 0, 10]), u64::MAX);
        let number = rt.cstring("123abc");
        assert_eq!(rt.host_int("atoi", &[number]), 123);
    }

    #[test]
    fn test_ctype() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(rt.host_int("isdigit", &[u64::from(b'7')]), 1);
        assert_eq!(rt.host_int("isspace", &[u64::from(b'x')]), 0);
        assert_eq!(rt.host_int("toupper", &[u64::from(b'q')]), u64::from(b'Q'));
        assert_eq!(rt.host_int("tolower", &[u64::MAX]), u64::MAX);
    }

    #[test]
    fn test_strcpy_chk_aborts() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let dest = rt.alloc(4);
        let src = rt.cstring("too long");
        assert!(matches!(
            rt.host("__strcpy_chk", &[dest, src, 4]),
            TrapAction::Exit(Fault::Exit {
                function: "__strcpy_chk",
                status: 134
            })
        ));
    }
}
