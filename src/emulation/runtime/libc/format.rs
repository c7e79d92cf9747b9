//! The `printf` formatter and the `sprintf` family.
//!
//! [`format`] implements the conversions native code realistically uses for
//! building strings: `d i u o x X c s p %` and the `f e g` floating point
//! conversions, with flags, field width, precision (both may be `*`) and the
//! `hh h l ll z j t L` length modifiers. `%n` consumes its argument and writes
//! nothing.

use crate::{
    emulation::{
        engine::TrapAction,
        runtime::{
            args::ArgReader, libc::memory::check_object_size, state::HostContext,
            stubs::StubTableBuilder,
        },
        AddressSpace,
    },
    Result,
};

const NULL_STRING: &[u8] = b"(null)";

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("sprintf", sprintf)
        .function("snprintf", snprintf)
        .function("vsprintf", vsprintf)
        .function("vsnprintf", vsnprintf)
        .function("asprintf", asprintf)
        .function("vasprintf", vasprintf)
        .function("__sprintf_chk", sprintf_chk)
        .function("__snprintf_chk", snprintf_chk)
        .function("__vsprintf_chk", vsprintf_chk)
        .function("__vsnprintf_chk", vsnprintf_chk)
}

/// Where the arguments after the format string come from.
#[derive(Clone, Copy, Debug)]
pub(super) enum Arguments {
    /// Variadic, starting at this general register.
    Variadic(u8),
    /// A `va_list` in this argument register.
    VaList(u8),
}

/// Formats the string at `format_address` with arguments taken from `arguments`.
pub(super) fn format_call(
    ctx: &HostContext<'_>,
    format_address: u64,
    arguments: Arguments,
) -> Result<Vec<u8>> {
    let pattern = ctx.read_cstring(format_address)?;
    let cpu = &*ctx.cpu;
    let memory: &AddressSpace = ctx.memory;
    let mut reader = match arguments {
        Arguments::Variadic(first_gpr) => ArgReader::variadic(cpu, memory, first_gpr),
        Arguments::VaList(register) => ArgReader::va_list(cpu, memory, cpu.x(register))?,
    };
    format(memory, &pattern, &mut reader)
}

fn sprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::Variadic(2))?;
    let dest = ctx.arg(0);
    write_unbounded(ctx, dest, &text)
}

fn vsprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::VaList(2))?;
    let dest = ctx.arg(0);
    write_unbounded(ctx, dest, &text)
}

fn snprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(2), Arguments::Variadic(3))?;
    let (dest, size) = (ctx.arg(0), ctx.arg_usize(1));
    write_bounded(ctx, dest, size, &text)
}

fn vsnprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(2), Arguments::VaList(3))?;
    let (dest, size) = (ctx.arg(0), ctx.arg_usize(1));
    write_bounded(ctx, dest, size, &text)
}

fn asprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::Variadic(2))?;
    let dest = ctx.arg(0);
    write_allocated(ctx, dest, &text)
}

fn vasprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::VaList(2))?;
    let dest = ctx.arg(0);
    write_allocated(ctx, dest, &text)
}

fn sprintf_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(3), Arguments::Variadic(4))?;
    check_object_size(text.len() + 1, ctx.arg_usize(2), "__sprintf_chk")?;
    let dest = ctx.arg(0);
    write_unbounded(ctx, dest, &text)
}

fn vsprintf_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(3), Arguments::VaList(4))?;
    check_object_size(text.len() + 1, ctx.arg_usize(2), "__vsprintf_chk")?;
    let dest = ctx.arg(0);
    write_unbounded(ctx, dest, &text)
}

fn snprintf_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    check_object_size(ctx.arg_usize(1), ctx.arg_usize(3), "__snprintf_chk")?;
    let text = format_call(ctx, ctx.arg(4), Arguments::Variadic(5))?;
    let (dest, size) = (ctx.arg(0), ctx.arg_usize(1));
    write_bounded(ctx, dest, size, &text)
}

fn vsnprintf_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    check_object_size(ctx.arg_usize(1), ctx.arg_usize(3), "__vsnprintf_chk")?;
    let text = format_call(ctx, ctx.arg(4), Arguments::VaList(5))?;
    let (dest, size) = (ctx.arg(0), ctx.arg_usize(1));
    write_bounded(ctx, dest, size, &text)
}

fn write_unbounded(ctx: &mut HostContext<'_>, dest: u64, text: &[u8]) -> Result<TrapAction> {
    ctx.memory.write_cstring(dest, text)?;
    Ok((text.len() as u64).into())
}

fn write_bounded(
    ctx: &mut HostContext<'_>,
    dest: u64,
    size: usize,
    text: &[u8],
) -> Result<TrapAction> {
    if size > 0 {
        let kept = text.len().min(size - 1);
        ctx.memory.write_cstring(dest, &text[..kept])?;
    }
    Ok((text.len() as u64).into())
}

fn write_allocated(ctx: &mut HostContext<'_>, out: u64, text: &[u8]) -> Result<TrapAction> {
    let buffer = ctx.alloc_cstring(text)?;
    ctx.memory.write_u64(out, buffer)?;
    Ok((text.len() as u64).into())
}

#[derive(Clone, Copy, Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
    length: Length,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Length {
    Char,
    Short,
    #[default]
    Int,
    Long,
}

impl Length {
    fn signed(self, raw: u64) -> i64 {
        match self {
            Length::Char => i64::from(raw as i8),
            Length::Short => i64::from(raw as i16),
            Length::Int => i64::from(raw as i32),
            Length::Long => raw as i64,
        }
    }

    fn unsigned(self, raw: u64) -> u64 {
        match self {
            Length::Char => u64::from(raw as u8),
            Length::Short => u64::from(raw as u16),
            Length::Int => u64::from(raw as u32),
            Length::Long => raw,
        }
    }
}

/// Expands a `printf` format string.
///
/// # Errors
///
/// Fails if an argument or a `%s` string cannot be read from guest memory.
fn format(
    memory: &AddressSpace,
    pattern: &[u8],
    args: &mut ArgReader<'_>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(pattern.len() + 16);
    let mut pos = 0;
    while pos < pattern.len() {
        let byte = pattern[pos];
        pos += 1;
        if byte != b'%' {
            out.push(byte);
            continue;
        }
        let start = pos - 1;

        let mut spec = Spec::default();
        while let Some(&flag) = pattern.get(pos) {
            match flag {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alternate = true,
                _ => break,
            }
            pos += 1;
        }

        if pattern.get(pos) == Some(&b'*') {
            pos += 1;
            let width = args.next_int()? as i32;
            if width < 0 {
                spec.left = true;
            }
            spec.width = width.unsigned_abs() as usize;
        } else {
            spec.width = parse_number(pattern, &mut pos);
        }

        if pattern.get(pos) == Some(&b'.') {
            pos += 1;
            if pattern.get(pos) == Some(&b'*') {
                pos += 1;
                let precision = args.next_int()? as i32;
                spec.precision = usize::try_from(precision).ok();
            } else {
                spec.precision = Some(parse_number(pattern, &mut pos));
            }
        }

        spec.length = parse_length(pattern, &mut pos);

        let Some(&conversion) = pattern.get(pos) else {
            out.extend_from_slice(&pattern[start..]);
            break;
        };
        pos += 1;

        match conversion {
            b'%' => out.push(b'%'),
            b'd' | b'i' => {
                let value = spec.length.signed(args.next_int()?);
                let sign = sign_prefix(value < 0, &spec);
                let digits = integer_digits(value.unsigned_abs(), 10, false, &spec);
                pad(&mut out, sign, &digits, &spec, true);
            }
            b'u' => {
                let value = spec.length.unsigned(args.next_int()?);
                let digits = integer_digits(value, 10, false, &spec);
                pad(&mut out, b"", &digits, &spec, true);
            }
            b'x' | b'X' => {
                let upper = conversion == b'X';
                let value = spec.length.unsigned(args.next_int()?);
                let digits = integer_digits(value, 16, upper, &spec);
                let prefix: &[u8] = match (spec.alternate && value != 0, upper) {
                    (true, false) => b"0x",
                    (true, true) => b"0X",
                    (false, _) => b"",
                };
                pad(&mut out, prefix, &digits, &spec, true);
            }
            b'o' => {
                let value = spec.length.unsigned(args.next_int()?);
                let mut digits = integer_digits(value, 8, false, &spec);
                if spec.alternate && !digits.starts_with(b"0") {
                    digits.insert(0, b'0');
                }
                pad(&mut out, b"", &digits, &spec, true);
            }
            b'p' => {
                let value = args.next_int()?;
                let digits = format!("{value:x}").into_bytes();
                pad(&mut out, b"0x", &digits, &spec, false);
            }
            b'c' => {
                let value = args.next_int()? as u8;
                pad(&mut out, b"", &[value], &spec, false);
            }
            b's' => {
                let address = args.next_int()?;
                let mut text = if address == 0 {
                    NULL_STRING.to_vec()
                } else {
                    let limit = spec
                        .precision
                        .unwrap_or(crate::emulation::runtime::state::MAX_STRING_LEN);
                    if limit == 0 {
                        Vec::new()
                    } else {
                        memory.read_cstring(address, limit)?
                    }
                };
                if let Some(precision) = spec.precision {
                    text.truncate(precision);
                }
                pad(&mut out, b"", &text, &spec, false);
            }
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' => {
                let value = args.next_double()?;
                let sign = sign_prefix(value.is_sign_negative() && !value.is_nan(), &spec);
                let body = float_body(value.abs(), conversion, &spec);
                pad(&mut out, sign, &body, &spec, value.is_finite());
            }
            b'n' => {
                args.next_int()?;
            }
            _ => out.extend_from_slice(&pattern[start..pos]),
        }
    }
    Ok(out)
}

fn parse_number(pattern: &[u8], pos: &mut usize) -> usize {
    let mut value = 0usize;
    while let Some(digit) = pattern.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(usize::from(digit - b'0'));
        *pos += 1;
    }
    value
}

fn parse_length(pattern: &[u8], pos: &mut usize) -> Length {
    let length = match pattern.get(*pos) {
        Some(b'h') if pattern.get(*pos + 1) == Some(&b'h') => {
            *pos += 1;
            Length::Char
        }
        Some(b'h') => Length::Short,
        Some(b'l') if pattern.get(*pos + 1) == Some(&b'l') => {
            *pos += 1;
            Length::Long
        }
        Some(b'l' | b'z' | b'j' | b't' | b'q' | b'L') => Length::Long,
        _ => return Length::Int,
    };
    *pos += 1;
    length
}

fn sign_prefix(negative: bool, spec: &Spec) -> &'static [u8] {
    if negative {
        b"-"
    } else if spec.plus {
        b"+"
    } else if spec.space {
        b" "
    } else {
        b""
    }
}

fn integer_digits(value: u64, radix: u32, upper: bool, spec: &Spec) -> Vec<u8> {
    if spec.precision == Some(0) && value == 0 {
        return Vec::new();
    }
    let mut digits = match (radix, upper) {
        (16, true) => format!("{value:X}"),
        (16, false) => format!("{value:x}"),
        (8, _) => format!("{value:o}"),
        _ => value.to_string(),
    }
    .into_bytes();
    if let Some(precision) = spec.precision {
        if digits.len() < precision {
            let mut padded = vec![b'0'; precision - digits.len()];
            padded.append(&mut digits);
            digits = padded;
        }
    }
    digits
}

/// Writes `prefix` and `body` into a field of `spec.width` columns.
///
/// `numeric` enables the `0` flag, which integer conversions ignore when a
/// precision is given.
fn pad(out: &mut Vec<u8>, prefix: &[u8], body: &[u8], spec: &Spec, numeric: bool) {
    let len = prefix.len() + body.len();
    let fill = spec.width.saturating_sub(len);
    let zero_fill = numeric && spec.zero && !spec.left && spec.precision.is_none();
    if spec.left {
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
        out.resize(out.len() + fill, b' ');
    } else if zero_fill {
        out.extend_from_slice(prefix);
        out.resize(out.len() + fill, b'0');
        out.extend_from_slice(body);
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
    }
}

/// Formats a non-negative double without its sign.
fn float_body(value: f64, conversion: u8, spec: &Spec) -> Vec<u8> {
    let upper = conversion.is_ascii_uppercase();
    let text = if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        "inf".to_string()
    } else {
        let precision = spec.precision.unwrap_or(6);
        match conversion.to_ascii_lowercase() {
            b'f' => format!("{value:.precision$}"),
            b'e' => exponential(value, precision),
            _ => general(value, precision, spec.alternate),
        }
    };
    if upper {
        text.to_ascii_uppercase().into_bytes()
    } else {
        text.into_bytes()
    }
}

/// `%e`: one digit, the fraction, and an exponent of at least two digits.
fn exponential(value: f64, precision: usize) -> String {
    let text = format!("{value:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
        }
        None => text,
    }
}

/// `%g`: `%e` or `%f` depending on the exponent, trailing zeros removed.
fn general(value: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let rounded = exponential(value, precision - 1);
    let exponent = rounded
        .split_once('e')
        .and_then(|(_, exponent)| exponent.parse::<i64>().ok())
        .unwrap_or(0);
    let text = if exponent < -4 || exponent >= precision as i64 {
        rounded
    } else {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        format!("{value:.decimals$}")
    };
    if alternate {
        return text;
    }
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{}e{exponent}", strip_zeros(mantissa)),
        None => strip_zeros(&text).to_string(),
    }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{runtime::DispatchTable, Cpu},
        test::TestRuntime,
    };

    fn render(pattern: &str, ints: &[u64], doubles: &[f64]) -> String {
        let mut cpu = Cpu::new();
        for (index, value) in ints.iter().enumerate() {
            cpu.set_x(index as u8, *value);
        }
        for (index, value) in doubles.iter().enumerate() {
            cpu.set_d(index as u8, *value);
        }
        let memory = AddressSpace::new();
        let mut reader = ArgReader::variadic(&cpu, &memory, 0);
        String::from_utf8(format(&memory, pattern.as_bytes(), &mut reader).unwrap()).unwrap()
    }

    #[test]
    fn test_integers() {
        assert_eq!(render("%d|%i|%u", &[(-5i64) as u64, 7, u64::MAX], &[]), "-5|7|4294967295");
        assert_eq!(render("%5d|%-5d|%05d", &[42, 42, (-42i64) as u64], &[]), "   42|42   |-0042");
        assert_eq!(render("%+d % d", &[3, 3], &[]), "+3  3");
        assert_eq!(render("%.3d|%.0d", &[7, 0], &[]), "007|");
        assert_eq!(render("%ld|%lld", &[u64::MAX, 1 << 40], &[]), "-1|1099511627776");
        assert_eq!(render("%hhd|%hu", &[0x1FF, 0x1_0001], &[]), "-1|1");
    }

    #[test]
    fn test_hex_octal_pointer() {
        assert_eq!(render("%x|%X|%#x|%08x", &[255, 255, 255, 0xBEEF], &[]), "ff|FF|0xff|0000beef");
        assert_eq!(render("%02x%02x", &[0x0A, 0xB0], &[]), "0ab0");
        assert_eq!(render("%o|%#o", &[8, 8], &[]), "10|010");
        assert_eq!(render("%p", &[0x7000_1000], &[]), "0x70001000");
    }

    #[test]
    fn test_star_width_and_literals() {
        assert_eq!(render("[%*d]", &[4, 9], &[]), "[   9]");
        assert_eq!(render("[%-*d]", &[3, 9], &[]), "[9  ]");
        assert_eq!(render("100%% %c", &[u64::from(b'!')], &[]), "100% !");
        assert_eq!(render("%y", &[], &[]), "%y");
        assert_eq!(render("tail %", &[], &[]), "tail %");
    }

    #[test]
    fn test_floats() {
        assert_eq!(render("%f", &[], &[1.5]), "1.500000");
        assert_eq!(render("%.2f|%8.3f", &[], &[3.14159, -2.5]), "3.14|  -2.500");
        assert_eq!(render("%e", &[], &[12345.678]), "1.234568e+04");
        assert_eq!(render("%g|%g", &[], &[0.0001, 100000.0]), "0.0001|100000");
        assert_eq!(render("%g", &[], &[1e-5]), "1e-05");
    }

    #[test]
    fn test_strings() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let name = rt.cstring("token");
        let pattern = rt.cstring("%s:%.3s:%8s:%s");
        let buffer = rt.alloc(64);
        let len = rt.host_int("sprintf", &[buffer, pattern, name, name, name, 0]);
        let expected = "token:tok:   token:(null)";
        assert_eq!(len, expected.len() as u64);
        assert_eq!(rt.read_string(buffer), expected);
    }

    #[test]
    fn test_snprintf_truncates() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let pattern = rt.cstring("%d-%d");
        let buffer = rt.alloc(16);
        assert_eq!(rt.host_int("snprintf", &[buffer, 4, pattern, 1234, 5678]), 9);
        assert_eq!(rt.read_string(buffer), "123");
        assert_eq!(rt.host_int("snprintf", &[0, 0, pattern, 1, 2]), 3);
    }

    #[test]
    fn test_asprintf_allocates() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let pattern = rt.cstring("v%u");
        let out = rt.alloc(8);
        assert_eq!(rt.host_int("asprintf", &[out, pattern, 15]), 3);
        let buffer = rt.memory.read_u64(out).unwrap();
        assert_eq!(rt.read_string(buffer), "v15");
    }

    #[test]
    fn test_sprintf_chk_aborts() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let pattern = rt.cstring("%d");
        let buffer = rt.alloc(16);
        assert!(matches!(
            rt.host("__sprintf_chk", &[buffer, 0, 3, pattern, 123_456]),
            TrapAction::Exit(crate::emulation::Fault::Exit { .. })
        ));
        assert_eq!(rt.host_int("__sprintf_chk", &[buffer, 0, 16, pattern, 12]), 2);
    }
}
